//! ログ出力の初期化
//!
//! ライブラリ自体はサブスクライバを設定しない。バイナリから一度だけ呼び出す。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{InspectionError, Result};

/// `RUST_LOG` が設定されていればそれを優先し、無ければ `info`（verbose時は `debug`）で出力する
pub fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbose))
        .with(filter)
        .try_init()
        .map_err(|e| InspectionError::Config(format!("Failed to initialize logger: {}", e)))?;

    Ok(())
}
