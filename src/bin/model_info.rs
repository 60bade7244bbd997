//! モデルバンドルのメタデータを表示するツール

use std::path::PathBuf;

use anyhow::Context;
use solder_qc_lib::model::{load_metadata, print_metadata_info, InspectionConfig};

fn main() -> anyhow::Result<()> {
    // 引数が無ければ設定ファイルのモデルパスを使う
    let model_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let config = InspectionConfig::load(InspectionConfig::default_path())
                .context("モデルパスを指定するか config.json を用意してください")?;
            config.model_path
        }
    };

    let metadata = load_metadata(&model_path)
        .with_context(|| format!("メタデータ読み込みエラー: {}", model_path.display()))?;

    println!("✓ モデルメタデータ読み込み成功: {}", model_path.display());
    print_metadata_info(&metadata);
    Ok(())
}
