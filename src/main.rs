//! ターミナル版の検査フロントエンド
//!
//! 使い方: solder_qc <画像ファイル> [設定ファイル(.json / .toml)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use solder_qc_lib::ml::load_image;
use solder_qc_lib::{ErrorKind, InspectionConfig, InspectionPipeline};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(image_path) = args.get(1).map(PathBuf::from) else {
        eprintln!("使い方: {} <画像ファイル> [設定ファイル(.json / .toml)]", args[0]);
        std::process::exit(2);
    };
    let config_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(InspectionConfig::default_path);

    let verbose = std::env::var("SOLDER_QC_VERBOSE").is_ok();
    solder_qc_lib::logging::init_logging(verbose)?;

    println!("=== Solder Joint Quality Demo ===\n");

    let config = InspectionConfig::load(&config_path)
        .with_context(|| format!("設定ファイルの読み込みエラー: {}", config_path.display()))?;
    if verbose {
        config.display();
    }

    let pipeline = InspectionPipeline::from_config(config)?;

    // 画像を受け付ける前にモデルを用意する
    if let Err(e) = pipeline.prepare() {
        if e.kind() == ErrorKind::ModelUnavailable {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
        return Err(e).context("モデルの準備に失敗しました");
    }

    let image = load_image(&image_path)?;
    println!("入力画像: {} ({}x{})", image_path.display(), image.width(), image.height());

    let result = pipeline
        .inspect(&image)
        .with_context(|| format!("推論エラー: {}", image_path.display()))?;

    println!("欠陥確率: {:.3}", result.probability);
    println!("判定: {}", result.label);
    println!("判定閾値 = {}", result.threshold);

    Ok(())
}
