//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（構成、入力サイズ、クラス名など）
//! - model.bin       - モデルの重み（バイナリ）

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{InspectionError, Result};
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 親ディレクトリが存在しない場合は作成します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tar_gz_file = File::create(output_path)?;

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // tarアーカイブとgzipストリームを完成させる
    let encoder = tar_builder.into_inner()?;
    encoder.finish()?;

    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let (metadata, _) = read_bundle(tar_gz_path, false)?;
    metadata.ok_or_else(|| InspectionError::load(tar_gz_path, "metadata.json not found in tar.gz archive"))
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let (_, binary) = read_bundle(tar_gz_path, true)?;
    binary.ok_or_else(|| InspectionError::load(tar_gz_path, "model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_bundle(tar_gz_path, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(InspectionError::load(tar_gz_path, "metadata.json not found in tar.gz archive")),
        (_, None) => Err(InspectionError::load(tar_gz_path, "model.bin not found in tar.gz archive")),
    }
}

/// バンドルを走査し、必要なエントリを取り出す
///
/// 壊れたアーカイブは `ModelLoad` エラーとして扱う。
fn read_bundle(
    tar_gz_path: &Path,
    want_binary: bool,
) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let tar_gz_file = File::open(tar_gz_path).map_err(|e| InspectionError::load(tar_gz_path, e))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    let entries = archive.entries().map_err(|e| InspectionError::load(tar_gz_path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| InspectionError::load(tar_gz_path, e))?;
        let name = entry
            .path()
            .map_err(|e| InspectionError::load(tar_gz_path, e))?
            .to_string_lossy()
            .into_owned();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry
                    .read_to_string(&mut json_str)
                    .map_err(|e| InspectionError::load(tar_gz_path, e))?;
                let metadata = ModelMetadata::from_json_string(&json_str)
                    .map_err(|reason| InspectionError::load(tar_gz_path, reason))?;
                metadata_opt = Some(metadata);
            }
            MODEL_ENTRY if want_binary => {
                let mut buffer = Vec::new();
                entry
                    .read_to_end(&mut buffer)
                    .map_err(|e| InspectionError::load(tar_gz_path, e))?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }

        if metadata_opt.is_some() && (!want_binary || model_binary_opt.is_some()) {
            break;
        }
    }

    Ok((metadata_opt, model_binary_opt))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("アーキテクチャ: {}", metadata.architecture);
    println!("幅係数: {}", metadata.width_multiplier);
    println!("モデル入力サイズ: {}x{}", metadata.input_size, metadata.input_size);
    println!("クラス名: {}", metadata.class_names.join(", "));
    if let Some(threshold) = metadata.recommended_threshold {
        println!("推奨閾値: {}", threshold);
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}
