//! 検査設定管理モジュール
//!
//! モデルの場所・入力サイズ・判定閾値・クラス名をJSONまたはTOMLから読み込み、
//! モデル処理を始める前にすべての必須項目を検証します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

use crate::error::{InspectionError, Result};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
    /// WGPU (GPU) バックエンド
    Wgpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
        }
    }
}

/// 読み込み直後の未検証設定
///
/// 必須項目もすべて `Option` で受け、欠落を項目名付きの `Config` エラーにする。
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    model_path: Option<String>,
    model_url: Option<String>,
    img_size: Option<i64>,
    decision_threshold: Option<f64>,
    class_names: Option<Vec<String>>,
    #[serde(default)]
    device: DeviceType,
}

/// 検査設定（検証済み・読み取り専用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectionConfig {
    /// モデルファイルのパス
    pub model_path: PathBuf,
    /// モデルの取得元URL（ローカルに無い場合のみ使用）
    pub model_url: Option<String>,
    /// モデル入力画像の一辺（正方形）
    pub img_size: u32,
    /// 欠陥判定の閾値（この値以上で欠陥）
    pub decision_threshold: f64,
    /// [正常ラベル, 欠陥ラベル]
    pub class_names: [String; 2],
    /// 推論バックエンド
    pub device: DeviceType,
}

impl InspectionConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    ///
    /// 拡張子が `.json` ならJSON、`.toml` ならTOMLとして解釈します。それ以外はエラー。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            InspectionError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config = match config_format {
            ConfigFormat::Toml => Self::from_toml_str(&content)?,
            ConfigFormat::Json => Self::from_json_str(&content)?,
        };

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content)
            .map_err(|e| InspectionError::Config(format!("Invalid JSON config: {}", e)))?;
        Self::from_raw(raw)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| InspectionError::Config(format!("Invalid TOML config: {}", e)))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let model_path = raw.model_path.ok_or_else(|| missing("model_path"))?;
        let img_size = raw.img_size.ok_or_else(|| missing("img_size"))?;
        let decision_threshold = raw
            .decision_threshold
            .ok_or_else(|| missing("decision_threshold"))?;
        let class_names = raw.class_names.ok_or_else(|| missing("class_names"))?;

        if img_size <= 0 || img_size > u32::MAX as i64 {
            return Err(InspectionError::Config(format!(
                "img_size must be a positive integer, got {}",
                img_size
            )));
        }

        let class_names: [String; 2] = class_names.try_into().map_err(|names: Vec<String>| {
            InspectionError::Config(format!(
                "class_names must have exactly 2 entries [negative, positive], got {}",
                names.len()
            ))
        })?;

        // 空文字列のURLは未設定として扱う
        let model_url = raw
            .model_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let config = Self {
            model_path: PathBuf::from(model_path),
            model_url,
            img_size: img_size as u32,
            decision_threshold,
            class_names,
            device: raw.device,
        };
        config.validate()?;
        Ok(config)
    }

    /// 不変条件を検証する
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(InspectionError::Config("model_path must not be empty".to_string()));
        }

        if self.img_size == 0 {
            return Err(InspectionError::Config("img_size must be positive".to_string()));
        }

        if !self.decision_threshold.is_finite() || !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(InspectionError::Config(format!(
                "decision_threshold must be within [0, 1], got {}",
                self.decision_threshold
            )));
        }

        if self.class_names.iter().any(|name| name.trim().is_empty()) {
            return Err(InspectionError::Config("class_names must not be empty".to_string()));
        }

        if let Some(model_url) = &self.model_url {
            let parsed = Url::parse(model_url).map_err(|e| {
                InspectionError::Config(format!("model_url '{}' is not a valid URL: {}", model_url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(InspectionError::Config(format!(
                    "model_url must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }

    /// 正常ラベル（class_names[0]）
    pub fn negative_label(&self) -> &str {
        &self.class_names[0]
    }

    /// 欠陥ラベル（class_names[1]）
    pub fn positive_label(&self) -> &str {
        &self.class_names[1]
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| InspectionError::Config(format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| InspectionError::Config(format!("Failed to serialize config: {}", e)))?,
        };
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== 検査設定 ===");
        println!("モデルパス: {}", self.model_path.display());
        println!("モデルURL: {}", self.model_url.as_deref().unwrap_or("(なし)"));
        println!("入力サイズ: {}x{}", self.img_size, self.img_size);
        println!("判定閾値: {}", self.decision_threshold);
        println!("クラス名: {} / {}", self.class_names[0], self.class_names[1]);
        println!("計算デバイス: {}", self.device);
        println!("================\n");
    }
}

/// 対応する設定ファイル形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(InspectionError::Config(format!(
                "Unsupported config format: {} (supported: .json, .toml)",
                path.display()
            ))),
        }
    }
}

fn missing(field: &str) -> InspectionError {
    InspectionError::Config(format!("missing required field `{}`", field))
}
