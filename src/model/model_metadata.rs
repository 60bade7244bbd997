//! モデルメタデータの定義
//!
//! tar.gz形式のモデルバンドルに同梱され、重みを復元するためのネットワーク構成と
//! 学習時の入力条件を記録します。

use serde::{Deserialize, Serialize};

use crate::error::{InspectionError, Result};

/// 現在サポートしているアーキテクチャ名
pub const ARCHITECTURE_MOBILENET_V2: &str = "mobilenet_v2";

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// ネットワーク構成名（例: "mobilenet_v2"）
    pub architecture: String,

    /// MobileNetV2の幅係数（チャネル数の倍率）
    pub width_multiplier: f32,

    /// 学習時の入力解像度（正方形の一辺）
    pub input_size: u32,

    /// [正常ラベル, 欠陥ラベル]
    pub class_names: Vec<String>,

    /// 学習時に推奨された判定閾値
    #[serde(default)]
    pub recommended_threshold: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(width_multiplier: f32, input_size: u32, class_names: Vec<String>) -> Self {
        Self {
            architecture: ARCHITECTURE_MOBILENET_V2.to_string(),
            width_multiplier,
            input_size,
            class_names,
            recommended_threshold: None,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn with_recommended_threshold(mut self, threshold: f64) -> Self {
        self.recommended_threshold = Some(threshold);
        self
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| InspectionError::Config(format!("Failed to serialize metadata to JSON: {}", e)))
    }

    /// JSON文字列からメタデータを生成
    ///
    /// 呼び出し側でモデルパスを付けた `ModelLoad` エラーに変換するため、理由文字列を返す。
    pub fn from_json_string(json: &str) -> std::result::Result<Self, String> {
        let metadata: Self = serde_json::from_str(json)
            .map_err(|e| format!("Failed to deserialize metadata from JSON: {}", e))?;
        metadata.check()?;
        Ok(metadata)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.architecture != ARCHITECTURE_MOBILENET_V2 {
            return Err(format!("unsupported architecture '{}'", self.architecture));
        }
        if !(self.width_multiplier.is_finite() && self.width_multiplier > 0.0) {
            return Err(format!("invalid width_multiplier {}", self.width_multiplier));
        }
        if self.input_size == 0 {
            return Err("input_size must be positive".to_string());
        }
        Ok(())
    }
}
