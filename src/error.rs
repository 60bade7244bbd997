//! 推論パイプラインのエラー定義
//!
//! 設定・モデル取得・モデル読み込み・推論の各段階で発生するエラーを
//! 1つの列挙型にまとめ、表示層まで明示的に伝播させます。

use std::path::PathBuf;
use thiserror::Error;

/// エラー種別（表示層がメッセージ文字列に依存せず対処を選ぶためのタグ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    ModelUnavailable,
    ModelFetch,
    ModelLoad,
    Inference,
    Image,
    Io,
}

#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Model file not found at {}. Set model_url in the config or place the model at the path.", path.display())]
    ModelUnavailable { path: PathBuf },

    #[error("Failed to fetch model from {url}: {reason}")]
    ModelFetch { url: String, reason: String },

    #[error("Failed to load model {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InspectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InspectionError::Config(_) => ErrorKind::Config,
            InspectionError::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            InspectionError::ModelFetch { .. } => ErrorKind::ModelFetch,
            InspectionError::ModelLoad { .. } => ErrorKind::ModelLoad,
            InspectionError::Inference(_) => ErrorKind::Inference,
            InspectionError::Image(_) => ErrorKind::Image,
            InspectionError::Io(_) => ErrorKind::Io,
        }
    }

    /// 呼び出し側が再実行する価値のあるエラーか
    ///
    /// 取得失敗はネットワーク復旧後、読み込み失敗はファイル差し替え後に再試行できる。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InspectionError::ModelFetch { .. } | InspectionError::ModelLoad { .. }
        )
    }

    pub(crate) fn fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        InspectionError::ModelFetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn load(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        InspectionError::ModelLoad {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

impl From<InspectionError> for String {
    fn from(err: InspectionError) -> Self {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, InspectionError>;
