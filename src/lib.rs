//! はんだ接合部X線画像の欠陥判定パイプライン
//!
//! モデルの解決（ローカルまたはリモート）、プロセス内キャッシュ、学習時と同一の前処理、
//! 推論と閾値判定を提供します。画面表示や設定ファイルの置き場所は呼び出し側の責務です。

pub mod error;
pub mod logging;
pub mod ml;
pub mod model;
pub mod pipeline;

pub use error::{ErrorKind, InspectionError, Result};
pub use ml::{decide, infer, preprocess, BinaryClassifier, ImageTensor, InferenceResult, ModelHandle, ModelLoader};
pub use model::{InspectionConfig, ModelCache, ModelResolver, Resolution};
pub use pipeline::InspectionPipeline;
