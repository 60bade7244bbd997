//! 二値分類モデルの共通インターフェース

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::ml::preprocess::ImageTensor;

/// 欠陥確率を出力する二値分類モデル
///
/// 推論中に重みを変更しないため、複数の推論呼び出しから同時に共有できる。
pub trait BinaryClassifier: Send + Sync {
    /// 順伝播を行い、モデルの出力をそのまま返す
    ///
    /// 単一出力モデルでは要素数1のベクトルになる。
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>>;

    /// 学習時の入力サイズ（分かる場合のみ）
    fn expected_input_size(&self) -> Option<u32> {
        None
    }

    /// 学習時のクラス名（分かる場合のみ）
    fn class_names(&self) -> Option<&[String]> {
        None
    }
}

impl std::fmt::Debug for dyn BinaryClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryClassifier")
            .field("expected_input_size", &self.expected_input_size())
            .finish()
    }
}

/// 読み込み済みモデルへの共有ハンドル
pub type ModelHandle = Arc<dyn BinaryClassifier>;

/// モデルファイルを読み込んでハンドルを作る
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ModelHandle>;
}
