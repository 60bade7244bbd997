//! 推論と閾値判定
//!
//! モデル出力の先頭要素を欠陥確率として取り出し、閾値以上なら欠陥クラスを選びます。

use serde::Serialize;
use tracing::info;

use crate::error::{InspectionError, Result};
use crate::ml::{BinaryClassifier, ImageTensor};

/// 推論結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    /// 欠陥クラスの確率 [0, 1]
    pub probability: f64,
    /// 判定ラベル（class_names のいずれか）
    pub label: String,
    /// 判定に使った閾値
    pub threshold: f64,
}

impl InferenceResult {
    /// 欠陥と判定されたか
    pub fn is_positive(&self) -> bool {
        self.probability >= self.threshold
    }
}

/// 閾値判定
///
/// `probability == threshold` は欠陥側（class_names[1]）に含める。
pub fn decide<'a>(probability: f64, threshold: f64, class_names: &'a [String; 2]) -> &'a str {
    if probability >= threshold {
        &class_names[1]
    } else {
        &class_names[0]
    }
}

/// 前処理済みテンソルで推論し、確率とラベルを返す
///
/// モデルがベクトルを返した場合は先頭要素のみを使う。再試行は行わない。
pub fn infer(
    model: &dyn BinaryClassifier,
    tensor: &ImageTensor,
    threshold: f64,
    class_names: &[String; 2],
) -> Result<InferenceResult> {
    tensor.square_side()?;

    let output = model.predict(tensor)?;
    let raw = *output
        .first()
        .ok_or_else(|| InspectionError::Inference("model produced no output".to_string()))?;

    let probability = raw as f64;
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(InspectionError::Inference(format!(
            "model output {} is not a probability",
            raw
        )));
    }

    let label = decide(probability, threshold, class_names).to_string();
    info!("Defect probability {:.3} -> {} (threshold {})", probability, label, threshold);

    Ok(InferenceResult {
        probability,
        label,
        threshold,
    })
}
