//! モデル推論機能
//!
//! tar.gzバンドルからBurnモデルを復元し、`BinaryClassifier` として提供します。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use burn_ndarray::NdArray;
#[cfg(feature = "gpu")]
use burn_wgpu::{Wgpu, WgpuDevice};
use tracing::{debug, info};

use crate::error::{InspectionError, Result};
use crate::ml::preprocess::CHANNELS;
use crate::ml::{BinaryClassifier, ImageTensor, ModelConfig, ModelHandle, ModelLoader, SolderNet};
use crate::model::{load_model_with_metadata, save_model_with_metadata, DeviceType, ModelMetadata};

/// 推論エンジン
///
/// モデル本体は `Mutex` で保持し、どのバックエンドでも `Sync` なハンドルとして共有する。
/// 推論は `&self` の順伝播のみで重みは変更しない。
pub struct InferenceEngine<B: Backend> {
    model: Mutex<SolderNet<B>>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load(model_path: &Path, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;

        // モデル設定（推論時はドロップアウトなし）
        let model_config = ModelConfig {
            width_multiplier: metadata.width_multiplier,
            dropout: 0.0,
            input_size: metadata.input_size as usize,
        };
        let model = model_config.init::<B>(&device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| InspectionError::load(model_path, format!("モデル重みの読み込みエラー: {:?}", e)))?;
        // load_record はテンソル形状を照合しないため、パラメータ数と試験推論で整合を確認する
        let expected_params = model.num_params();
        let model = catch_unwind(AssertUnwindSafe(move || model.load_record(record)))
            .map_err(|_| InspectionError::load(model_path, "model.bin does not match the architecture in metadata.json"))?;
        let loaded_params = model.num_params();
        if loaded_params != expected_params {
            return Err(InspectionError::load(
                model_path,
                format!(
                    "model.bin holds {} parameters but metadata.json describes {}",
                    loaded_params, expected_params
                ),
            ));
        }

        let engine = Self::from_model(model, metadata, device);
        engine
            .verify()
            .map_err(|reason| InspectionError::load(model_path, reason))?;

        let metadata = &engine.metadata;
        info!(
            "Loaded {} (width {}, input {}x{}) from {}",
            metadata.architecture,
            metadata.width_multiplier,
            metadata.input_size,
            metadata.input_size,
            model_path.display()
        );
        if let Some(threshold) = metadata.recommended_threshold {
            debug!("Recommended threshold from training: {}", threshold);
        }

        Ok(engine)
    }

    pub fn from_model(model: SolderNet<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            metadata,
            device,
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// ゼロ画像で一度推論し、出力が `[1, 1]` の確率になることを確認する
    fn verify(&self) -> std::result::Result<(), String> {
        let size = self.metadata.input_size as usize;
        let input = Tensor::<B, 4>::zeros([1, size, size, CHANNELS], &self.device);

        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        let output = catch_unwind(AssertUnwindSafe(|| model.forward(input)))
            .map_err(|_| "weights do not fit the architecture in metadata.json".to_string())?;
        drop(model);

        let dims = output.dims();
        if dims != [1, 1] {
            return Err(format!("expected output shape [1, 1], got {:?}", dims));
        }
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| format!("推論結果の取得エラー: {:?}", e))?;
        match values.first() {
            Some(value) if (0.0..=1.0).contains(value) => Ok(()),
            other => Err(format!("test inference produced {:?} instead of a probability", other)),
        }
    }

    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let side = input.square_side()?;
        if side != self.metadata.input_size as usize {
            return Err(InspectionError::Inference(format!(
                "model expects {}x{} input, got {}x{}",
                self.metadata.input_size, self.metadata.input_size, side, side
            )));
        }

        let data = TensorData::new(input.data().to_vec(), input.shape());
        let tensor = Tensor::<B, 4>::from_data(data, &self.device);

        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        // バックエンド内部のパニックも推論エラーとして呼び出し側に返す
        let output = catch_unwind(AssertUnwindSafe(|| model.forward(tensor)))
            .map_err(|_| InspectionError::Inference("backend panicked during forward pass".to_string()))?;
        drop(model);

        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| InspectionError::Inference(format!("推論結果の取得エラー: {:?}", e)))
    }
}

impl<B: Backend> BinaryClassifier for InferenceEngine<B> {
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let output = self.forward(input)?;
        debug!("Raw model output: {:?}", output);
        Ok(output)
    }

    fn expected_input_size(&self) -> Option<u32> {
        Some(self.metadata.input_size)
    }

    fn class_names(&self) -> Option<&[String]> {
        Some(&self.metadata.class_names)
    }
}

/// Burnモデルを読み込むローダー
#[derive(Debug, Clone, Copy, Default)]
pub struct BurnModelLoader {
    device: DeviceType,
}

impl BurnModelLoader {
    pub fn new(device: DeviceType) -> Self {
        Self { device }
    }
}

impl ModelLoader for BurnModelLoader {
    fn load(&self, path: &Path) -> Result<ModelHandle> {
        match self.device {
            DeviceType::Cpu => {
                let engine = InferenceEngine::<NdArray<f32>>::load(path, Default::default())?;
                Ok(Arc::new(engine))
            }
            #[cfg(feature = "gpu")]
            DeviceType::Wgpu => {
                let engine = InferenceEngine::<Wgpu>::load(path, WgpuDevice::default())?;
                Ok(Arc::new(engine))
            }
            #[cfg(not(feature = "gpu"))]
            DeviceType::Wgpu => Err(InspectionError::Config(
                "device 'wgpu' requires building with the `gpu` feature".to_string(),
            )),
        }
    }
}

/// 学習済みモデルをメタデータと共にバンドルとして保存
pub fn save_bundle<B: Backend>(model: SolderNet<B>, metadata: &ModelMetadata, output_path: &Path) -> Result<()> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary: Vec<u8> = recorder
        .record(model.into_record(), ())
        .map_err(|e| InspectionError::load(output_path, format!("モデル重みの書き出しエラー: {:?}", e)))?;

    save_model_with_metadata(output_path, metadata, &model_binary)
}
