//! 検査パイプライン
//!
//! 設定 → モデル解決 → キャッシュからの取得 → 前処理 → 推論・判定 を
//! この順序で1リクエストずつ実行します。キャッシュは外から渡すので、
//! 複数のパイプライン（利用者）で共有することも、テストごとに作り直すこともできます。

use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ml::{infer, preprocess, InferenceResult, ModelHandle, ModelLoader};
use crate::model::{InspectionConfig, ModelCache, ModelFetcher, ModelResolver};

pub struct InspectionPipeline<F: ModelFetcher, L: ModelLoader> {
    config: InspectionConfig,
    resolver: ModelResolver<F>,
    cache: Arc<ModelCache<L>>,
}

impl<F: ModelFetcher, L: ModelLoader> InspectionPipeline<F, L> {
    /// 設定を検証してパイプラインを作る
    pub fn new(config: InspectionConfig, resolver: ModelResolver<F>, cache: Arc<ModelCache<L>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            resolver,
            cache,
        })
    }

    pub fn config(&self) -> &InspectionConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ModelResolver<F> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<ModelCache<L>> {
        &self.cache
    }

    /// モデルを解決して読み込み済みハンドルを返す
    ///
    /// モデルが無く取得元も無い場合は `ModelUnavailable`。
    pub fn prepare(&self) -> Result<ModelHandle> {
        let config = &self.config;
        let resolved = self
            .resolver
            .resolve(&config.model_path, config.model_url.as_deref())?
            .into_path(&config.model_path)?;

        let handle = self.cache.get_model(&resolved)?;
        if let Some(size) = handle.expected_input_size() {
            if size != config.img_size {
                warn!(
                    "Model was trained at {}x{} but img_size is {}",
                    size, size, config.img_size
                );
            }
        }
        if let Some(names) = handle.class_names() {
            if names != config.class_names.as_slice() {
                warn!(
                    "Model was trained with class_names {:?} but config has {:?}",
                    names, config.class_names
                );
            }
        }
        Ok(handle)
    }

    /// 1枚の画像を検査する
    pub fn inspect(&self, image: &DynamicImage) -> Result<InferenceResult> {
        let handle = self.prepare()?;
        debug!("Inspecting {}x{} image", image.width(), image.height());

        let tensor = preprocess(image, self.config.img_size)?;
        infer(
            handle.as_ref(),
            &tensor,
            self.config.decision_threshold,
            &self.config.class_names,
        )
    }
}

#[cfg(feature = "ml")]
impl InspectionPipeline<crate::model::HttpFetcher, crate::ml::BurnModelLoader> {
    /// HTTP取得とBurnモデルを使う標準構成
    pub fn from_config(config: InspectionConfig) -> Result<Self> {
        let loader = crate::ml::BurnModelLoader::new(config.device);
        let cache = Arc::new(ModelCache::new(loader));
        Self::new(config, ModelResolver::http()?, cache)
    }
}
