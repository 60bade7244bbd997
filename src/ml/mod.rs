pub mod classifier;
pub mod decision;
pub mod preprocess;
#[cfg(feature = "ml")]
pub mod ml_model;
#[cfg(feature = "ml")]
pub mod inference;

pub use classifier::{BinaryClassifier, ModelHandle, ModelLoader};
pub use decision::{decide, infer, InferenceResult};
pub use preprocess::{decode_image, load_image, preprocess, ImageTensor};
#[cfg(feature = "ml")]
pub use ml_model::{ModelConfig, SolderNet};
#[cfg(feature = "ml")]
pub use inference::{save_bundle, BurnModelLoader, InferenceEngine};
