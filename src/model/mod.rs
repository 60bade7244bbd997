pub mod cache;
pub mod config;
pub mod model_metadata;
pub mod model_storage;
pub mod resolver;

pub use cache::ModelCache;
pub use config::{DeviceType, InspectionConfig};
pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_binary, load_model_with_metadata, print_metadata_info};
pub use resolver::{HttpFetcher, ModelFetcher, ModelResolver, Resolution};
