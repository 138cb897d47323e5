pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{CropNet, ModelConfig};
pub use training::{train_model, CropBatcher, CropDataset, CropItem, TrainingReport};
pub use inference::InferenceEngine;
