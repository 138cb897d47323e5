//! 起動時のアーティファクト読み込み
//!
//! 分類器バンドルとラベルエンコーダを読み込み、クラス数を照合してパイプラインを組み立てる。
//! ここで失敗した場合は予測を提供できないため、呼び出し側で起動を中止する。

use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};
use std::path::Path;

use crate::error::StartupArtifactError;
use crate::ml::InferenceEngine;
use crate::model::config::{AppConfig, DeviceType};
use crate::model::load_label_encoder;
use crate::pipeline::{Classifier, PredictionPipeline};
use crate::types::{FEATURE_RANGES, NUM_FEATURES};

pub type BoxedClassifier = Box<dyn Classifier + Send>;
pub type CropPipeline = PredictionPipeline<BoxedClassifier>;

/// 入力スライダーと同じ列名・順序で学習されたか確認して箱に詰める
fn checked_engine<B>(engine: InferenceEngine<B>, model_path: &Path) -> Result<BoxedClassifier, StartupArtifactError>
where
    B: Backend,
    InferenceEngine<B>: Send + 'static,
{
    let expected: Vec<&str> = FEATURE_RANGES.iter().map(|r| r.key).collect();
    engine.config().check_feature_names(&expected, model_path)?;
    Ok(Box::new(engine))
}

/// 設定されたデバイスで分類器を読み込む
pub fn load_classifier(
    device_type: DeviceType,
    model_path: &Path,
) -> Result<BoxedClassifier, StartupArtifactError> {
    match device_type {
        DeviceType::Cpu => checked_engine(
            InferenceEngine::<NdArray>::load(model_path, &NdArrayDevice::Cpu)?,
            model_path,
        ),
        DeviceType::Wgpu => checked_engine(
            InferenceEngine::<Wgpu>::load(model_path, &WgpuDevice::default())?,
            model_path,
        ),
    }
}

/// 分類器とラベルエンコーダを読み込んでパイプラインを作成
pub fn load_pipeline(config: &AppConfig) -> Result<CropPipeline, StartupArtifactError> {
    let model_path = config.artifacts.model_path();
    let classifier = load_classifier(config.device_type, &model_path)?;
    if classifier.num_features() != NUM_FEATURES {
        return Err(StartupArtifactError::Incompatible {
            path: model_path,
            reason: format!(
                "classifier expects {} features, inputs have {}",
                classifier.num_features(),
                NUM_FEATURES
            ),
        });
    }

    let encoder = load_label_encoder(&config.artifacts.label_encoder_path())?;

    tracing::info!(
        classes = encoder.len(),
        device = %config.device_type,
        "ラベルエンコーダを読み込みました"
    );

    PredictionPipeline::new(classifier, encoder, config.ranking)
}
