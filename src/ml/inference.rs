//! モデル推論機能

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use std::path::Path;

use crate::error::{InferenceInputError, StartupArtifactError};
use crate::ml::{CropNet, ModelConfig};
use crate::model::{load_model_with_metadata, log_metadata_info, InferenceConfig};
use crate::pipeline::Classifier;

/// burn の復元処理は不正なバイト列に対してパニックするので、パニックを非互換エラーに変換する
fn catch_incompatible<T>(
    path: &Path,
    stage: &str,
    f: impl FnOnce() -> T,
) -> Result<T, StartupArtifactError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        StartupArtifactError::Incompatible {
            path: path.to_path_buf(),
            reason: format!("{}: {}", stage, message),
        }
    })
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: CropNet<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// 分類器バンドルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: &B::Device) -> Result<Self, StartupArtifactError> {
        let path = model_path.as_ref();

        let (metadata, model_binary) = load_model_with_metadata(path)?;
        let config = InferenceConfig::from_metadata(&metadata, path)?;

        // 推論時はドロップアウトなし
        let model = ModelConfig::new(config.num_features(), config.num_classes)
            .with_hidden_size(config.hidden_size)
            .with_dropout(0.0)
            .init::<B>(device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record: <CropNet<B> as Module<B>>::Record =
            catch_incompatible(path, "weights", || recorder.load(model_binary, device))?
            .map_err(|e| StartupArtifactError::Incompatible {
                path: path.to_path_buf(),
                reason: format!("{:?}", e),
            })?;
        let model = catch_incompatible(path, "weights", || model.load_record(record))?;

        // 層の形状がメタデータと食い違う重みはゼロ入力の順伝播で検出
        let zeros = Tensor::<B, 2>::zeros([1, config.num_features()], device);
        let dims = catch_incompatible(path, "forward", || model.forward(zeros).dims())?;
        if dims != [1, config.num_classes] {
            return Err(StartupArtifactError::Incompatible {
                path: path.to_path_buf(),
                reason: format!("output shape {:?}, expected [1, {}]", dims, config.num_classes),
            });
        }

        log_metadata_info(&metadata);
        tracing::info!(
            path = %path.display(),
            classes = config.num_classes,
            "分類器を読み込みました"
        );

        Ok(Self {
            model,
            config,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// 標準化して [1, num_features] のテンソルにする
    fn input_tensor(&self, features: &[f32]) -> Result<Tensor<B, 2>, InferenceInputError> {
        let normalized = self.config.normalize(features)?;
        Ok(Tensor::<B, 1>::from_floats(normalized.as_slice(), &self.device)
            .reshape([1, normalized.len()]))
    }
}

impl<B: Backend> Classifier for InferenceEngine<B> {
    fn num_features(&self) -> usize {
        self.config.num_features()
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn predict(&self, features: &[f32]) -> Result<usize, InferenceInputError> {
        let (predicted, _) = self.model.predict(self.input_tensor(features)?);

        let class_idx = predicted
            .into_data()
            .iter::<i64>()
            .next()
            .ok_or_else(|| InferenceInputError::Backend("empty prediction".to_string()))?;

        usize::try_from(class_idx).map_err(|_| {
            InferenceInputError::Backend(format!("negative class index {}", class_idx))
        })
    }

    fn predict_probabilities(&self, features: &[f32]) -> Result<Vec<f32>, InferenceInputError> {
        let probabilities: Vec<f32> = self
            .model
            .forward_softmax(self.input_tensor(features)?)
            .into_data()
            .iter::<f32>()
            .collect();

        if probabilities.len() != self.config.num_classes {
            return Err(InferenceInputError::OutputShape {
                expected: self.config.num_classes,
                actual: probabilities.len(),
            });
        }

        Ok(probabilities)
    }
}
