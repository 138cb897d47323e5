//! モデルメタデータから推論用の前処理設定を組み立てる
//!
//! 入力値はメタデータに記録された平均・標準偏差で標準化してからネットワークに渡す。

use std::path::Path;

use crate::error::{InferenceInputError, StartupArtifactError};
use crate::model::model_metadata::ModelMetadata;

/// 推論設定（特徴量の標準化とクラス数）
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// 入力特徴量の名前
    pub feature_names: Vec<String>,

    /// 標準化パラメータ
    pub feature_means: Vec<f32>,
    pub feature_stds: Vec<f32>,

    /// 出力クラス数
    pub num_classes: usize,

    /// 隠れ層の幅
    pub hidden_size: usize,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成（形の不整合はエラー）
    pub fn from_metadata(
        metadata: &ModelMetadata,
        source: &Path,
    ) -> Result<Self, StartupArtifactError> {
        let corrupt = |reason: String| StartupArtifactError::Corrupt {
            path: source.to_path_buf(),
            reason,
        };

        let n = metadata.feature_names.len();
        if n == 0 {
            return Err(corrupt("metadata lists no features".to_string()));
        }
        if metadata.feature_means.len() != n || metadata.feature_stds.len() != n {
            return Err(corrupt(format!(
                "{} feature names but {} means and {} standard deviations",
                n,
                metadata.feature_means.len(),
                metadata.feature_stds.len()
            )));
        }
        if let Some(i) = metadata
            .feature_stds
            .iter()
            .position(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err(corrupt(format!(
                "standard deviation of '{}' is {}",
                metadata.feature_names[i], metadata.feature_stds[i]
            )));
        }
        if metadata.feature_means.iter().any(|m| !m.is_finite()) {
            return Err(corrupt("feature means contain a non-finite value".to_string()));
        }
        if metadata.num_classes == 0 || metadata.hidden_size == 0 {
            return Err(corrupt(format!(
                "invalid network shape: {} classes, hidden width {}",
                metadata.num_classes, metadata.hidden_size
            )));
        }

        Ok(Self {
            feature_names: metadata.feature_names.clone(),
            feature_means: metadata.feature_means.clone(),
            feature_stds: metadata.feature_stds.clone(),
            num_classes: metadata.num_classes,
            hidden_size: metadata.hidden_size,
        })
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// 生の特徴量を標準化
    pub fn normalize(&self, features: &[f32]) -> Result<Vec<f32>, InferenceInputError> {
        if features.len() != self.num_features() {
            return Err(InferenceInputError::FeatureCount {
                expected: self.num_features(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(self.feature_means.iter().zip(&self.feature_stds))
            .map(|(x, (mean, std))| (x - mean) / std)
            .collect())
    }

    /// 特徴量の列名と順序が期待どおりか確認（異なる場合は非互換）
    pub fn check_feature_names(
        &self,
        expected: &[&str],
        source: &Path,
    ) -> Result<(), StartupArtifactError> {
        if self.feature_names.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(StartupArtifactError::Incompatible {
                path: source.to_path_buf(),
                reason: format!(
                    "trained on features {:?}, expected {:?}",
                    self.feature_names, expected
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(
            vec!["a".into(), "b".into()],
            vec![10.0, 0.0],
            vec![2.0, 0.5],
            3,
            8,
            1,
        )
    }

    #[test]
    fn test_normalize() {
        let config = InferenceConfig::from_metadata(&metadata(), Path::new("m")).unwrap();
        assert_eq!(config.normalize(&[12.0, 1.0]).unwrap(), vec![1.0, 2.0]);
        assert_eq!(
            config.normalize(&[1.0]).unwrap_err(),
            InferenceInputError::FeatureCount { expected: 2, actual: 1 }
        );
    }

    #[test]
    fn test_rejects_inconsistent_metadata() {
        let mut m = metadata();
        m.feature_stds = vec![1.0];
        assert!(matches!(
            InferenceConfig::from_metadata(&m, Path::new("m")),
            Err(StartupArtifactError::Corrupt { .. })
        ));

        let mut m = metadata();
        m.feature_stds = vec![1.0, 0.0];
        assert!(InferenceConfig::from_metadata(&m, Path::new("m")).is_err());

        let mut m = metadata();
        m.num_classes = 0;
        assert!(InferenceConfig::from_metadata(&m, Path::new("m")).is_err());
    }

    #[test]
    fn test_check_feature_names() {
        let config = InferenceConfig::from_metadata(&metadata(), Path::new("m")).unwrap();
        assert!(config.check_feature_names(&["a", "b"], Path::new("m")).is_ok());
        assert!(matches!(
            config.check_feature_names(&["b", "a"], Path::new("m")),
            Err(StartupArtifactError::Incompatible { .. })
        ));
        assert!(config.check_feature_names(&["a", "b", "c"], Path::new("m")).is_err());
    }
}
