//! 推論コアのエラー定義
//!
//! 起動時のアーティファクト読み込みエラーと、リクエスト単位の入力エラーの2種類のみ。

use std::path::PathBuf;

use thiserror::Error;

/// 分類器またはラベルエンコーダを読み込めなかった場合のエラー（起動時に致命的）
#[derive(Error, Debug)]
pub enum StartupArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read artifact '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Artifact '{path}' is incompatible with this build: {reason}")]
    Incompatible { path: PathBuf, reason: String },

    #[error("Classifier predicts {classifier} classes but the label encoder knows {encoder}")]
    ClassCountMismatch { classifier: usize, encoder: usize },

    #[error("Invalid label encoder: {0}")]
    InvalidLabelEncoder(String),
}

/// 入力が分類器の期待する形と一致しない場合のエラー（そのリクエストのみ失敗）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceInputError {
    #[error("Expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("{feature} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        feature: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{feature} is not a finite number")]
    NonFinite { feature: &'static str },

    #[error("{feature} = {value} must be a whole number")]
    NotAnInteger { feature: &'static str, value: f64 },

    #[error("Classifier returned {actual} probabilities, expected {expected}")]
    OutputShape { expected: usize, actual: usize },

    #[error("Class index {0} is not known to the label encoder")]
    UnknownClass(usize),

    #[error("Failed to read inference output: {0}")]
    Backend(String),
}
