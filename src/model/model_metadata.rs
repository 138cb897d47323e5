//! 分類器メタデータの定義
//!
//! tar.gz形式の分類器バンドルに `metadata.json` として格納されます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 分類器メタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: ネットワークの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 入力特徴量の名前（学習CSVの列名、入力順）
    /// 例: ["N", "P", "K", "temperature", "humidity", "ph", "rainfall"]
    pub feature_names: Vec<String>,

    /// 標準化に使う特徴量ごとの平均（学習データから算出）
    pub feature_means: Vec<f32>,

    /// 標準化に使う特徴量ごとの標準偏差（学習データから算出）
    pub feature_stds: Vec<f32>,

    /// 出力クラス数（ラベルエンコーダのクラス数と一致する必要がある）
    pub num_classes: usize,

    /// 隠れ層の幅
    pub hidden_size: usize,

    /// 学習エポック数
    pub num_epochs: u32,

    /// 検証データでの正解率（0.0-1.0）
    #[serde(default)]
    pub validation_accuracy: Option<f32>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        feature_names: Vec<String>,
        feature_means: Vec<f32>,
        feature_stds: Vec<f32>,
        num_classes: usize,
        hidden_size: usize,
        num_epochs: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            feature_names,
            feature_means,
            feature_stds,
            num_classes,
            hidden_size,
            num_epochs,
            validation_accuracy: None,
            trained_at,
        }
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
