//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、アーティファクトのパス、ランキング表示、学習設定などをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::RankingOptions;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 起動時に読み込む2つのアーティファクト
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// 分類器バンドル（tar.gz）
    pub model_path: String,
    /// ラベルエンコーダ（JSON）
    pub label_encoder_path: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            model_path: "models/crop_model.tar.gz".to_string(),
            label_encoder_path: "models/label_encoder.json".to_string(),
        }
    }
}

impl ArtifactSettings {
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(&self.model_path)
    }

    pub fn label_encoder_path(&self) -> PathBuf {
        PathBuf::from(&self.label_encoder_path)
    }
}

/// ネットワーク設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 隠れ層の幅
    pub hidden_size: usize,
    /// ドロップアウト率（学習時のみ）
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            dropout: 0.1,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// トレーニングデータの割合
    pub train_ratio: f32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 60,
            batch_size: 32,
            num_workers: 1,
            learning_rate: 1e-2,
            seed: 42,
            train_ratio: 0.8,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// アーティファクトのパス
    #[serde(default)]
    pub artifacts: ArtifactSettings,
    /// ランキング表示設定
    #[serde(default)]
    pub ranking: RankingOptions,
    /// ネットワーク設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// ログレベル（trace / debug / info / warn / error）
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 最後に学習に使用したデータセットのパス
    #[serde(default)]
    pub last_dataset_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            artifacts: ArtifactSettings::default(),
            ranking: RankingOptions::default(),
            model: ModelSettings::default(),
            training: TrainingSettings::default(),
            log_level: default_log_level(),
            last_dataset_path: None,
        }
    }
}

/// 設定をどこから得たか
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Invalid { path: PathBuf, error: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => {
                tracing::info!("設定ファイルを読み込みました: {}", path.display());
            }
            ConfigSource::Missing(path) => {
                tracing::info!(
                    "設定ファイルが存在しません ({})。デフォルト設定を使用します",
                    path.display()
                );
            }
            ConfigSource::Invalid { path, error } => {
                tracing::warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    error
                );
            }
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    ///
    /// ログの初期化前に呼ばれるので、結果は `ConfigSource` として返し呼び出し側で出力する
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return (Self::default(), ConfigSource::Missing(path));
        }
        match Self::load(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(e) => (
                Self::default(),
                ConfigSource::Invalid {
                    path,
                    error: format!("{:#}", e),
                },
            ),
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> (Self, ConfigSource) {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// デフォルトパスに設定を保存する
    pub fn save_default(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        self.save(&path)?;
        tracing::info!("設定ファイルを保存しました: {}", path.display());
        Ok(())
    }

    /// 最後に使用したデータセットのパスを更新
    pub fn update_last_dataset_path<P: AsRef<Path>>(&mut self, path: P) {
        self.last_dataset_path = Some(path.as_ref().to_string_lossy().to_string());
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        tracing::info!(
            device = %self.device_type,
            model = %self.artifacts.model_path,
            label_encoder = %self.artifacts.label_encoder_path,
            drop_zero_confidence = self.ranking.drop_zero_confidence,
            top_n = self.ranking.top_n,
            "アプリケーション設定"
        );
    }
}
