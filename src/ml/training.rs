//! モデル学習
//!
//! 学習用CSVから分類器とラベルエンコーダを作成して、起動時に読み込む2つのアーティファクトとして保存します。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};

use crate::csv_loader::{load_csv, LabeledSample};
use crate::ml::{CropNet, ModelConfig};
use crate::model::config::{AppConfig, DeviceType, TrainingSettings};
use crate::model::{save_artifacts, LabelEncoder, ModelMetadata};
use crate::types::{FEATURE_RANGES, NUM_FEATURES};

/// データセットアイテム
#[derive(Clone, Debug)]
pub struct CropItem {
    pub features: [f32; NUM_FEATURES],
    pub label: usize,
}

/// 学習データセット
pub struct CropDataset {
    items: Vec<CropItem>,
}

impl CropDataset {
    /// ラベルをエンコーダでインデックスに変換して作成
    pub fn from_samples(samples: &[LabeledSample], encoder: &LabelEncoder) -> Result<Self> {
        let items = samples
            .iter()
            .map(|s| {
                encoder
                    .encode(s.label.trim())
                    .map(|label| CropItem {
                        features: s.features,
                        label,
                    })
                    .ok_or_else(|| anyhow::anyhow!("Unknown label '{}'", s.label))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { items })
    }

    /// データセットを学習用と検証用に分割（シード固定のシャッフル後）
    ///
    /// どちらも最低1件になるように調整する。
    pub fn split(self, train_ratio: f32, seed: u64) -> Result<(Self, Self)> {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let total_len = self.items.len();
        if total_len < 2 {
            anyhow::bail!("At least 2 samples are required, got {}", total_len);
        }

        let mut items = self.items;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);

        let train_len = ((total_len as f32 * train_ratio) as usize).clamp(1, total_len - 1);
        let val_items = items.split_off(train_len);

        Ok((Self { items }, Self { items: val_items }))
    }

    pub fn items(&self) -> &[CropItem] {
        &self.items
    }
}

impl Dataset<CropItem> for CropDataset {
    fn get(&self, index: usize) -> Option<CropItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// 特徴量ごとの平均と標準偏差（母標準偏差、0の場合は1.0）
pub fn feature_statistics(items: &[CropItem]) -> (Vec<f32>, Vec<f32>) {
    let n = items.len().max(1) as f64;
    let mut means = vec![0f64; NUM_FEATURES];
    for item in items {
        for (m, x) in means.iter_mut().zip(item.features) {
            *m += x as f64;
        }
    }
    means.iter_mut().for_each(|m| *m /= n);

    let mut vars = vec![0f64; NUM_FEATURES];
    for item in items {
        for ((v, m), x) in vars.iter_mut().zip(&means).zip(item.features) {
            *v += (x as f64 - m).powi(2);
        }
    }

    let stds = vars
        .iter()
        .map(|v| {
            let s = (v / n).sqrt();
            if s > f64::EPSILON {
                s as f32
            } else {
                1.0
            }
        })
        .collect();

    (means.into_iter().map(|m| m as f32).collect(), stds)
}

/// バッチャー（標準化してテンソルに変換）
#[derive(Clone)]
pub struct CropBatcher<B: Backend> {
    device: B::Device,
    means: Vec<f32>,
    stds: Vec<f32>,
}

impl<B: Backend> CropBatcher<B> {
    pub fn new(device: B::Device, means: Vec<f32>, stds: Vec<f32>) -> Self {
        Self { device, means, stds }
    }
}

impl<B: Backend> Batcher<B, CropItem, CropBatch<B>> for CropBatcher<B> {
    fn batch(&self, items: Vec<CropItem>, _device: &B::Device) -> CropBatch<B> {
        let batch_size = items.len();
        let mut values = Vec::with_capacity(batch_size * NUM_FEATURES);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            for ((x, mean), std) in item.features.iter().zip(&self.means).zip(&self.stds) {
                values.push((x - mean) / std);
            }
            targets_vec.push(item.label as i64);
        }

        let features = Tensor::<B, 1>::from_floats(values.as_slice(), &self.device)
            .reshape([batch_size, NUM_FEATURES]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        CropBatch { features, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct CropBatch<B: Backend> {
    pub features: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<CropBatch<B>, ClassificationOutput<B>> for CropNet<B> {
    fn step(&self, batch: CropBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.features, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<CropBatch<B>, ClassificationOutput<B>> for CropNet<B> {
    fn step(&self, batch: CropBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.features, batch.targets)
    }
}

/// 検証データでの正解率
pub fn evaluate_accuracy<B: Backend>(
    model: &CropNet<B>,
    dataset: &CropDataset,
    batcher: &CropBatcher<B>,
) -> f32 {
    if dataset.items().is_empty() {
        return 0.0;
    }

    let batch = batcher.batch(dataset.items().to_vec(), &batcher.device);
    let (predicted, _) = model.predict(batch.features);

    let predicted: Vec<i64> = predicted.into_data().iter::<i64>().collect();
    let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
    let correct = predicted
        .iter()
        .zip(&targets)
        .filter(|(p, t)| p == t)
        .count();

    correct as f32 / targets.len() as f32
}

/// 学習結果
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainingReport {
    pub num_samples: usize,
    pub num_train: usize,
    pub num_valid: usize,
    pub classes: Vec<String>,
    pub validation_accuracy: f32,
    pub model_path: PathBuf,
    pub label_encoder_path: PathBuf,
}

/// 学習済みの重みと正解率
struct FitOutput {
    model_binary: Vec<u8>,
    accuracy: f32,
}

/// 指定バックエンドで学習
fn fit<B: AutodiffBackend>(
    device: B::Device,
    dataset_train: CropDataset,
    dataset_val: CropDataset,
    means: Vec<f32>,
    stds: Vec<f32>,
    model_config: &ModelConfig,
    settings: &TrainingSettings,
    log_callback: &dyn Fn(String),
) -> Result<FitOutput> {
    use burn::{
        data::dataloader::DataLoaderBuilder,
        optim::AdamConfig,
        train::{
            metric::{AccuracyMetric, LossMetric},
            LearnerBuilder, LearningStrategy,
        },
    };

    let batcher_train = CropBatcher::<B>::new(device.clone(), means.clone(), stds.clone());
    let batcher_val = CropBatcher::<B::InnerBackend>::new(device.clone(), means, stds);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers)
        .build(dataset_train);

    // 正解率の計算用に検証データを残しておく
    let val_items = dataset_val.items().to_vec();
    let dataloader_val = DataLoaderBuilder::new(batcher_val.clone())
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(dataset_val);

    let model = model_config.init::<B>(&device);

    // アーティファクトディレクトリ（学習ログ用の一時領域）
    let artifact_dir = std::env::temp_dir().join("crop_advisor_training");
    std::fs::remove_dir_all(&artifact_dir).ok();
    std::fs::create_dir_all(&artifact_dir)?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    log_callback(format!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    ));

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_val);
    let trained_model = model_trained.model;

    log_callback(format!(
        "学習完了（パラメータ数: {}）",
        trained_model.num_params()
    ));

    let accuracy = evaluate_accuracy(
        &trained_model,
        &CropDataset { items: val_items },
        &batcher_val,
    );

    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(trained_model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    std::fs::remove_dir_all(&artifact_dir).ok();

    Ok(FitOutput {
        model_binary,
        accuracy,
    })
}

/// モデル学習を実行し、分類器とラベルエンコーダを設定のパスに保存
pub fn train_model(
    dataset_path: &Path,
    config: &AppConfig,
    log_callback: impl Fn(String),
) -> Result<TrainingReport> {
    let log = |line: String| {
        tracing::info!("{}", line);
        log_callback(line);
    };

    let samples = load_csv(dataset_path)?;
    let encoder = LabelEncoder::fit(samples.iter().map(|s| s.label.as_str()))
        .context("Failed to build label encoder from dataset")?;

    log(format!(
        "{} 行を読み込みました（{} クラス）: {}",
        samples.len(),
        encoder.len(),
        encoder.classes().join(", ")
    ));

    let dataset = CropDataset::from_samples(&samples, &encoder)?;
    let num_samples = dataset.len();
    let (dataset_train, dataset_val) =
        dataset.split(config.training.train_ratio, config.training.seed)?;
    let (num_train, num_valid) = (dataset_train.len(), dataset_val.len());

    log(format!("学習データ: {} 件", num_train));
    log(format!("検証データ: {} 件", num_valid));

    // 標準化パラメータは学習データのみから算出
    let (means, stds) = feature_statistics(dataset_train.items());

    let model_config = ModelConfig::new(NUM_FEATURES, encoder.len())
        .with_hidden_size(config.model.hidden_size)
        .with_dropout(config.model.dropout);

    log(format!(
        "モデル設定: {} クラス, 隠れ層: {}, dropout={}",
        model_config.num_classes, model_config.hidden_size, model_config.dropout
    ));
    log(format!("使用デバイス: {}", config.device_type));

    let output = match config.device_type {
        DeviceType::Cpu => fit::<burn::backend::Autodiff<NdArray>>(
            NdArrayDevice::Cpu,
            dataset_train,
            dataset_val,
            means.clone(),
            stds.clone(),
            &model_config,
            &config.training,
            &log,
        )?,
        DeviceType::Wgpu => fit::<burn::backend::Autodiff<Wgpu>>(
            WgpuDevice::default(),
            dataset_train,
            dataset_val,
            means.clone(),
            stds.clone(),
            &model_config,
            &config.training,
            &log,
        )?,
    };

    log(format!(
        "検証データでの正解率: {:.2}%",
        output.accuracy * 100.0
    ));

    let mut metadata = ModelMetadata::new(
        FEATURE_RANGES.iter().map(|r| r.key.to_string()).collect(),
        means,
        stds,
        encoder.len(),
        config.model.hidden_size,
        config.training.num_epochs as u32,
    );
    metadata.validation_accuracy = Some(output.accuracy);

    let label_encoder_path = config.artifacts.label_encoder_path();
    let model_path = save_artifacts(
        &config.artifacts.model_path(),
        &metadata,
        &output.model_binary,
        &label_encoder_path,
        &encoder,
    )?;

    log(format!(
        "保存しました: {} / {}",
        model_path.display(),
        label_encoder_path.display()
    ));

    Ok(TrainingReport {
        num_samples,
        num_train,
        num_valid,
        classes: encoder.classes().to_vec(),
        validation_accuracy: output.accuracy,
        model_path,
        label_encoder_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<CropItem> {
        (0..n)
            .map(|i| CropItem {
                features: [i as f32, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                label: i % 2,
            })
            .collect()
    }

    #[test]
    fn test_split_sizes_and_determinism() {
        let (train, val) = CropDataset { items: items(10) }.split(0.8, 42).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);

        let (train2, _) = CropDataset { items: items(10) }.split(0.8, 42).unwrap();
        let a: Vec<f32> = train.items().iter().map(|i| i.features[0]).collect();
        let b: Vec<f32> = train2.items().iter().map(|i| i.features[0]).collect();
        assert_eq!(a, b);

        // 極端な比率でも両方に1件以上
        let (train, val) = CropDataset { items: items(3) }.split(1.0, 1).unwrap();
        assert_eq!((train.len(), val.len()), (2, 1));
        assert!(CropDataset { items: items(1) }.split(0.8, 1).is_err());
    }

    #[test]
    fn test_feature_statistics() {
        let (means, stds) = feature_statistics(&items(4));
        assert!((means[0] - 1.5).abs() < 1e-6);
        assert!((stds[0] - 1.25f32.sqrt()).abs() < 1e-6);
        // 定数列は1.0
        assert_eq!(means[1], 2.0);
        assert_eq!(stds[1], 1.0);
        assert_eq!(stds[2], 1.0);
    }

    #[test]
    fn test_from_samples_encodes_labels() {
        let samples = vec![
            LabeledSample { features: [0.0; NUM_FEATURES], label: "rice".into() },
            LabeledSample { features: [1.0; NUM_FEATURES], label: "apple".into() },
        ];
        let encoder = LabelEncoder::fit(["rice", "apple"]).unwrap();
        let dataset = CropDataset::from_samples(&samples, &encoder).unwrap();
        assert_eq!(dataset.items()[0].label, 1);
        assert_eq!(dataset.items()[1].label, 0);

        let other = LabelEncoder::fit(["mango"]).unwrap();
        assert!(CropDataset::from_samples(&samples, &other).is_err());
    }

    #[test]
    fn test_batcher_standardizes() {
        let device = NdArrayDevice::Cpu;
        let batcher = CropBatcher::<NdArray>::new(device, vec![1.0; NUM_FEATURES], vec![2.0; NUM_FEATURES]);
        let batch = batcher.batch(items(2), &device);
        assert_eq!(batch.features.dims(), [2, NUM_FEATURES]);

        let values: Vec<f32> = batch.features.into_data().iter::<f32>().collect();
        assert_eq!(values[0], -0.5);
        assert_eq!(values[NUM_FEATURES], 0.0);
        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![0, 1]);
    }

    #[test]
    fn test_evaluate_accuracy_range() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(NUM_FEATURES, 2).init::<NdArray>(&device);
        let batcher = CropBatcher::<NdArray>::new(device, vec![0.0; NUM_FEATURES], vec![1.0; NUM_FEATURES]);
        let accuracy = evaluate_accuracy(&model, &CropDataset { items: items(6) }, &batcher);
        assert!((0.0..=1.0).contains(&accuracy));
    }
}
