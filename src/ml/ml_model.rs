//! 機械学習モデルの共通定義
//!
//! 作物推薦用の全結合ネットワークと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        loss::CrossEntropyLossConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 入力特徴量の数
    pub num_features: usize,
    /// 分類クラス数
    pub num_classes: usize,
    /// 隠れ層の幅
    #[config(default = 64)]
    pub hidden_size: usize,
    /// ドロップアウト率
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> CropNet<B> {
        tracing::debug!(
            "[Model] {} -> {} -> {} -> {}",
            self.num_features,
            self.hidden_size,
            self.hidden_size,
            self.num_classes
        );

        CropNet {
            fc1: LinearConfig::new(self.num_features, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            fc3: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        }
    }
}

/// 作物分類用の全結合ネットワーク
///
/// # アーキテクチャ
/// - FC: num_features -> hidden + ReLU + Dropout
/// - FC: hidden -> hidden + ReLU + Dropout
/// - FC: hidden -> num_classes
/// - Softmax (確率出力時)
///
/// 入力は標準化済みの特徴量 [batch_size, num_features]。
#[derive(Module, Debug)]
pub struct CropNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> CropNet<B> {
    /// 順伝播
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(features);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        let x = self.fc2.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc3.forward(x)
    }

    /// 順伝播 + Softmax
    pub fn forward_softmax(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(features), 1)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID [batch_size, 1], ロジット)
    pub fn predict(&self, features: Tensor<B, 2>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let output = self.forward(features);
        let predictions = output.clone().argmax(1);
        (predictions, output)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        features: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_output_shape_and_softmax() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(7, 22).init::<NdArray>(&device);

        let input = Tensor::<NdArray, 2>::zeros([3, 7], &device);
        let probs = model.forward_softmax(input.clone());
        assert_eq!(probs.dims(), [3, 22]);

        let sums: Vec<f32> = probs.sum_dim(1).into_data().iter::<f32>().collect();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4);
        }

        let (predicted, logits) = model.predict(input);
        assert_eq!(predicted.dims(), [3, 1]);
        assert_eq!(logits.dims(), [3, 22]);
    }
}
