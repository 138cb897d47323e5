//! 予測パイプライン
//!
//! 特徴ベクトル → 分類器（単一ラベル予測 + 確率分布） → ラベル復号 → 信頼度順のランキング。

use serde::{Deserialize, Serialize};

use crate::error::{InferenceInputError, StartupArtifactError};
use crate::model::LabelEncoder;
use crate::types::FeatureVector;

/// 学習済み分類器
///
/// 入力は標準化前の生の特徴量。
pub trait Classifier {
    /// 期待する入力特徴量の数
    fn num_features(&self) -> usize;

    /// 出力クラス数
    fn num_classes(&self) -> usize;

    /// 最も確からしいクラスのインデックス
    fn predict(&self, features: &[f32]) -> Result<usize, InferenceInputError>;

    /// 全クラスの確率分布（合計1.0）
    fn predict_probabilities(&self, features: &[f32]) -> Result<Vec<f32>, InferenceInputError>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn num_features(&self) -> usize {
        (**self).num_features()
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn predict(&self, features: &[f32]) -> Result<usize, InferenceInputError> {
        (**self).predict(features)
    }

    fn predict_probabilities(&self, features: &[f32]) -> Result<Vec<f32>, InferenceInputError> {
        (**self).predict_probabilities(features)
    }
}

/// ランキングの表示設定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingOptions {
    /// 信頼度 0.00% の作物を除外するか
    pub drop_zero_confidence: bool,
    /// 上位表示の件数
    pub top_n: usize,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            drop_zero_confidence: false,
            top_n: 3,
        }
    }
}

/// 作物1件分の信頼度
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropConfidence {
    pub crop: String,
    /// パーセント（小数点以下2桁に丸め）
    pub confidence: f64,
}

/// 信頼度の降順に並んだ予測結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPrediction {
    /// 分類器の単一ラベル予測を復号した作物名（先頭要素と一致する）
    pub recommended: String,
    pub entries: Vec<CropConfidence>,
    /// フィルタ前の信頼度の合計（≒100）
    pub total_confidence: f64,
}

impl RankedPrediction {
    /// 推奨作物（先頭要素）
    pub fn head(&self) -> Option<&CropConfidence> {
        self.entries.first()
    }

    /// 上位n件
    pub fn top(&self, n: usize) -> &[CropConfidence] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 信頼度が非増加で並んでいるか
    pub fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence)
    }
}

fn to_percent(probability: f32) -> f64 {
    (probability as f64 * 100.0 * 100.0).round() / 100.0
}

/// 確率分布からランキングを組み立てる
///
/// 並び替えは表示する丸め後のパーセントで行う。同率の場合は単一ラベル予測を先頭、
/// それ以外はエンコーダのクラス順を保つ（安定ソート）。
pub fn rank(
    probabilities: &[f32],
    predicted: usize,
    encoder: &LabelEncoder,
    options: &RankingOptions,
) -> Result<RankedPrediction, InferenceInputError> {
    if probabilities.len() != encoder.len() {
        return Err(InferenceInputError::OutputShape {
            expected: encoder.len(),
            actual: probabilities.len(),
        });
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(InferenceInputError::Backend(
            "probability distribution contains a non-finite value".to_string(),
        ));
    }
    let recommended = encoder
        .decode(predicted)
        .ok_or(InferenceInputError::UnknownClass(predicted))?
        .to_string();

    let confidences: Vec<f64> = probabilities.iter().copied().map(to_percent).collect();
    let total_confidence: f64 = confidences.iter().sum();

    let mut order: Vec<usize> = (0..confidences.len()).collect();
    order.sort_by(|&a, &b| {
        confidences[b]
            .total_cmp(&confidences[a])
            .then_with(|| (b == predicted).cmp(&(a == predicted)))
    });

    let mut entries = Vec::with_capacity(order.len());
    for index in order {
        let confidence = confidences[index];
        if options.drop_zero_confidence && confidence == 0.0 {
            continue;
        }
        // 長さは上で確認済みなので復号は必ず成功する
        let crop = encoder
            .decode(index)
            .ok_or(InferenceInputError::UnknownClass(index))?;
        entries.push(CropConfidence {
            crop: crop.to_string(),
            confidence,
        });
    }

    Ok(RankedPrediction {
        recommended,
        entries,
        total_confidence,
    })
}

/// 分類器とラベルエンコーダを保持して予測を行う
pub struct PredictionPipeline<C> {
    classifier: C,
    encoder: LabelEncoder,
    options: RankingOptions,
}

impl<C: Classifier> PredictionPipeline<C> {
    /// クラス数が一致しない組み合わせは起動時エラー
    pub fn new(
        classifier: C,
        encoder: LabelEncoder,
        options: RankingOptions,
    ) -> Result<Self, StartupArtifactError> {
        if classifier.num_classes() != encoder.len() {
            return Err(StartupArtifactError::ClassCountMismatch {
                classifier: classifier.num_classes(),
                encoder: encoder.len(),
            });
        }

        Ok(Self {
            classifier,
            encoder,
            options,
        })
    }

    /// 特徴ベクトルから予測
    pub fn predict(&self, features: &FeatureVector) -> Result<RankedPrediction, InferenceInputError> {
        self.predict_values(&features.to_array())
    }

    /// 生の値スライスから予測（範囲チェックなし、個数のみ確認）
    pub fn predict_values(&self, values: &[f32]) -> Result<RankedPrediction, InferenceInputError> {
        if values.len() != self.classifier.num_features() {
            return Err(InferenceInputError::FeatureCount {
                expected: self.classifier.num_features(),
                actual: values.len(),
            });
        }

        let predicted = self.classifier.predict(values)?;
        let probabilities = self.classifier.predict_probabilities(values)?;
        let ranked = rank(&probabilities, predicted, &self.encoder, &self.options)?;

        if ranked.head().map(|h| h.crop.as_str()) != Some(ranked.recommended.as_str()) {
            tracing::warn!(
                recommended = %ranked.recommended,
                "単一ラベル予測と確率分布の最大値が一致しません"
            );
        }
        tracing::debug!(
            recommended = %ranked.recommended,
            entries = ranked.len(),
            "予測完了"
        );

        Ok(ranked)
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    pub fn options(&self) -> &RankingOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: RankingOptions) {
        self.options = options;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 入力に関係なく固定の分布を返す分類器
    struct FixedClassifier {
        probabilities: Vec<f32>,
        predicted: usize,
    }

    impl Classifier for FixedClassifier {
        fn num_features(&self) -> usize {
            7
        }

        fn num_classes(&self) -> usize {
            self.probabilities.len()
        }

        fn predict(&self, features: &[f32]) -> Result<usize, InferenceInputError> {
            if features.len() != 7 {
                return Err(InferenceInputError::FeatureCount { expected: 7, actual: features.len() });
            }
            Ok(self.predicted)
        }

        fn predict_probabilities(&self, _features: &[f32]) -> Result<Vec<f32>, InferenceInputError> {
            Ok(self.probabilities.clone())
        }
    }

    fn encoder() -> LabelEncoder {
        LabelEncoder::fit(["apple", "banana", "coffee", "jute", "rice"]).unwrap()
    }

    fn pipeline(probabilities: Vec<f32>, predicted: usize, options: RankingOptions) -> PredictionPipeline<FixedClassifier> {
        PredictionPipeline::new(FixedClassifier { probabilities, predicted }, encoder(), options).unwrap()
    }

    fn names(ranked: &RankedPrediction) -> Vec<&str> {
        ranked.entries.iter().map(|e| e.crop.as_str()).collect()
    }

    #[test]
    fn test_ranks_descending() {
        let p = pipeline(vec![0.05, 0.6, 0.0, 0.25, 0.1], 1, RankingOptions::default());
        let ranked = p.predict(&FeatureVector::default()).unwrap();

        assert_eq!(ranked.recommended, "banana");
        assert_eq!(names(&ranked), vec!["banana", "jute", "rice", "apple", "coffee"]);
        assert_eq!(ranked.head().unwrap().confidence, 60.0);
        assert!(ranked.is_sorted());
        assert!((ranked.total_confidence - 100.0).abs() < 0.1);
        let top: Vec<&str> = ranked.top(3).iter().map(|e| e.crop.as_str()).collect();
        assert_eq!(top, vec!["banana", "jute", "rice"]);
        assert_eq!(ranked.top(10).len(), 5);
    }

    #[test]
    fn test_rounds_to_two_decimals() {
        let p = pipeline(vec![0.123456, 0.876544, 0.0, 0.0, 0.0], 1, RankingOptions::default());
        let ranked = p.predict(&FeatureVector::default()).unwrap();
        assert_eq!(ranked.entries[0].confidence, 87.65);
        assert_eq!(ranked.entries[1].confidence, 12.35);
    }

    #[test]
    fn test_drop_zero_confidence() {
        let probs = vec![0.3, 0.7, 0.0, 0.00001, 0.0];
        let keep = pipeline(probs.clone(), 1, RankingOptions::default());
        assert_eq!(keep.predict(&FeatureVector::default()).unwrap().len(), 5);

        let drop = pipeline(probs, 1, RankingOptions { drop_zero_confidence: true, top_n: 3 });
        let ranked = drop.predict(&FeatureVector::default()).unwrap();
        assert_eq!(names(&ranked), vec!["banana", "apple"]);
        // 合計はフィルタ前の値
        assert!((ranked.total_confidence - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_ties_keep_encoder_order() {
        let p = pipeline(vec![0.1, 0.3, 0.3, 0.2, 0.1], 1, RankingOptions::default());
        let ranked = p.predict(&FeatureVector::default()).unwrap();
        assert_eq!(names(&ranked), vec!["banana", "coffee", "jute", "apple", "rice"]);
    }

    #[test]
    fn test_tie_puts_direct_prediction_first() {
        let p = pipeline(vec![0.1, 0.3, 0.3, 0.2, 0.1], 2, RankingOptions::default());
        let ranked = p.predict(&FeatureVector::default()).unwrap();
        assert_eq!(ranked.recommended, "coffee");
        assert_eq!(names(&ranked)[..2], ["coffee", "banana"]);
    }

    #[test]
    fn test_equal_after_rounding_keeps_encoder_order() {
        // 30.00% と 30.001% は表示上同じなのでクラス順
        let enc = LabelEncoder::fit(["apple", "banana", "coffee"]).unwrap();
        let ranked = rank(&[0.3, 0.30001, 0.39999], 2, &enc, &RankingOptions::default()).unwrap();
        assert_eq!(names(&ranked), vec!["coffee", "apple", "banana"]);
        assert_eq!(ranked.entries[1].confidence, 30.0);
        assert_eq!(ranked.entries[2].confidence, 30.0);

        // 丸め後に同率なら単一ラベル予測が先頭
        let ranked = rank(&[0.400001, 0.4, 0.199999], 1, &enc, &RankingOptions::default()).unwrap();
        assert_eq!(ranked.recommended, "banana");
        assert_eq!(names(&ranked), vec!["banana", "apple", "coffee"]);
    }

    #[test]
    fn test_idempotent() {
        let p = pipeline(vec![0.2, 0.2, 0.2, 0.2, 0.2], 0, RankingOptions::default());
        let a = p.predict(&FeatureVector::default()).unwrap();
        let b = p.predict(&FeatureVector::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_class_count_mismatch() {
        let result = PredictionPipeline::new(
            FixedClassifier { probabilities: vec![0.5, 0.5], predicted: 0 },
            encoder(),
            RankingOptions::default(),
        );
        assert!(matches!(
            result,
            Err(StartupArtifactError::ClassCountMismatch { classifier: 2, encoder: 5 })
        ));
    }

    #[test]
    fn test_wrong_feature_count() {
        let p = pipeline(vec![0.2, 0.2, 0.2, 0.2, 0.2], 0, RankingOptions::default());
        assert_eq!(
            p.predict_values(&[1.0, 2.0]).unwrap_err(),
            InferenceInputError::FeatureCount { expected: 7, actual: 2 }
        );
    }

    #[test]
    fn test_rank_rejects_bad_output() {
        let enc = encoder();
        let opts = RankingOptions::default();
        assert_eq!(
            rank(&[0.5, 0.5], 0, &enc, &opts).unwrap_err(),
            InferenceInputError::OutputShape { expected: 5, actual: 2 }
        );
        assert_eq!(
            rank(&[0.2; 5], 9, &enc, &opts).unwrap_err(),
            InferenceInputError::UnknownClass(9)
        );
        assert!(matches!(
            rank(&[f32::NAN, 0.2, 0.2, 0.2, 0.2], 1, &enc, &opts),
            Err(InferenceInputError::Backend(_))
        ));
    }
}
