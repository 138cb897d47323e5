use serde::{Deserialize, Serialize};

use crate::error::InferenceInputError;

/// 特徴量の数（N, P, K, 気温, 湿度, pH, 降水量）
pub const NUM_FEATURES: usize = 7;

/// スライダー1本分の入力仕様
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FeatureRange {
    /// 学習CSVの列名と一致するキー
    pub key: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
    /// 整数値のみ受け付けるか
    pub integer: bool,
}

impl FeatureRange {
    fn check(&self, value: f64) -> Result<(), InferenceInputError> {
        if !value.is_finite() {
            return Err(InferenceInputError::NonFinite { feature: self.key });
        }
        if value < self.min || value > self.max {
            return Err(InferenceInputError::OutOfRange {
                feature: self.key,
                value,
                min: self.min,
                max: self.max,
            });
        }
        if self.integer && value.fract() != 0.0 {
            return Err(InferenceInputError::NotAnInteger {
                feature: self.key,
                value,
            });
        }
        Ok(())
    }
}

/// 入力範囲とデフォルト値（順序は特徴ベクトルの並びと同じ）
pub const FEATURE_RANGES: [FeatureRange; NUM_FEATURES] = [
    FeatureRange { key: "N", label: "Nitrogen (N)", unit: "", min: 0.0, max: 140.0, step: 1.0, default: 90.0, integer: true },
    FeatureRange { key: "P", label: "Phosphorus (P)", unit: "", min: 0.0, max: 140.0, step: 1.0, default: 42.0, integer: true },
    FeatureRange { key: "K", label: "Potassium (K)", unit: "", min: 0.0, max: 140.0, step: 1.0, default: 43.0, integer: true },
    FeatureRange { key: "temperature", label: "Temperature", unit: "°C", min: 0.0, max: 50.0, step: 0.01, default: 20.88, integer: false },
    FeatureRange { key: "humidity", label: "Humidity", unit: "%", min: 0.0, max: 100.0, step: 0.01, default: 82.0, integer: false },
    FeatureRange { key: "ph", label: "pH Value", unit: "", min: 0.0, max: 14.0, step: 0.01, default: 6.5, integer: false },
    FeatureRange { key: "rainfall", label: "Rainfall", unit: "mm", min: 0.0, max: 500.0, step: 0.1, default: 202.9, integer: false },
];

/// 土壌・気象の測定値7つ
///
/// 生成時に全ての値を範囲チェックするため、値として存在する時点で有効。
/// IPC経由のデシリアライズも同じチェックを通る。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureVector")]
pub struct FeatureVector {
    nitrogen: u16,
    phosphorus: u16,
    potassium: u16,
    temperature: f64,
    humidity: f64,
    ph: f64,
    rainfall: f64,
}

/// チェック前の入力値
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawFeatureVector {
    #[serde(alias = "N")]
    pub nitrogen: f64,
    #[serde(alias = "P")]
    pub phosphorus: f64,
    #[serde(alias = "K")]
    pub potassium: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub ph: f64,
    pub rainfall: f64,
}

impl TryFrom<RawFeatureVector> for FeatureVector {
    type Error = InferenceInputError;

    fn try_from(raw: RawFeatureVector) -> Result<Self, Self::Error> {
        Self::from_values(&[
            raw.nitrogen,
            raw.phosphorus,
            raw.potassium,
            raw.temperature,
            raw.humidity,
            raw.ph,
            raw.rainfall,
        ])
    }
}

impl FeatureVector {
    pub fn new(
        nitrogen: u16,
        phosphorus: u16,
        potassium: u16,
        temperature: f64,
        humidity: f64,
        ph: f64,
        rainfall: f64,
    ) -> Result<Self, InferenceInputError> {
        Self::from_values(&[
            nitrogen as f64,
            phosphorus as f64,
            potassium as f64,
            temperature,
            humidity,
            ph,
            rainfall,
        ])
    }

    /// 並び順どおりの値スライスから生成
    pub fn from_values(values: &[f64]) -> Result<Self, InferenceInputError> {
        if values.len() != NUM_FEATURES {
            return Err(InferenceInputError::FeatureCount {
                expected: NUM_FEATURES,
                actual: values.len(),
            });
        }
        for (range, &value) in FEATURE_RANGES.iter().zip(values) {
            range.check(value)?;
        }

        Ok(Self {
            nitrogen: values[0] as u16,
            phosphorus: values[1] as u16,
            potassium: values[2] as u16,
            temperature: values[3],
            humidity: values[4],
            ph: values[5],
            rainfall: values[6],
        })
    }

    /// 全ての値が下限
    pub fn minimum() -> Self {
        Self::from_bounds(|r| r.min)
    }

    /// 全ての値が上限
    pub fn maximum() -> Self {
        Self::from_bounds(|r| r.max)
    }

    fn from_bounds(pick: impl Fn(&FeatureRange) -> f64) -> Self {
        let v: Vec<f64> = FEATURE_RANGES.iter().map(pick).collect();
        Self {
            nitrogen: v[0] as u16,
            phosphorus: v[1] as u16,
            potassium: v[2] as u16,
            temperature: v[3],
            humidity: v[4],
            ph: v[5],
            rainfall: v[6],
        }
    }

    pub fn nitrogen(&self) -> u16 {
        self.nitrogen
    }

    pub fn phosphorus(&self) -> u16 {
        self.phosphorus
    }

    pub fn potassium(&self) -> u16 {
        self.potassium
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn ph(&self) -> f64 {
        self.ph
    }

    pub fn rainfall(&self) -> f64 {
        self.rainfall
    }

    pub fn values(&self) -> [f64; NUM_FEATURES] {
        [
            self.nitrogen as f64,
            self.phosphorus as f64,
            self.potassium as f64,
            self.temperature,
            self.humidity,
            self.ph,
            self.rainfall,
        ]
    }

    /// モデル入力用（f32）
    pub fn to_array(&self) -> [f32; NUM_FEATURES] {
        self.values().map(|v| v as f32)
    }
}

/// サンプル値 (90, 42, 43, 20.88, 82.0, 6.5, 202.9)
impl Default for FeatureVector {
    fn default() -> Self {
        Self::from_bounds(|r| r.default)
    }
}

impl std::fmt::Display for FeatureVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "N={} P={} K={} temperature={} humidity={} ph={} rainfall={}",
            self.nitrogen,
            self.phosphorus,
            self.potassium,
            self.temperature,
            self.humidity,
            self.ph,
            self.rainfall
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sample_input() {
        let v = FeatureVector::default();
        assert_eq!(v.values(), [90.0, 42.0, 43.0, 20.88, 82.0, 6.5, 202.9]);
    }

    #[test]
    fn test_bounds_are_valid() {
        let min = FeatureVector::minimum();
        let max = FeatureVector::maximum();
        assert_eq!(FeatureVector::from_values(&min.values()).unwrap(), min);
        assert_eq!(FeatureVector::from_values(&max.values()).unwrap(), max);
        assert_eq!(max.values(), [140.0, 140.0, 140.0, 50.0, 100.0, 14.0, 500.0]);
    }

    #[test]
    fn test_rejects_wrong_arity() {
        let err = FeatureVector::from_values(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            InferenceInputError::FeatureCount { expected: 7, actual: 3 }
        );
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = FeatureVector::new(90, 42, 43, 20.0, 82.0, 14.5, 100.0).unwrap_err();
        assert!(matches!(err, InferenceInputError::OutOfRange { feature: "ph", .. }));

        let err = FeatureVector::new(141, 42, 43, 20.0, 82.0, 6.5, 100.0).unwrap_err();
        assert!(matches!(err, InferenceInputError::OutOfRange { feature: "N", .. }));
    }

    #[test]
    fn test_rejects_non_finite_and_fractional() {
        let err = FeatureVector::new(90, 42, 43, f64::NAN, 82.0, 6.5, 100.0).unwrap_err();
        assert_eq!(err, InferenceInputError::NonFinite { feature: "temperature" });

        let err = FeatureVector::from_values(&[90.5, 42.0, 43.0, 20.0, 82.0, 6.5, 100.0])
            .unwrap_err();
        assert!(matches!(err, InferenceInputError::NotAnInteger { feature: "N", .. }));
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"nitrogen":90,"phosphorus":42,"potassium":43,"temperature":20.88,"humidity":82.0,"ph":6.5,"rainfall":202.9}"#;
        let v: FeatureVector = serde_json::from_str(json).unwrap();
        assert_eq!(v, FeatureVector::default());

        let bad = r#"{"nitrogen":90,"phosphorus":42,"potassium":43,"temperature":20.88,"humidity":182.0,"ph":6.5,"rainfall":202.9}"#;
        assert!(serde_json::from_str::<FeatureVector>(bad).is_err());
    }

    #[test]
    fn test_deserialize_column_keys() {
        // スライダーのキー（CSV列名）でも受け付ける
        let json = r#"{"N":90,"P":42,"K":43,"temperature":20.88,"humidity":82.0,"ph":6.5,"rainfall":202.9}"#;
        let v: FeatureVector = serde_json::from_str(json).unwrap();
        assert_eq!(v, FeatureVector::default());
    }
}
