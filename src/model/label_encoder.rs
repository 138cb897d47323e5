//! クラスインデックスと作物名の双方向マッピング

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::StartupArtifactError;

/// ラベルエンコーダ
///
/// JSON形式で保存される（`{"classes": ["apple", "banana", ...]}`）。
/// インデックスは `classes` 内の位置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LabelEncoderFile", into = "LabelEncoderFile")]
pub struct LabelEncoder {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabelEncoderFile {
    classes: Vec<String>,
}

impl TryFrom<LabelEncoderFile> for LabelEncoder {
    type Error = StartupArtifactError;

    fn try_from(file: LabelEncoderFile) -> Result<Self, Self::Error> {
        Self::from_classes(file.classes)
    }
}

impl From<LabelEncoder> for LabelEncoderFile {
    fn from(encoder: LabelEncoder) -> Self {
        Self {
            classes: encoder.classes,
        }
    }
}

impl LabelEncoder {
    /// クラス名の並びから生成（空・空白名・重複はエラー）
    pub fn from_classes(classes: Vec<String>) -> Result<Self, StartupArtifactError> {
        if classes.is_empty() {
            return Err(StartupArtifactError::InvalidLabelEncoder(
                "no classes".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(classes.len());
        for (i, name) in classes.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(StartupArtifactError::InvalidLabelEncoder(format!(
                    "class {} has an empty name",
                    i
                )));
            }
            if let Some(prev) = index.insert(name.clone(), i) {
                return Err(StartupArtifactError::InvalidLabelEncoder(format!(
                    "'{}' appears at both {} and {}",
                    name, prev, i
                )));
            }
        }

        Ok(Self { classes, index })
    }

    /// 生ラベル列から生成（重複を除いて名前順に並べる）
    pub fn fit<I, S>(labels: I) -> Result<Self, StartupArtifactError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classes: Vec<String> = labels
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .collect();
        classes.sort();
        classes.dedup();
        Self::from_classes(classes)
    }

    /// インデックス → 作物名
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// 作物名 → インデックス
    pub fn encode(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        use anyhow::Context;
        serde_json::to_string_pretty(self).context("Failed to serialize label encoder to JSON")
    }

    pub fn from_json_string(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_sorts_and_dedups() {
        let encoder = LabelEncoder::fit(["rice", "maize", "rice", "apple", "maize"]).unwrap();
        assert_eq!(encoder.classes(), &["apple", "maize", "rice"]);
        assert_eq!(encoder.encode("maize"), Some(1));
        assert_eq!(encoder.decode(2), Some("rice"));
        assert_eq!(encoder.decode(3), None);
        assert_eq!(encoder.encode("coffee"), None);
    }

    #[test]
    fn test_round_trip_is_bijective() {
        let encoder = LabelEncoder::fit(["jute", "coffee", "cotton", "banana"]).unwrap();
        for (i, name) in encoder.classes().iter().enumerate() {
            assert_eq!(encoder.encode(name), Some(i));
            assert_eq!(encoder.decode(i), Some(name.as_str()));
        }
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let dup = LabelEncoder::from_classes(vec!["rice".into(), "rice".into()]);
        assert!(matches!(dup, Err(StartupArtifactError::InvalidLabelEncoder(_))));

        let empty = LabelEncoder::from_classes(vec![]);
        assert!(matches!(empty, Err(StartupArtifactError::InvalidLabelEncoder(_))));

        let blank = LabelEncoder::from_classes(vec!["rice".into(), " ".into()]);
        assert!(matches!(blank, Err(StartupArtifactError::InvalidLabelEncoder(_))));
    }

    #[test]
    fn test_json_format() {
        let encoder = LabelEncoder::fit(["mango", "apple"]).unwrap();
        let json = encoder.to_json_string().unwrap();
        assert!(json.contains("\"classes\""));
        let back = LabelEncoder::from_json_string(&json).unwrap();
        assert_eq!(back, encoder);

        assert!(LabelEncoder::from_json_string(r#"{"classes":["a","a"]}"#).is_err());
    }
}
