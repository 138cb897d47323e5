//! 学習用CSV（N,P,K,temperature,humidity,ph,rainfall,label）の読み込み

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;

use crate::types::{FEATURE_RANGES, NUM_FEATURES};

/// 学習サンプル1行分
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub features: [f32; NUM_FEATURES],
    pub label: String,
}

pub fn load_csv(path: &Path) -> Result<Vec<LabeledSample>> {
    let file = std::fs::File::open(path)
        .context(format!("Failed to open dataset: {:?}", path))?;
    read_samples(file).context(format!("Failed to parse dataset: {:?}", path))
}

/// 列は名前で探すので順序は問わない（大文字小文字も区別しない）
pub fn read_samples<R: Read>(reader: R) -> Result<Vec<LabeledSample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow::anyhow!("Missing column '{}'", name))
    };

    let mut feature_columns = [0usize; NUM_FEATURES];
    for (slot, range) in feature_columns.iter_mut().zip(FEATURE_RANGES.iter()) {
        *slot = column(range.key)?;
    }
    let label_column = column("label")?;

    let mut samples = Vec::new();

    for (row, result) in reader.records().enumerate() {
        let record = result?;
        // ヘッダーが1行目なのでデータは2行目から
        let line = row + 2;

        let mut features = [0f32; NUM_FEATURES];
        for ((value, &col), range) in features
            .iter_mut()
            .zip(feature_columns.iter())
            .zip(FEATURE_RANGES.iter())
        {
            *value = record
                .get(col)
                .ok_or_else(|| anyhow::anyhow!("Line {}: missing {}", line, range.key))?
                .parse()
                .context(format!("Line {}: invalid {}", line, range.key))?;
        }

        let label = record
            .get(label_column)
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Line {}: missing label", line))?;

        samples.push(LabeledSample { features, label });
    }

    if samples.is_empty() {
        anyhow::bail!("Dataset contains no rows");
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_standard_layout() {
        let csv = "N,P,K,temperature,humidity,ph,rainfall,label\n\
                   90,42,43,20.879744,82.002744,6.502985,202.935536,rice\n\
                   71,54,16,22.613600,63.690706,5.749914,87.759539,maize\n";
        let samples = read_samples(csv.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label, "rice");
        assert_eq!(samples[0].features[0], 90.0);
        assert!((samples[1].features[6] - 87.759539).abs() < 1e-4);
    }

    #[test]
    fn test_columns_matched_by_name() {
        let csv = "label, rainfall ,ph,humidity,temperature,k,p,n\n\
                   apple,110.5,6.0,92.0,22.5,200,130,20\n";
        let samples = read_samples(csv.as_bytes()).unwrap();
        assert_eq!(samples[0].features, [20.0, 130.0, 200.0, 22.5, 92.0, 6.0, 110.5]);
        assert_eq!(samples[0].label, "apple");
    }

    #[test]
    fn test_errors() {
        let missing = "N,P,K,temperature,humidity,ph,label\n1,2,3,4,5,6,rice\n";
        assert!(read_samples(missing.as_bytes()).is_err());

        let bad_number = "N,P,K,temperature,humidity,ph,rainfall,label\n1,x,3,4,5,6,7,rice\n";
        let err = read_samples(bad_number.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("Line 2"));

        let empty = "N,P,K,temperature,humidity,ph,rainfall,label\n";
        assert!(read_samples(empty.as_bytes()).is_err());
    }
}
