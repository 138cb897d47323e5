//! コマンドラインから作物推薦を実行するバイナリ
//!
//! 使い方: recommend [N P K temperature humidity ph rainfall]
//! 引数を省略した場合はサンプル値で予測します。

use crop_advisor_lib::loader::load_pipeline;
use crop_advisor_lib::logging::{init_logging, LogConfig};
use crop_advisor_lib::model::config::AppConfig;
use crop_advisor_lib::types::{FeatureVector, NUM_FEATURES};

fn parse_features(args: &[String]) -> Result<FeatureVector, String> {
    if args.is_empty() {
        return Ok(FeatureVector::default());
    }

    let values = args
        .iter()
        .map(|a| a.parse::<f64>().map_err(|_| format!("数値ではありません: {}", a)))
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() != NUM_FEATURES {
        return Err(format!(
            "{} 個の値が必要です（N P K temperature humidity ph rainfall）",
            NUM_FEATURES
        ));
    }

    FeatureVector::from_values(&values).map_err(|e| e.to_string())
}

fn main() {
    let (config, source) = AppConfig::load_or_default();
    if let Err(e) = init_logging(&LogConfig::from_level_str(&config.log_level)) {
        eprintln!("{}", e);
    }
    source.log();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let features = match parse_features(&args) {
        Ok(features) => features,
        Err(e) => {
            eprintln!("✗ 入力エラー: {}", e);
            std::process::exit(2);
        }
    };

    let pipeline = match load_pipeline(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("✗ アーティファクト読み込みエラー: {}", e);
            std::process::exit(1);
        }
    };

    println!("入力: {}\n", features);

    match pipeline.predict(&features) {
        Ok(ranked) => {
            println!("推奨作物: {}\n", ranked.recommended);
            println!("上位 {}:", pipeline.options().top_n);
            for (i, entry) in ranked.top(pipeline.options().top_n).iter().enumerate() {
                println!("  {}. {:<14} {:>6.2}%", i + 1, entry.crop, entry.confidence);
            }

            println!("\n全作物の信頼度:");
            for entry in &ranked.entries {
                println!("  {:<14} {:>6.2}%", entry.crop, entry.confidence);
            }
            println!("  合計: {:.2}%", ranked.total_confidence);
        }
        Err(e) => {
            eprintln!("✗ 予測エラー: {}", e);
            std::process::exit(1);
        }
    }
}
