// wgpu/naga の型を dyn Classifier に包むと既定の再帰上限を超える
#![recursion_limit = "256"]

//! CSVデータセットから作物分類モデルを学習するバイナリ
//!
//! 使い方: train_model <dataset.csv> [config.json]

use crop_advisor_lib::logging::{init_logging, LogConfig};
use crop_advisor_lib::ml::train_model;
use crop_advisor_lib::model::config::AppConfig;
use std::path::PathBuf;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let (mut config, source) = AppConfig::load_or_default_from(&config_path);

    if let Err(e) = init_logging(&LogConfig::from_level_str(&config.log_level)) {
        eprintln!("{}", e);
    }
    source.log();

    let dataset_path = match args.get(1).cloned().or_else(|| config.last_dataset_path.clone()) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("使い方: {} <dataset.csv> [config.json]", args[0]);
            std::process::exit(2);
        }
    };

    println!("=== Crop Model Training ===\n");
    config.log_summary();

    match train_model(&dataset_path, &config, |line| println!("  {}", line)) {
        Ok(report) => {
            println!("\n✓ 学習完了:");
            println!("  サンプル数: {} (学習 {} / 検証 {})", report.num_samples, report.num_train, report.num_valid);
            println!("  クラス数: {}", report.classes.len());
            println!("  検証正解率: {:.2}%", report.validation_accuracy * 100.0);
            println!("  モデル: {}", report.model_path.display());
            println!("  ラベルエンコーダ: {}", report.label_encoder_path.display());

            config.update_last_dataset_path(&dataset_path);
            if let Err(e) = config.save(&config_path) {
                eprintln!("✗ 設定の保存に失敗しました: {:#}", e);
            }
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            std::process::exit(1);
        }
    }
}
