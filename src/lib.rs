// wgpu/naga の型を dyn Classifier に包むと既定の再帰上限を超える
#![recursion_limit = "256"]

pub mod types;
pub mod error;
pub mod csv_loader;
pub mod pipeline;
pub mod loader;
pub mod logging;
mod prediction_commands;

// 学習・推論のモジュール
pub mod model;
pub mod ml;

use anyhow::Context;
use loader::CropPipeline;
use logging::LogConfig;
use model::config::AppConfig;

use std::sync::{Arc, Mutex};

pub struct AppState {
    pipeline: Arc<Mutex<CropPipeline>>, // 起動時に読み込んだ推論パイプライン
    config: Arc<Mutex<AppConfig>>,
    is_training: Arc<Mutex<bool>>, // 学習中フラグ
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: CropPipeline) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            config: Arc::new(Mutex::new(config)),
            is_training: Arc::new(Mutex::new(false)),
        }
    }
}

/// 設定・ログ・アーティファクトを準備してアプリを起動
///
/// アーティファクトが読めない場合は予測を提供できないのでウィンドウを開かずに終了する
fn start() -> anyhow::Result<()> {
    let (config, source) = AppConfig::load_or_default();

    logging::init_logging(&LogConfig::from_level_str(&config.log_level))
        .map_err(anyhow::Error::msg)?;
    source.log();
    config.log_summary();

    let pipeline = loader::load_pipeline(&config)
        .context("分類器またはラベルエンコーダを読み込めませんでした")?;
    tracing::info!(
        classes = pipeline.encoder().len(),
        "予測パイプラインの準備が完了しました"
    );

    let app_state = AppState::new(config, pipeline);

    tauri::Builder::default()
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            prediction_commands::get_input_schema,
            prediction_commands::predict_crop,
            prediction_commands::get_model_info,
            prediction_commands::set_drop_zero_confidence,
            prediction_commands::reload_model,
            prediction_commands::train_crop_model,
        ])
        .run(tauri::generate_context!())
        .context("error while running tauri application")
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    if let Err(e) = start() {
        tracing::error!("起動に失敗しました: {:#}", e);
        eprintln!("起動に失敗しました: {:#}", e);
        std::process::exit(1);
    }
}
