//! 作物推薦のTauriコマンド

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tauri::State;

use crate::loader;
use crate::ml::{train_model, TrainingReport};
use crate::model::load_metadata;
use crate::pipeline::{CropConfidence, RankingOptions};
use crate::types::{FeatureRange, FeatureVector, FEATURE_RANGES};
use crate::AppState;

/// 予測結果の表示用ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct PredictionView {
    pub recommended: String,
    pub ranking: Vec<CropConfidence>,
    /// 上位n件（設定の top_n）
    pub top: Vec<CropConfidence>,
    pub total_confidence: f64,
}

/// 読み込み中のモデル情報
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub classes: Vec<String>,
    pub num_features: usize,
    pub device: String,
    pub model_path: String,
    pub label_encoder_path: String,
    pub trained_at: Option<String>,
    pub validation_accuracy: Option<f32>,
    pub ranking: RankingOptions,
}

/// 学習進捗のペイロード
#[derive(Debug, Clone, Serialize)]
pub struct TrainingProgress {
    pub message: String,
    pub finished: bool,
}

/// 学習中フラグ（ドロップ時に下ろす）
struct TrainingGuard<'a> {
    flag: &'a Mutex<bool>,
}

impl<'a> TrainingGuard<'a> {
    fn begin(flag: &'a Mutex<bool>) -> Result<Self, String> {
        let mut running = flag.lock().unwrap_or_else(PoisonError::into_inner);
        if *running {
            return Err("学習は既に実行中です".to_string());
        }
        *running = true;
        Ok(Self { flag })
    }
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        *self.flag.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

/// スライダーの範囲とデフォルト値
#[tauri::command]
pub fn get_input_schema() -> Vec<FeatureRange> {
    FEATURE_RANGES.to_vec()
}

/// 入力値から作物を予測
#[tauri::command]
pub fn predict_crop(features: FeatureVector, state: State<AppState>) -> Result<PredictionView, String> {
    let pipeline = state.pipeline.lock().map_err(|e| e.to_string())?;
    let ranked = pipeline.predict(&features).map_err(|e| {
        tracing::error!("予測エラー ({}): {}", features, e);
        e.to_string()
    })?;

    let top = ranked.top(pipeline.options().top_n).to_vec();
    Ok(PredictionView {
        recommended: ranked.recommended,
        ranking: ranked.entries,
        top,
        total_confidence: ranked.total_confidence,
    })
}

#[tauri::command]
pub fn get_model_info(state: State<AppState>) -> Result<ModelInfo, String> {
    let config = state.config.lock().map_err(|e| e.to_string())?.clone();
    let pipeline = state.pipeline.lock().map_err(|e| e.to_string())?;

    // メタデータは表示用なので読めなくても失敗にしない
    let metadata = load_metadata(&config.artifacts.model_path())
        .map_err(|e| tracing::warn!("メタデータ読み込みエラー: {}", e))
        .ok();

    Ok(ModelInfo {
        classes: pipeline.encoder().classes().to_vec(),
        num_features: pipeline.classifier().num_features(),
        device: config.device_type.to_string(),
        model_path: config.artifacts.model_path.clone(),
        label_encoder_path: config.artifacts.label_encoder_path.clone(),
        trained_at: metadata.as_ref().map(|m| m.trained_at.clone()),
        validation_accuracy: metadata.and_then(|m| m.validation_accuracy),
        ranking: *pipeline.options(),
    })
}

/// 信頼度 0% の作物を除外するかを切り替えて設定に保存
#[tauri::command]
pub fn set_drop_zero_confidence(enabled: bool, state: State<AppState>) -> Result<(), String> {
    let mut config = state.config.lock().map_err(|e| e.to_string())?;
    let mut pipeline = state.pipeline.lock().map_err(|e| e.to_string())?;

    config.ranking.drop_zero_confidence = enabled;
    pipeline.set_options(config.ranking);

    config.save_default().map_err(|e| e.to_string())
}

/// 設定のパスからアーティファクトを再読み込み
#[tauri::command]
pub fn reload_model(state: State<AppState>) -> Result<String, String> {
    let config = state.config.lock().map_err(|e| e.to_string())?.clone();
    let new_pipeline = loader::load_pipeline(&config).map_err(|e| e.to_string())?;
    let classes = new_pipeline.encoder().len();

    *state.pipeline.lock().map_err(|e| e.to_string())? = new_pipeline;
    Ok(format!("モデルを再読み込みしました（{} クラス）", classes))
}

/// モデル学習コマンド（非同期）
///
/// 学習完了後、新しいアーティファクトでパイプラインを差し替える
#[tauri::command]
pub async fn train_crop_model(
    dataset_path: String,
    state: State<'_, AppState>,
    on_progress: tauri::ipc::Channel<TrainingProgress>,
) -> Result<TrainingReport, String> {
    use tokio::task;

    let config = state.config.lock().map_err(|e| e.to_string())?.clone();
    let progress = on_progress.clone();
    let _training = TrainingGuard::begin(&state.is_training)?;

    // 別スレッドで学習実行
    let result = task::spawn_blocking(move || {
        let report = train_model(&PathBuf::from(&dataset_path), &config, |line| {
            progress
                .send(TrainingProgress {
                    message: line,
                    finished: false,
                })
                .ok();
        })?;
        let pipeline = loader::load_pipeline(&config)?;

        let mut config = config;
        config.update_last_dataset_path(&dataset_path);
        config.save_default()?;

        anyhow::Ok((report, pipeline, config))
    })
    .await;

    let (report, pipeline, config) = result
        .map_err(|e| format!("学習スレッドエラー: {}", e))?
        .map_err(|e| format!("{:#}", e))?;

    *state.pipeline.lock().map_err(|e| e.to_string())? = pipeline;
    *state.config.lock().map_err(|e| e.to_string())? = config;

    on_progress
        .send(TrainingProgress {
            message: format!(
                "完了: 正解率 {:.2}%",
                report.validation_accuracy * 100.0
            ),
            finished: true,
        })
        .ok();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_guard_clears_flag() {
        let flag = Mutex::new(false);
        {
            let _guard = TrainingGuard::begin(&flag).unwrap();
            assert!(*flag.lock().unwrap());
            assert!(TrainingGuard::begin(&flag).is_err());
        }
        assert!(!*flag.lock().unwrap());
        assert!(TrainingGuard::begin(&flag).is_ok());
    }

    #[test]
    fn test_training_guard_survives_poisoned_lock() {
        let flag = std::sync::Arc::new(Mutex::new(false));
        let cloned = flag.clone();
        std::thread::spawn(move || {
            let _held = cloned.lock().unwrap();
            panic!("poison");
        })
        .join()
        .ok();
        assert!(flag.is_poisoned());

        drop(TrainingGuard::begin(&flag).unwrap());
        assert!(!*flag.lock().unwrap_or_else(PoisonError::into_inner));
    }
}
