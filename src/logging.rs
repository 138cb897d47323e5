//! ログ初期化
//!
//! `tracing` のサブスクライバを設定ファイルのログレベルで一度だけ登録します。

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 表示する最低レベル
    pub level: Level,
    /// モジュールパスを表示するか
    pub include_target: bool,
    /// ANSIカラーを使うか
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// 設定ファイルの文字列から作成（不明な値はinfo）
    pub fn from_level_str(level: &str) -> Self {
        let level = match level.trim().to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        Self {
            level,
            include_target: level >= Level::DEBUG,
            ..Self::default()
        }
    }
}

/// ログを初期化（既に登録済みの場合はエラー）
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_str() {
        assert_eq!(LogConfig::from_level_str("DEBUG").level, Level::DEBUG);
        assert_eq!(LogConfig::from_level_str("warning").level, Level::WARN);
        assert_eq!(LogConfig::from_level_str("nonsense").level, Level::INFO);
        assert!(LogConfig::from_level_str("trace").include_target);
        assert!(!LogConfig::from_level_str("info").include_target);
    }
}
