//! 分類器とラベルエンコーダの永続化
//!
//! 分類器はTar.gz形式でネットワークの重みとメタデータを1ファイルに統合して保存します。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（特徴量名、標準化パラメータ、クラス数など）
//! - model.bin       - ネットワークの重み（バイナリ）
//!
//! ラベルエンコーダは別ファイルのJSONとして保存します。

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::error::StartupArtifactError;
use crate::model::label_encoder::LabelEncoder;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 親ディレクトリが存在しない場合は作成
fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
    }
    Ok(())
}

/// 拡張子を補った保存先（.gzで終わっていればそのまま）
fn bundle_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// 書き込み途中のファイル名（同じディレクトリの隠しファイル）
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

fn write_bundle(tar_gz_path: &Path, metadata: &ModelMetadata, model_binary: &[u8]) -> Result<()> {
    ensure_parent(tar_gz_path)?;

    let tar_gz_file = File::create(tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())
        .context("Failed to add metadata.json to tar")?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)
        .context("Failed to add model.bin to tar")?;

    // tarとgzipの両方を閉じる
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(())
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : ネットワークの重み
///
/// 実際に書き込んだパスを返す
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = bundle_path(output_path);
    write_bundle(&tar_gz_path, metadata, model_binary)?;
    Ok(tar_gz_path)
}

/// 分類器バンドルとラベルエンコーダを揃えて保存
///
/// 両方を一時ファイルに書き終えてから置き換えるので、
/// 書き込みに失敗しても既存のアーティファクトは元の組のまま残る。
pub fn save_artifacts(
    model_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
    label_encoder_path: &Path,
    encoder: &LabelEncoder,
) -> Result<PathBuf> {
    let model_path = bundle_path(model_path);
    let staged_model = staging_path(&model_path);
    let staged_encoder = staging_path(label_encoder_path);

    let staged = write_bundle(&staged_model, metadata, model_binary)
        .and_then(|_| save_label_encoder(&staged_encoder, encoder));
    if let Err(e) = staged {
        std::fs::remove_file(&staged_model).ok();
        std::fs::remove_file(&staged_encoder).ok();
        return Err(e);
    }

    std::fs::rename(&staged_model, &model_path)
        .context(format!("Failed to move model into place: {:?}", model_path))?;
    if let Err(e) = std::fs::rename(&staged_encoder, label_encoder_path) {
        std::fs::remove_file(&staged_encoder).ok();
        return Err(e).context(format!(
            "Failed to move label encoder into place: {:?}",
            label_encoder_path
        ));
    }

    Ok(model_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

fn open_artifact(path: &Path) -> Result<File, StartupArtifactError> {
    if !path.exists() {
        return Err(StartupArtifactError::NotFound(path.to_path_buf()));
    }
    File::open(path).map_err(|source| StartupArtifactError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// アーカイブ内の指定エントリを読み出す（見つかったものだけ返す）
fn read_entries(
    tar_gz_path: &Path,
    wanted: &[&str],
) -> Result<Vec<(String, Vec<u8>)>, StartupArtifactError> {
    let corrupt = |e: std::io::Error| StartupArtifactError::Corrupt {
        path: tar_gz_path.to_path_buf(),
        reason: e.to_string(),
    };

    let file = open_artifact(tar_gz_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut found = Vec::new();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let name = entry.path().map_err(corrupt)?.to_string_lossy().to_string();

        if wanted.contains(&name.as_str()) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer).map_err(corrupt)?;
            found.push((name, buffer));
        }
    }

    Ok(found)
}

fn take_entry(
    entries: &mut Vec<(String, Vec<u8>)>,
    name: &str,
    tar_gz_path: &Path,
) -> Result<Vec<u8>, StartupArtifactError> {
    match entries.iter().position(|(n, _)| n == name) {
        Some(i) => Ok(entries.swap_remove(i).1),
        None => Err(StartupArtifactError::Corrupt {
            path: tar_gz_path.to_path_buf(),
            reason: format!("{} not found in tar.gz archive", name),
        }),
    }
}

fn parse_metadata(bytes: &[u8], tar_gz_path: &Path) -> Result<ModelMetadata, StartupArtifactError> {
    let json = std::str::from_utf8(bytes).map_err(|e| StartupArtifactError::Corrupt {
        path: tar_gz_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    ModelMetadata::from_json_string(json).map_err(|e| StartupArtifactError::Incompatible {
        path: tar_gz_path.to_path_buf(),
        reason: format!("{:#}", e),
    })
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata, StartupArtifactError> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    let bytes = take_entry(&mut entries, METADATA_ENTRY, tar_gz_path)?;
    parse_metadata(&bytes, tar_gz_path)
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(
    tar_gz_path: &Path,
) -> Result<(ModelMetadata, Vec<u8>), StartupArtifactError> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?;
    let metadata_bytes = take_entry(&mut entries, METADATA_ENTRY, tar_gz_path)?;
    let binary = take_entry(&mut entries, MODEL_ENTRY, tar_gz_path)?;
    Ok((parse_metadata(&metadata_bytes, tar_gz_path)?, binary))
}

/// ラベルエンコーダをJSONで保存
pub fn save_label_encoder(path: &Path, encoder: &LabelEncoder) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, encoder.to_json_string()?)
        .context(format!("Failed to write label encoder: {:?}", path))
}

/// ラベルエンコーダをJSONから読み込む
pub fn load_label_encoder(path: &Path) -> Result<LabelEncoder, StartupArtifactError> {
    let mut json = String::new();
    open_artifact(path)?
        .read_to_string(&mut json)
        .map_err(|source| StartupArtifactError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

    LabelEncoder::from_json_string(&json).map_err(|e| StartupArtifactError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    tracing::info!(
        features = %metadata.feature_names.join(", "),
        classes = metadata.num_classes,
        hidden = metadata.hidden_size,
        epochs = metadata.num_epochs,
        accuracy = ?metadata.validation_accuracy,
        trained_at = %metadata.trained_at,
        "モデルメタデータ"
    );
}
