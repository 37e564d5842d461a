//! File helpers for the durable storage layout.
//!
//! Writes go through a temporary sibling file that is renamed into place, so a
//! reader never observes a half written batch or queue file.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::io::BufWriter;
use tracing::debug;
use tracing::error;

use crate::constants::TEMP_FILE_SUFFIX;
use crate::Result;
use crate::StorageError;

pub(crate) fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(parent_dir) {
                error!("Failed to create directory {:?}: {:?}", parent_dir, e);
                return Err(StorageError::at_path(parent_dir, e).into());
            }
        }
    }
    Ok(())
}

/// Path of the temporary file a write to `path` is staged in
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(TEMP_FILE_SUFFIX);
    path.with_file_name(name)
}

/// Replaces the content of `path` with `buf`
pub(crate) async fn write_file_atomic(
    path: &Path,
    buf: &[u8],
) -> Result<()> {
    create_parent_dir_if_not_exist(path)?;

    let temp = temp_path(path);
    let file = tokio::fs::File::create(&temp)
        .await
        .map_err(|e| StorageError::at_path(&temp, e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(buf).await.map_err(|e| StorageError::at_path(&temp, e))?;
    writer.flush().await.map_err(|e| StorageError::at_path(&temp, e))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|e| StorageError::at_path(&temp, e))?;
    drop(writer);

    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(StorageError::at_path(path, e).into());
    }
    debug!("Wrote {} bytes to {:?}", buf.len(), path);
    Ok(())
}

pub(crate) async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| StorageError::at_path(path, e).into())
}

/// Returns false if the file did not exist
pub(crate) async fn delete_file(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::at_path(path, e).into()),
    }
}

/// Blocking variant of [`delete_file`] for callers outside the runtime
pub(crate) fn delete_file_sync(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::at_path(path, e).into()),
    }
}

/// Returns false if the directory did not exist
pub(crate) async fn delete_dir_all(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::at_path(path, e).into()),
    }
}

/// Lists the regular files directly below `dir`; a missing directory is empty
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::at_path(dir, e).into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::at_path(dir, e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    Ok(files)
}
