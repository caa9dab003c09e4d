//! Crash-safe JSON document read/write.
//!
//! Writes go to a uniquely named temp file in the target directory and
//! are then renamed into place, so a reader sees either the previous
//! document or the new one, never a truncated file. Reads collapse every
//! failure (missing, malformed, partially visible) into `None`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{AppError, Result};

const JSON_EXTENSION: &str = "json";

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Parent directories are created on demand. If the rename cannot replace
/// an existing target, the target is removed and the rename retried.
///
/// # Errors
///
/// Returns `AppError::Io` if serialization, the temp write, or both
/// rename attempts fail.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &bytes)
}

/// Atomically replace `path` with `bytes`.
///
/// # Errors
///
/// Returns `AppError::Io` on directory creation, temp write, or rename failure.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;

    fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    persist_replacing(tmp, path)
}

fn persist_replacing(tmp: NamedTempFile, path: &Path) -> Result<()> {
    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(first) => {
            debug!(path = %path.display(), error = %first.error, "rename failed; removing target and retrying");
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(AppError::Io(format!(
                        "failed to replace {}: {err}",
                        path.display()
                    )))
                }
            }
            first.file.persist(path).map(|_| ()).map_err(|err| {
                AppError::Io(format!(
                    "failed to persist file to {}: {}",
                    path.display(),
                    err.error
                ))
            })
        }
    }
}

/// Read and parse a JSON document.
///
/// Missing files, unreadable files and malformed JSON all yield `None`.
#[must_use]
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = fs::read(path).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(path = %path.display(), %err, "ignoring unparsable document");
            None
        }
    }
}

/// Delete a file, treating "already gone" as success.
///
/// Returns `true` if this call removed the file.
pub fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                debug!(path = %path.display(), %err, "failed to remove file");
            }
            false
        }
    }
}

/// Record ids (file stems) of the `*.json` documents in `dir`.
///
/// Temp files and hidden files are skipped. A missing directory yields an
/// empty list.
#[must_use]
pub fn list_record_ids(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut ids: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == JSON_EXTENSION))
        .filter_map(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.starts_with('.'))
                .map(str::to_owned)
        })
        .collect();
    ids.sort();
    ids
}

/// Names of the immediate subdirectories of `dir`.
#[must_use]
pub fn list_subdirectories(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
        .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
        .collect()
}

/// Refresh the mtime of `path`, creating it if needed.
///
/// The file content is a timestamp for humans; only the mtime is read.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be written.
pub fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, chrono::Utc::now().to_rfc3339())
        .map_err(|err| AppError::Io(format!("failed to touch {}: {err}", path.display())))
}

/// Last modification time of `path`, if it exists.
#[must_use]
pub fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Convenience for building `<dir>/<id>.json`.
#[must_use]
pub fn json_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.{JSON_EXTENSION}"))
}
