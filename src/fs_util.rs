use std::fs;
use std::io::{self, Cursor};
use std::path::Path;

use camino::Utf8PathBuf;
use zip::ZipArchive;

use crate::error::OasisError;

/// Checks that `body` is a readable zip archive without touching the disk.
pub fn validate_zip(body: &[u8]) -> Result<(), OasisError> {
    let mut archive =
        ZipArchive::new(Cursor::new(body)).map_err(|err| OasisError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| OasisError::Archive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink()).map_err(|err| OasisError::Archive(err.to_string()))?;
    }
    Ok(())
}

/// Writes every file member of `body` below `target_dir` and returns their paths.
pub fn extract_zip(body: &[u8], target_dir: &Path) -> Result<Vec<Utf8PathBuf>, OasisError> {
    let mut archive =
        ZipArchive::new(Cursor::new(body)).map_err(|err| OasisError::Archive(err.to_string()))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| OasisError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(OasisError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| OasisError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| OasisError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| OasisError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| OasisError::Filesystem(err.to_string()))?;
        let entry_path = Utf8PathBuf::from_path_buf(entry_path)
            .map_err(|_| OasisError::Filesystem("non-utf8 file path in archive".to_string()))?;
        extracted.push(entry_path);
    }
    Ok(extracted)
}

/// Creates `dir` if needed and returns its absolute form.
pub fn ensure_absolute_dir(dir: &Path) -> Result<Utf8PathBuf, OasisError> {
    fs::create_dir_all(dir).map_err(|err| OasisError::Filesystem(err.to_string()))?;
    let absolute = fs::canonicalize(dir).map_err(|err| OasisError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(absolute)
        .map_err(|_| OasisError::Filesystem("non-utf8 destination directory".to_string()))
}
