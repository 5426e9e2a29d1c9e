use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::DriverError;

/// Write `data` to `path` through a sibling `.tmp` file and a rename, so a
/// crash never leaves a half-written class or settings file behind.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), DriverError> {
    let file_name = path.file_name().unwrap_or_default();
    let mut tmp_name = OsString::from(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DriverError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DriverError> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

/// Write a class file, creating the output directory if needed.
pub fn write_class_file(out_dir: &Path, class: &str, bytes: &[u8]) -> Result<std::path::PathBuf, DriverError> {
    fs::create_dir_all(out_dir)?;
    let path = crate::paths::class_file_path(out_dir, class);
    atomic_write(&path, bytes)?;
    Ok(path)
}
