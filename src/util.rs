//! # Utility Module
//!
//! Small helpers shared by the ingest path and the analysis pipeline.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::warn;

const SIZE_UNITS: &[u8] = b"KMGTPE";

/// Format a byte count with 1024-based units and one decimal place.
///
/// Values below 1024 are printed as plain bytes (`"512 B"`).
pub fn human_readable_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let unit = SIZE_UNITS.get(exp).copied().unwrap_or(b'E') as char;
    format!("{:.1} {}B", bytes as f64 / div as f64, unit)
}

/// Lowercased extension of `file_name`, including the leading dot.
///
/// Returns an empty string when the name has no extension.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Ensure a storage directory exists and is writable, warning on unsafe permissions.
pub fn ensure_storage_dir(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("storage path is not a directory: {}", path.display()),
            ));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }

    let check_path = path.join(".depotscan_write_check");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&check_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&check_path);
        }
        Err(err) => {
            return Err(std::io::Error::new(
                err.kind(),
                format!("storage directory is not writable: {} ({err})", path.display()),
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("storage directory is world-writable: {}", path.display());
        }
    }

    Ok(())
}
