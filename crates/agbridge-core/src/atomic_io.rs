use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Creates `dir` (and parents) and restricts it to the owner on unix.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to restrict permissions on {}", dir.display()))?;
    }
    Ok(())
}

/// Writes bytes using a temp file + rename so readers never observe partial data.
///
/// The parent directory is created owner-only and the file itself is created
/// with mode `0600` before any content is written.
pub fn write_private_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_private_dir(parent_dir)?;

    let temp_name = format!(
        ".{}.tmp-{}-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("agbridge"),
        std::process::id(),
        current_unix_timestamp_ms(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = parent_dir.join(temp_name);

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let write_result = options
        .open(&temp_path)
        .and_then(|mut file| {
            file.write_all(content)?;
            file.sync_all()
        })
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()));
    if let Err(error) = write_result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error);
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "failed to rename temporary file {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
