// ABOUTME: Crash-safe file replacement and never-overwriting backup copies shared by the file writers.
// ABOUTME: Writes to a sibling .tmp file, fsyncs, keeps the original permissions, then renames over the target.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Upper bound on `_<n>` suffixes tried when a backup name is taken.
const MAX_BACKUP_COLLISIONS: u32 = 100;

/// Replace `path` with `bytes` so readers see either the old or the new content.
/// An existing file keeps its permissions.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = tmp_sibling(path);
    let permissions = match fs::metadata(path) {
        Ok(metadata) => Some(metadata.permissions()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        if let Some(permissions) = permissions {
            fs::set_permissions(&tmp_path, permissions)?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Write `bytes` to a new sibling of `original` named `base_name`, or
/// `base_name_<n>` when that is taken. Never overwrites an existing file.
pub(crate) fn write_backup(original: &Path, base_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    for attempt in 0..=MAX_BACKUP_COLLISIONS {
        let name = if attempt == 0 {
            base_name.to_string()
        } else {
            format!("{base_name}_{attempt}")
        };
        let backup_path = original.with_file_name(&name);

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&backup_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };

        let written = file.write_all(bytes).and_then(|_| file.sync_all());
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&backup_path);
            return Err(e);
        }
        return Ok(backup_path);
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free backup name for {base_name}"),
    ))
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("idrestore"));
    name.push(".tmp");
    path.with_file_name(name)
}
