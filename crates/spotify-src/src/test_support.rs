//! Temp-file helpers shared by the unit tests of this crate and its hosts.

use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::session::APPLICATION_KEY_SIZE;

static NEXT: AtomicU64 = AtomicU64::new(0);

/// Unique temp file path.
pub fn make_temp_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "spotify-src-{prefix}-{}-{nanos}-{seq}",
        std::process::id()
    ))
}

/// A temp file removed on drop.
#[derive(Debug)]
pub struct TempFile(PathBuf);

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Deref for TempFile {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for TempFile {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Write `bytes` to a fresh temp file.
pub fn temp_file_with(prefix: &str, bytes: &[u8]) -> io::Result<TempFile> {
    let path = make_temp_path(prefix);
    std::fs::write(&path, bytes)?;
    Ok(TempFile(path))
}

/// A temp application key of the required size.
pub fn temp_appkey() -> io::Result<TempFile> {
    temp_file_with("appkey", &[0x5a; APPLICATION_KEY_SIZE])
}
