//! Directory-backed asynchronous storage.
//!
//! Each key maps to one `<escaped-key>.json` file. Writes go to a temporary
//! sibling first and are renamed into place, so a reader never observes a
//! half-written entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{Error, Storage};

/// Longest escaped key that still fits a 255-byte file name with the
/// `.json` suffix.
const MAX_STEM_LEN: usize = 250;

/// Storage rooted at a directory, created on first write.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), seq: AtomicU64::new(0) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` for an empty key or one whose escaped form
    /// would exceed the usual file name limit.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty() {
            return Err(Error::Storage("file storage key must not be empty".to_string()));
        }

        let stem = escape_key(key);
        if stem.len() > MAX_STEM_LEN {
            return Err(Error::Storage(format!(
                "file storage key escapes to {} bytes, limit is {MAX_STEM_LEN}",
                stem.len()
            )));
        }

        Ok(self.dir.join(format!("{stem}.json")))
    }
}

/// Escape a key into a portable file stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The mapping is injective, so distinct keys never share a file.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[async_trait]
impl Storage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::io(format!("creating {}", self.dir.display()), e))?;

        let path = self.path_for(key)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!(".write-{}-{seq}.tmp", std::process::id()));

        tokio::fs::write(&tmp, value.as_bytes())
            .await
            .map_err(|e| Error::io(format!("writing {}", tmp.display()), e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::io(format!("replacing {}", path.display()), e));
        }

        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), Error> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("removing {}", path.display()), e)),
        }
    }
}
