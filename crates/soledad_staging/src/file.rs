//! File-based staging store for persistent staging.

use crate::error::{StagingError, StagingResult};
use crate::store::{StageKey, StagingStore};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"SSTG";
const VERSION: u8 = 1;
const ENTRY_EXT: &str = "stg";
const TEMP_EXT: &str = "tmp";

/// A directory-backed staging store.
///
/// Each entry lives in its own file named after a SHA-256 of its key, so
/// staged ciphertext survives a process restart and an interrupted sync
/// can pick up where it stopped.
///
/// # Durability
///
/// Entries are written to a temporary file and renamed into place, so a
/// crash never leaves a half-written entry under its final name. With
/// [`FileStaging::with_sync`] the temporary file is also `fsync`ed first.
///
/// # Thread Safety
///
/// Writers take an exclusive lock and readers a shared one, which makes
/// every read-modify-delete sequence on a key atomic.
///
/// # Example
///
/// ```no_run
/// use soledad_staging::{FileStaging, StageKey, StagingStore};
/// use std::path::Path;
///
/// let store = FileStaging::open(Path::new("/tmp/staging")).unwrap();
/// store.put(&StageKey::new("doc", "1"), b"ciphertext").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStaging {
    dir: PathBuf,
    sync_writes: bool,
    lock: RwLock<()>,
}

impl FileStaging {
    /// Opens or creates a staging directory at `dir`.
    ///
    /// Leftover temporary files from an interrupted write are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub fn open(dir: &Path) -> StagingResult<Self> {
        fs::create_dir_all(dir)?;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXT) {
                tracing::debug!(path = %path.display(), "removing stale staging temp file");
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            sync_writes: false,
            lock: RwLock::new(()),
        })
    }

    /// Enables `fsync` before each entry is renamed into place.
    #[must_use]
    pub fn with_sync(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Returns the staging directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &StageKey) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.doc_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.rev.as_bytes());
        let name: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        self.dir.join(format!("{name}.{ENTRY_EXT}"))
    }

    fn read_entry(path: &Path) -> StagingResult<Option<(StageKey, Vec<u8>)>> {
        match fs::read(path) {
            Ok(bytes) => decode_entry(&bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_value(&self, key: &StageKey) -> StagingResult<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match Self::read_entry(&path)? {
            Some((stored_key, value)) if stored_key == *key => Ok(Some(value)),
            Some((stored_key, _)) => Err(StagingError::Corrupted(format!(
                "{} holds {} instead of {}",
                path.display(),
                stored_key,
                key
            ))),
            None => Ok(None),
        }
    }

    fn remove(path: &Path) -> StagingResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StagingStore for FileStaging {
    fn put(&self, key: &StageKey, value: &[u8]) -> StagingResult<()> {
        let _guard = self.lock.write();
        let path = self.entry_path(key);
        let temp = path.with_extension(TEMP_EXT);

        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&encode_entry(key, value))?;
            if self.sync_writes {
                file.sync_all()?;
            }
        }
        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn get(&self, key: &StageKey) -> StagingResult<Option<Vec<u8>>> {
        let _guard = self.lock.read();
        self.read_value(key)
    }

    fn take(&self, key: &StageKey) -> StagingResult<Option<Vec<u8>>> {
        let _guard = self.lock.write();
        let value = self.read_value(key)?;
        if value.is_some() {
            Self::remove(&self.entry_path(key))?;
        }
        Ok(value)
    }

    fn delete(&self, key: &StageKey) -> StagingResult<()> {
        let _guard = self.lock.write();
        Self::remove(&self.entry_path(key))
    }

    fn contains(&self, key: &StageKey) -> StagingResult<bool> {
        let _guard = self.lock.read();
        Ok(self.entry_path(key).exists())
    }

    fn keys(&self) -> StagingResult<Vec<StageKey>> {
        let _guard = self.lock.read();
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some((key, _)) = Self::read_entry(&path)? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn encode_entry(key: &StageKey, value: &[u8]) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(MAGIC.len() + 1 + 8 + key.doc_id.len() + key.rev.len() + value.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&(key.doc_id.len() as u32).to_le_bytes());
    out.extend_from_slice(key.doc_id.as_bytes());
    out.extend_from_slice(&(key.rev.len() as u32).to_le_bytes());
    out.extend_from_slice(key.rev.as_bytes());
    out.extend_from_slice(value);
    out
}

fn decode_entry(bytes: &[u8]) -> StagingResult<(StageKey, Vec<u8>)> {
    let rest = bytes
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| StagingError::Corrupted("bad magic".into()))?;
    let (&version, rest) = rest
        .split_first()
        .ok_or_else(|| StagingError::Corrupted("missing version".into()))?;
    if version != VERSION {
        return Err(StagingError::Corrupted(format!(
            "unsupported entry version {version}"
        )));
    }
    let (doc_id, rest) = read_field(rest, "doc_id")?;
    let (rev, value) = read_field(rest, "rev")?;
    Ok((StageKey::new(doc_id, rev), value.to_vec()))
}

fn read_field<'a>(bytes: &'a [u8], name: &str) -> StagingResult<(String, &'a [u8])> {
    if bytes.len() < 4 {
        return Err(StagingError::Corrupted(format!("truncated {name} length")));
    }
    let (len_bytes, rest) = bytes.split_at(4);
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if rest.len() < len {
        return Err(StagingError::Corrupted(format!("truncated {name}")));
    }
    let (field, rest) = rest.split_at(len);
    let field = String::from_utf8(field.to_vec())
        .map_err(|_| StagingError::Corrupted(format!("{name} is not UTF-8")))?;
    Ok((field, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_put_get() {
        let dir = tempdir().unwrap();
        let store = FileStaging::open(dir.path()).unwrap();
        let key = StageKey::new("doc-1", "replica:1");

        store.put(&key, b"ciphertext").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"ciphertext".to_vec()));
        assert!(store.contains(&key).unwrap());
    }

    #[test]
    fn file_miss_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileStaging::open(dir.path()).unwrap();
        assert!(store.get(&StageKey::new("nope", "1")).unwrap().is_none());
    }

    #[test]
    fn file_delete_twice() {
        let dir = tempdir().unwrap();
        let store = FileStaging::open(dir.path()).unwrap();
        let key = StageKey::new("doc", "1");

        store.delete(&key).unwrap();
        store.put(&key, b"x").unwrap();
        store.delete(&key).unwrap();
        store.delete(&key).unwrap();
        assert!(!store.contains(&key).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn file_take() {
        let dir = tempdir().unwrap();
        let store = FileStaging::open(dir.path()).unwrap().with_sync(true);
        let key = StageKey::new("doc", "1");

        store.put(&key, b"x").unwrap();
        assert_eq!(store.take(&key).unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.take(&key).unwrap(), None);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let key = StageKey::new("doc", "7");

        {
            let store = FileStaging::open(dir.path()).unwrap();
            store.put(&key, b"persistent").unwrap();
        }

        {
            let store = FileStaging::open(dir.path()).unwrap();
            assert_eq!(store.get(&key).unwrap(), Some(b"persistent".to_vec()));
            assert_eq!(store.keys().unwrap(), vec![key]);
        }
    }

    #[test]
    fn file_open_removes_temp_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("deadbeef.tmp");
        fs::write(&stale, b"partial").unwrap();

        let store = FileStaging::open(dir.path()).unwrap();
        assert!(!stale.exists());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn file_corrupted_entry() {
        let dir = tempdir().unwrap();
        let store = FileStaging::open(dir.path()).unwrap();
        let key = StageKey::new("doc", "1");
        store.put(&key, b"x").unwrap();

        fs::write(store.entry_path(&key), b"garbage").unwrap();
        assert!(matches!(store.get(&key), Err(StagingError::Corrupted(_))));
    }

    #[test]
    fn file_empty_value() {
        let dir = tempdir().unwrap();
        let store = FileStaging::open(dir.path()).unwrap();
        let key = StageKey::new("doc", "1");

        store.put(&key, b"").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn entry_codec() {
        let key = StageKey::new("a", "b");
        let encoded = encode_entry(&key, b"value");
        let (decoded_key, value) = decode_entry(&encoded).unwrap();
        assert_eq!(decoded_key, key);
        assert_eq!(value, b"value");

        assert!(decode_entry(&encoded[..7]).is_err());
    }
}
