use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use log::debug;

use super::Storage;
use crate::error::{CryptoError, CryptoResult};

/// Storage rooted at a directory, one file per entry.
///
/// Writes go to a temporary sibling that is renamed into place, so a reader
/// never sees a partially written policy.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

fn io_error(operation: &str, err: std::io::Error) -> CryptoError {
    CryptoError::storage(operation, &err.to_string())
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> CryptoResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| io_error("create storage root", e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> CryptoResult<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CryptoError::storage(
                "resolve path",
                &format!("path {:?} escapes the storage root", path),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for FileStorage {
    fn get(&self, path: &str) -> CryptoResult<Option<Vec<u8>>> {
        match fs::read(self.resolve(path)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("get", e)),
        }
    }

    fn put(&self, path: &str, value: &[u8]) -> CryptoResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("put", e))?;
        }

        let mut tmp = target.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = fs::File::create(&tmp).map_err(|e| io_error("put", e))?;
            file.write_all(value).map_err(|e| io_error("put", e))?;
            file.sync_all().map_err(|e| io_error("put", e))?;
        }
        fs::rename(&tmp, &target).map_err(|e| io_error("put", e))?;
        debug!("stored {} bytes at {}", value.len(), path);
        Ok(())
    }

    fn delete(&self, path: &str) -> CryptoResult<()> {
        match fs::remove_file(self.resolve(path)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete", e)),
        }
    }

    fn list(&self, prefix: &str) -> CryptoResult<Vec<String>> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix.trim_end_matches('/'))?
        };
        let reader = match fs::read_dir(&dir) {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list", e)),
        };

        let mut out = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| io_error("list", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                continue;
            }
            let is_dir = entry.file_type().map_err(|e| io_error("list", e))?.is_dir();
            out.push(if is_dir { format!("{}/", name) } else { name });
        }
        out.sort();
        Ok(out)
    }
}
