use super::{dir_prefix, key_segments, ObjectStat, ObjectStore, WriteMode};
use crate::error::{BlobmuxError, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const TEMP_SUFFIX: &str = ".blobmux-tmp";

/// Object store backed by a directory on the local filesystem.
///
/// Keys map to relative paths below `root`. Overwrites go through a temp file
/// and rename; creates link a fully written temp file into place, so the
/// create fails atomically when the target exists and readers never observe a
/// half-written object.
///
/// Conditional deletes use the stat-then-delete default: two processes racing
/// to delete the same stale record can, in a narrow window, remove a record
/// that was rewritten in between.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Store rooted in the platform data directory.
    pub fn default_root() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "blobmux").ok_or_else(|| {
            BlobmuxError::Other(
                "Failed to determine a data directory. \
                 Pass an explicit --root instead."
                    .to_string(),
            )
        })?;
        Ok(proj_dirs.data_dir().join("store"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let segments = key_segments(key)?;
        if segments.iter().any(|s| s.ends_with(TEMP_SUFFIX)) {
            return Err(BlobmuxError::InvalidKey {
                key: key.to_string(),
                message: format!("segments ending in '{}' are reserved", TEMP_SUFFIX),
            });
        }
        Ok(segments
            .iter()
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    fn ensure_parent(&self, key: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BlobmuxError::from_io(key, e))?;
        }
        Ok(())
    }

    fn create_new(&self, key: &str, path: &Path, data: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BlobmuxError::InvalidKey {
                key: key.to_string(),
                message: "no file name".to_string(),
            })?;
        let temp = path.with_file_name(format!(
            ".{}.{}{}",
            file_name,
            uuid::Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        let written = fs::write(&temp, data).and_then(|_| fs::hard_link(&temp, path));
        if let Err(e) = fs::remove_file(&temp) {
            debug!("Failed to remove temp file {}: {}", temp.display(), e);
        }
        written.map_err(|e| BlobmuxError::from_io(key, e))
    }

    fn overwrite(&self, key: &str, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = atomic_write_file::AtomicWriteFile::open(path)
            .map_err(|e| BlobmuxError::from_io(key, e))?;
        file.write_all(data)
            .map_err(|e| BlobmuxError::from_io(key, e))?;
        file.commit().map_err(|e| BlobmuxError::from_io(key, e))
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        Some(segments?.join("/"))
    }
}

/// Short content digest used as the version token.
fn content_version(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

impl ObjectStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::symlink_metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobmuxError::from_io(key, e)),
        }
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| BlobmuxError::from_io(key, e))
    }

    fn write(&self, key: &str, data: &[u8], mode: WriteMode) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        self.ensure_parent(key, &path)?;
        match mode {
            WriteMode::CreateNew => self.create_new(key, &path, data)?,
            WriteMode::Overwrite => self.overwrite(key, &path, data)?,
        }
        Ok(Some(content_version(data)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Already absent: {}", path.display());
                Ok(())
            }
            Err(e) => Err(BlobmuxError::from_io(key, e)),
        }
    }

    fn stat(&self, key: &str) -> Result<ObjectStat> {
        let path = self.path_for(key)?;
        let metadata = fs::metadata(&path).map_err(|e| BlobmuxError::from_io(key, e))?;
        if !metadata.is_file() {
            return Err(BlobmuxError::NotFound(key.to_string()));
        }
        let modified: DateTime<Utc> = metadata
            .modified()
            .map_err(|e| BlobmuxError::from_io(key, e))?
            .into();
        let content = fs::read(&path).map_err(|e| BlobmuxError::from_io(key, e))?;
        Ok(ObjectStat {
            modified_at: modified,
            version: Some(content_version(&content)),
            size: content.len() as u64,
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(prefix);
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.path_for(prefix.trim_end_matches('/'))?
        };

        let mut keys = Vec::new();
        match fs::symlink_metadata(&dir) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Ok(keys),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(BlobmuxError::from_io(&prefix, e)),
        }

        visit_directory(&dir, &mut |path| {
            if let Some(key) = self.relative_key(path) {
                keys.push(key);
            }
        })
        .map_err(|e| BlobmuxError::from_io(&prefix, e))?;

        keys.sort();
        Ok(keys)
    }
}

fn visit_directory<F>(dir: &Path, visitor: &mut F) -> io::Result<()>
where
    F: FnMut(&Path),
{
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        // Get file type WITHOUT following symlinks
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            debug!("Skipping symlink: {}", path.display());
            continue;
        }

        if file_type.is_dir() {
            visit_directory(&path, visitor)?;
        } else if file_type.is_file() {
            let in_flight = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(TEMP_SUFFIX));
            if !in_flight {
                visitor(&path);
            }
        }
    }
    Ok(())
}
