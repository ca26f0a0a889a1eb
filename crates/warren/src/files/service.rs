//! File operations on a container's rootfs.

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::FileError;
use super::path::{ContainerPath, resolve_creatable, resolve_entry, resolve_existing};
use crate::container::validate_name;

/// Where container filesystems live and how much may move through the API.
#[derive(Debug, Clone)]
pub struct FileManagerConfig {
    /// Storage pool directory holding `<container>/rootfs`.
    pub storage_root: PathBuf,
    pub max_read_bytes: u64,
    pub max_upload_bytes: u64,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/mnt/lxd-storage/containers"),
            max_read_bytes: 5 * 1024 * 1024,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Octal permission bits, e.g. `"644"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    /// The entry could not be inspected.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub content: String,
    pub size: u64,
}

/// A regular file opened for streaming.
#[derive(Debug)]
pub struct OpenedFile {
    pub file: fs::File,
    pub len: u64,
    pub name: String,
}

/// Reads and edits tenant files directly in the storage pool.
#[derive(Debug, Clone)]
pub struct FileManager {
    config: FileManagerConfig,
}

impl FileManager {
    pub fn new(config: FileManagerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FileManagerConfig {
        &self.config
    }

    /// Host directory holding `container`'s filesystem.
    pub fn rootfs(&self, container: &str) -> Result<PathBuf, FileError> {
        validate_name(container).map_err(|e| FileError::InvalidPath(e.to_string()))?;
        Ok(self.config.storage_root.join(container).join("rootfs"))
    }

    pub async fn list(&self, container: &str, path: &ContainerPath) -> Result<DirectoryListing, FileError> {
        let dir = resolve_existing(&self.rootfs(container)?, path).await?;
        if !fs::metadata(&dir).await?.is_dir() {
            return Err(FileError::NotADirectory);
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(match fs::symlink_metadata(entry.path()).await {
                Ok(meta) => describe(name, &meta),
                Err(e) => {
                    debug!("Cannot inspect {}: {}", entry.path().display(), e);
                    FileEntry {
                        name,
                        size: 0,
                        is_dir: false,
                        is_symlink: false,
                        modified: None,
                        permissions: None,
                        error: true,
                    }
                }
            });
        }

        files.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(DirectoryListing {
            path: path.to_string(),
            files,
        })
    }

    /// Text content of a file, lossily decoded as UTF-8.
    pub async fn read(&self, container: &str, path: &ContainerPath) -> Result<FileContent, FileError> {
        let host = self.readable(container, path).await?;
        let meta = fs::metadata(&host).await?;
        if meta.is_dir() {
            return Err(FileError::NotAFile);
        }
        if meta.len() > self.config.max_read_bytes {
            return Err(FileError::FileTooLarge {
                size: meta.len(),
                limit: self.config.max_read_bytes,
            });
        }

        let bytes = fs::read(&host).await?;
        Ok(FileContent {
            size: bytes.len() as u64,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Create or replace a file. Its directory must already exist.
    pub async fn write(&self, container: &str, path: &ContainerPath, content: &[u8]) -> Result<(), FileError> {
        if path.is_root() {
            return Err(FileError::NotAFile);
        }
        let host = resolve_creatable(&self.rootfs(container)?, path).await?;
        if fs::metadata(&host).await.is_ok_and(|meta| meta.is_dir()) {
            return Err(FileError::NotAFile);
        }

        info!("Writing {} in {} ({} bytes)", path, container, content.len());
        fs::write(&host, content).await.map_err(|e| missing_as(e, path))
    }

    /// Create a directory and any missing parents.
    pub async fn mkdir(&self, container: &str, path: &ContainerPath) -> Result<(), FileError> {
        let host = resolve_creatable(&self.rootfs(container)?, path).await?;
        match fs::metadata(&host).await {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(FileError::AlreadyExists(path.to_string())),
            Err(_) => {}
        }

        info!("Creating directory {} in {}", path, container);
        fs::create_dir_all(&host).await?;
        Ok(())
    }

    /// Remove a file, link or directory tree. `/` and `/root` are refused.
    pub async fn delete(&self, container: &str, path: &ContainerPath) -> Result<(), FileError> {
        if path.is_protected() {
            return Err(FileError::InvalidPath(format!("cannot delete {}", path)));
        }
        let host = resolve_entry(&self.rootfs(container)?, path).await?;
        let meta = fs::symlink_metadata(&host)
            .await
            .map_err(|e| missing_as(e, path))?;

        info!("Deleting {} in {}", path, container);
        if meta.is_dir() {
            fs::remove_dir_all(&host).await?;
        } else {
            fs::remove_file(&host).await?;
        }
        Ok(())
    }

    /// Move an entry. The destination must not exist.
    pub async fn rename(&self, container: &str, from: &ContainerPath, to: &ContainerPath) -> Result<(), FileError> {
        if from.is_protected() || to.is_root() {
            return Err(FileError::InvalidPath(format!("cannot move {}", from)));
        }
        let rootfs = self.rootfs(container)?;
        let source = resolve_entry(&rootfs, from).await?;
        fs::symlink_metadata(&source)
            .await
            .map_err(|e| missing_as(e, from))?;

        let target = resolve_entry(&rootfs, to).await?;
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(FileError::AlreadyExists(to.to_string()));
        }

        info!("Renaming {} -> {} in {}", from, to, container);
        fs::rename(&source, &target).await?;
        Ok(())
    }

    /// Open a regular file for download.
    pub async fn open(&self, container: &str, path: &ContainerPath) -> Result<OpenedFile, FileError> {
        let host = self.readable(container, path).await?;
        let meta = fs::metadata(&host).await?;
        if !meta.is_file() {
            return Err(FileError::NotAFile);
        }

        Ok(OpenedFile {
            file: fs::File::open(&host).await?,
            len: meta.len(),
            name: path.file_name().unwrap_or("download").to_string(),
        })
    }

    /// Stream `body` into `dir/<filename>`, creating `dir` when missing.
    ///
    /// Data lands in a temporary file that replaces the target once complete.
    pub async fn upload<S, E>(
        &self,
        container: &str,
        dir: &ContainerPath,
        filename: &str,
        mut body: S,
    ) -> Result<ContainerPath, FileError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let target = dir.join(filename);
        let host_dir = resolve_creatable(&self.rootfs(container)?, dir).await?;
        fs::create_dir_all(&host_dir).await?;

        let host = host_dir.join(filename);
        if let Ok(meta) = fs::symlink_metadata(&host).await {
            if meta.file_type().is_symlink() {
                warn!("Refusing to replace link {} in {}", target, container);
                return Err(FileError::Restricted(target.to_string()));
            }
            if meta.is_dir() {
                return Err(FileError::NotAFile);
            }
        }

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp = host_dir.join(format!(".upload-{}-{}", filename, nonce));

        let written = copy_limited(&temp, &mut body, self.config.max_upload_bytes).await;
        let total = match written {
            Ok(total) => total,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        fs::rename(&temp, &host).await?;
        info!("Uploaded {} to {} ({} bytes)", target, container, total);
        Ok(target)
    }

    /// Apparent size of the container's filesystem, `None` when it is not on this host.
    pub async fn disk_usage(&self, container: &str) -> Option<u64> {
        let rootfs = self.rootfs(container).ok()?;
        tokio::task::spawn_blocking(move || tree_size(&rootfs))
            .await
            .ok()
            .flatten()
    }

    async fn readable(&self, container: &str, path: &ContainerPath) -> Result<PathBuf, FileError> {
        if path.is_virtual() {
            return Err(FileError::Restricted(path.to_string()));
        }
        resolve_existing(&self.rootfs(container)?, path).await
    }
}

fn describe(name: String, meta: &std::fs::Metadata) -> FileEntry {
    FileEntry {
        name,
        size: meta.len(),
        is_dir: meta.is_dir(),
        is_symlink: meta.file_type().is_symlink(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        permissions: Some(format!("{:o}", meta.permissions().mode() & 0o777)),
        error: false,
    }
}

fn missing_as(err: std::io::Error, path: &ContainerPath) -> FileError {
    if err.kind() == ErrorKind::NotFound {
        FileError::NotFound(path.to_string())
    } else {
        FileError::Io(err)
    }
}

async fn copy_limited<S, E>(temp: &Path, body: &mut S, limit: u64) -> Result<u64, FileError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut file = fs::File::create(temp).await?;
    let mut total = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            FileError::Io(std::io::Error::new(ErrorKind::InvalidData, e.to_string()))
        })?;
        total = total.saturating_add(chunk.len() as u64);
        if total > limit {
            return Err(FileError::FileTooLarge { size: total, limit });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(total)
}

fn tree_size(root: &Path) -> Option<u64> {
    if !root.is_dir() {
        return None;
    }
    let total = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum();
    Some(total)
}
