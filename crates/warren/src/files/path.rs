//! Container paths and their confinement to a rootfs on the host.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use log::warn;
use tokio::fs;

use super::FileError;

/// Pseudo filesystems that are never read through the file manager.
const VIRTUAL_ROOTS: &[&str] = &["dev", "proc", "sys"];

/// Directories that may not be deleted or renamed.
const PROTECTED: &[&str] = &["/", "/root"];

/// Longest file name kept by [`sanitize_filename`].
const MAX_FILENAME_LEN: usize = 255;

/// A normalized absolute path inside a container.
///
/// Built from segments only: `..` is rejected outright rather than resolved,
/// and `.` or repeated separators are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPath {
    segments: Vec<String>,
}

impl ContainerPath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, FileError> {
        if raw.contains('\0') {
            return Err(FileError::InvalidPath("path contains a null byte".to_string()));
        }

        let mut segments = Vec::new();
        for component in Path::new(raw).components() {
            match component {
                Component::RootDir | Component::CurDir => continue,
                Component::Normal(name) => segments.push(name.to_string_lossy().into_owned()),
                Component::ParentDir => {
                    warn!("Rejected container path with '..': {:?}", raw);
                    return Err(FileError::PathTraversal);
                }
                Component::Prefix(_) => return Err(FileError::PathTraversal),
            }
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Under `/dev`, `/proc` or `/sys`.
    pub fn is_virtual(&self) -> bool {
        self.segments
            .first()
            .is_some_and(|first| VIRTUAL_ROOTS.contains(&first.as_str()))
    }

    pub fn is_protected(&self) -> bool {
        PROTECTED.contains(&self.to_string().as_str())
    }

    /// Host location below `rootfs`, links not followed.
    fn under(&self, rootfs: &Path) -> PathBuf {
        self.segments.iter().fold(rootfs.to_path_buf(), |path, segment| path.join(segment))
    }
}

impl fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

async fn canonical_rootfs(rootfs: &Path) -> Result<PathBuf, FileError> {
    match fs::canonicalize(rootfs).await {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(FileError::NotFound(
            "container filesystem".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

fn confine(canonical_root: &Path, canonical: PathBuf, path: &ContainerPath) -> Result<PathBuf, FileError> {
    if canonical.starts_with(canonical_root) {
        Ok(canonical)
    } else {
        warn!("Container path {} resolves outside its rootfs", path);
        Err(FileError::PathTraversal)
    }
}

/// Resolve an existing path, following links, and require it to stay inside `rootfs`.
pub(crate) async fn resolve_existing(rootfs: &Path, path: &ContainerPath) -> Result<PathBuf, FileError> {
    let root = canonical_rootfs(rootfs).await?;
    match fs::canonicalize(path.under(rootfs)).await {
        Ok(canonical) => confine(&root, canonical, path),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(FileError::NotFound(path.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Resolve a path that may not exist yet.
///
/// The longest existing prefix is canonicalized and confined; the missing
/// tail is appended unchanged.
pub(crate) async fn resolve_creatable(rootfs: &Path, path: &ContainerPath) -> Result<PathBuf, FileError> {
    let root = canonical_rootfs(rootfs).await?;
    for existing in (0..=path.segments.len()).rev() {
        let prefix = ContainerPath {
            segments: path.segments[..existing].to_vec(),
        };
        match fs::canonicalize(prefix.under(rootfs)).await {
            Ok(canonical) => {
                let base = confine(&root, canonical, path)?;
                return Ok(path.segments[existing..]
                    .iter()
                    .fold(base, |host, segment| host.join(segment)));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(root)
}

/// Location of the entry itself: the parent is resolved and confined, the
/// final component is not followed. Used to delete or move links.
pub(crate) async fn resolve_entry(rootfs: &Path, path: &ContainerPath) -> Result<PathBuf, FileError> {
    let (Some(name), Some(parent)) = (path.file_name(), path.parent()) else {
        return Err(FileError::InvalidPath("the container root".to_string()));
    };
    Ok(resolve_existing(rootfs, &parent).await?.join(name))
}

/// Make an uploaded file name safe: anything outside `[A-Za-z0-9._-]`
/// becomes `_`, leading dots are dropped.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_FILENAME_LEN).collect())
}
