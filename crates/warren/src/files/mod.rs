//! File manager for tenant containers.
//!
//! Paths are container paths (`/root/notes.md`) resolved below the
//! container's rootfs in the LXD storage pool, and never reach outside it.

mod error;
mod path;
mod service;

pub use error::FileError;
pub use path::{ContainerPath, sanitize_filename};
pub use service::{
    DirectoryListing, FileContent, FileEntry, FileManager, FileManagerConfig, OpenedFile,
};
