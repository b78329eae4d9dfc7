//! Arena files: create-or-open, mapping, and path resolution.
//!
//! Relative paths resolve against the `A0_ROOT` environment variable
//! (default `/dev/shm`). Creation goes through a unique temp file that is
//! hard-linked into place, so two processes racing to create the same arena
//! both end up mapping the same fully-sized, zeroed file.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use serde::Deserialize;

use crate::arena::{Arena, ArenaMode};

/// Environment variable naming the root directory for relative arena paths.
pub const ROOT_ENV: &str = "A0_ROOT";

const DEFAULT_ROOT: &str = "/dev/shm";

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("empty arena path")]
    EmptyPath,

    #[error("arena root '{0}' is not an absolute path")]
    BadRoot(String),

    #[error("failed to open '{path}'")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create '{path}'")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to map '{path}'")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove '{path}'")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Options applied when an arena file has to be created.
#[derive(Debug, Clone, Deserialize)]
pub struct FileOptions {
    /// Size of a newly created arena file in bytes.
    #[serde(default = "defaults::size")]
    pub size: u64,
    /// Permission bits for a newly created arena file.
    #[serde(default = "defaults::mode")]
    pub mode: u32,
    /// Permission bits for directories created along the way.
    #[serde(default = "defaults::dir_mode")]
    pub dir_mode: u32,
    /// How the mapped arena will be used.
    #[serde(default)]
    pub arena_mode: ArenaMode,
}

mod defaults {
    pub fn size() -> u64 {
        16 * 1024 * 1024
    }

    /// Global read+write.
    pub fn mode() -> u32 {
        (libc::S_IRUSR | libc::S_IWUSR | libc::S_IRGRP | libc::S_IWGRP | libc::S_IROTH
            | libc::S_IWOTH) as u32
    }

    /// Global read+write+execute.
    pub fn dir_mode() -> u32 {
        (libc::S_IRWXU | libc::S_IRWXG | libc::S_IRWXO) as u32
    }
}

impl Default for FileOptions {
    fn default() -> Self {
        FileOptions {
            size: defaults::size(),
            mode: defaults::mode(),
            dir_mode: defaults::dir_mode(),
            arena_mode: ArenaMode::default(),
        }
    }
}

/// Resolves an arena path. Absolute paths pass through unchanged; relative
/// paths join the `A0_ROOT` root.
pub fn resolve(path: impl AsRef<Path>) -> Result<PathBuf, FileError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(FileError::EmptyPath);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let root = std::env::var_os(ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
    if root.as_os_str().is_empty() || !root.is_absolute() {
        return Err(FileError::BadRoot(root.display().to_string()));
    }
    Ok(root.join(path))
}

/// Removes a single arena file.
pub fn remove(path: impl AsRef<Path>) -> Result<(), FileError> {
    let path = resolve(path)?;
    fs::remove_file(&path).map_err(|source| FileError::Remove { path, source })
}

/// Removes an arena directory tree.
pub fn remove_all(path: impl AsRef<Path>) -> Result<(), FileError> {
    let path = resolve(path)?;
    fs::remove_dir_all(&path).map_err(|source| FileError::Remove { path, source })
}

/// An arena backed by a mapped file.
pub struct ArenaFile {
    path: PathBuf,
    arena: Arena,
}

impl ArenaFile {
    /// Opens the arena file at `path`, creating it (per `opts`) if missing.
    pub fn open(path: impl AsRef<Path>, opts: &FileOptions) -> Result<ArenaFile, FileError> {
        let path = resolve(path)?;

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(opts.dir_mode)
                    .create(dir)
                    .or_else(ignore_already_exists)
                    .map_err(|source| FileError::Create { path: dir.to_path_buf(), source })?;
            }
        }

        loop {
            let read_write = opts.arena_mode != ArenaMode::ReadOnly;
            match OpenOptions::new().read(true).write(read_write).open(&path) {
                Ok(file) => return Self::map(path, file, opts),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(FileError::Open { path, source }),
            }

            // Missing: build a fully-initialized temp file, then link it
            // into place. A lost race just means someone else finished the
            // same job; retry the open.
            match Self::create_via_tmp(&path, opts) {
                Ok(()) => {}
                Err(source) if source.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => return Err(FileError::Create { path, source }),
            }
        }
    }

    fn create_via_tmp(path: &Path, opts: &FileOptions) -> io::Result<()> {
        static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(
            ".basalt_mkstemp.{}.{}",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed),
        ));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        let init = (|| {
            file.set_permissions(Permissions::from_mode(opts.mode))?;
            file.set_len(opts.size)?;
            fs::hard_link(&tmp, path)
        })();
        let _ = fs::remove_file(&tmp);
        init
    }

    fn map(path: PathBuf, file: File, opts: &FileOptions) -> Result<ArenaFile, FileError> {
        let arena = match opts.arena_mode {
            ArenaMode::ReadOnly => {
                let map = unsafe { MmapOptions::new().map_copy_read_only(&file) }
                    .map_err(|source| FileError::Map { path: path.clone(), source })?;
                Arena::from_map(map, file)
            }
            mode => {
                let map = unsafe { MmapMut::map_mut(&file) }
                    .map_err(|source| FileError::Map { path: path.clone(), source })?;
                Arena::from_map_mut(map, file, mode)
            }
        };
        Ok(ArenaFile { path, arena })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn into_arena(self) -> Arena {
        self.arena
    }
}

fn ignore_already_exists(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::AlreadyExists {
        Ok(())
    } else {
        Err(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(tag: &str) -> String {
        format!("/tmp/basalt_arena_test_{tag}_{}", std::process::id())
    }

    #[test]
    fn resolve_passes_absolute_paths_through() {
        let p = resolve("/tmp/foo.a0").unwrap();
        assert_eq!(p, PathBuf::from("/tmp/foo.a0"));
    }

    #[test]
    fn resolve_rejects_empty() {
        assert!(matches!(resolve(""), Err(FileError::EmptyPath)));
    }

    #[test]
    fn create_then_reopen_sees_same_bytes() {
        let path = test_path("roundtrip");
        let opts = FileOptions { size: 4096, ..FileOptions::default() };

        {
            let file = ArenaFile::open(&path, &opts).unwrap();
            assert_eq!(file.arena().len(), 4096);
            unsafe {
                let p = file.arena().as_ptr();
                *p = 0xAB;
                *p.add(1) = 0xCD;
            }
        }
        {
            let file = ArenaFile::open(&path, &opts).unwrap();
            unsafe {
                let p = file.arena().as_ptr();
                assert_eq!(*p, 0xAB);
                assert_eq!(*p.add(1), 0xCD);
            }
        }

        remove(&path).unwrap();
    }

    #[test]
    fn new_file_is_zeroed_to_size() {
        let path = test_path("zeroed");
        let opts = FileOptions { size: 8192, ..FileOptions::default() };

        let file = ArenaFile::open(&path, &opts).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(file.arena().as_ptr(), file.arena().len()) };
        assert_eq!(bytes.len(), 8192);
        assert!(bytes.iter().all(|&b| b == 0));

        remove(&path).unwrap();
    }

    #[test]
    fn readonly_mapping_observes_writers() {
        let path = test_path("readonly");
        let opts = FileOptions { size: 4096, ..FileOptions::default() };

        let writer = ArenaFile::open(&path, &opts).unwrap();
        unsafe { *writer.arena().as_ptr() = 0x5A };

        let ro_opts = FileOptions { arena_mode: ArenaMode::ReadOnly, ..opts };
        let reader = ArenaFile::open(&path, &ro_opts).unwrap();
        assert_eq!(reader.arena().mode(), ArenaMode::ReadOnly);
        assert_eq!(unsafe { *reader.arena().as_ptr() }, 0x5A);

        remove(&path).unwrap();
    }
}
