//! Sandboxed filename → file stream resolver.
//!
//! [`FileStore`] maps the filename field of a request to a file underneath a
//! configured root directory. Resolution never touches the filesystem until
//! the name has been reduced to a safe relative path:
//!
//! 1. Names containing NUL are rejected.
//! 2. Backslashes are treated as separators (requests from Windows clients),
//!    and any component containing `:` is rejected (drive letters, alternate
//!    data streams).
//! 3. The path is rebuilt component by component; `.` is dropped, while
//!    `..`, root, and prefix components are rejected outright.
//!
//! Failures surface as the wire [`ErrorKind`] the session should answer
//! with, per the resolver contract.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::frame::ErrorKind;

/// Legacy guardrail: files at least this long cannot be served.
const MAX_READ_SIZE: u64 = i32::MAX as u64 - 1;

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Resolver rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open `name` for reading and report its size (feeds the `tsize`
    /// option).
    pub fn open_read(&self, name: &str) -> Result<(File, u64), ErrorKind> {
        let path = self.resolve(name)?;
        let meta = path.metadata().map_err(map_io)?;
        if !meta.is_file() {
            return Err(ErrorKind::FileNotFound);
        }
        if meta.len() > MAX_READ_SIZE {
            return Err(ErrorKind::AccessViolation);
        }
        let file = File::open(&path).map_err(map_io)?;
        Ok((file, meta.len()))
    }

    /// Create `name` for exclusive writing; refuses to overwrite.
    pub fn open_write(&self, name: &str) -> Result<File, ErrorKind> {
        let path = self.resolve(name)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(map_io)
    }

    /// Delete `name`; used to discard a target created for a write that
    /// never started, so a retry is not refused as already existing.
    pub fn remove(&self, name: &str) -> Result<(), ErrorKind> {
        let path = self.resolve(name)?;
        fs::remove_file(path).map_err(map_io)
    }

    /// Reduce a requested name to a path under the root, or refuse it.
    fn resolve(&self, name: &str) -> Result<PathBuf, ErrorKind> {
        if name.is_empty() || name.contains('\0') || name.contains(':') {
            return Err(ErrorKind::AccessViolation);
        }
        let normalized = name.replace('\\', "/");

        let mut safe = PathBuf::new();
        for component in Path::new(&normalized).components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => safe.push(part),
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ErrorKind::AccessViolation);
                }
            }
        }
        if safe.as_os_str().is_empty() {
            return Err(ErrorKind::AccessViolation);
        }
        Ok(self.root.join(safe))
    }
}

fn map_io(e: io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::FileNotFound,
        io::ErrorKind::AlreadyExists => ErrorKind::FileAlreadyExists,
        io::ErrorKind::PermissionDenied => ErrorKind::AccessViolation,
        _ => ErrorKind::NotDefined,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn store_with(files: &[(&str, &[u8])]) -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn open_read_returns_stream_and_size() {
        let (_dir, store) = store_with(&[("hello.txt", b"Hello")]);
        let (mut file, size) = store.open_read("hello.txt").unwrap();
        assert_eq!(size, 5);
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "Hello");
    }

    #[test]
    fn open_read_in_subdirectory() {
        let (_dir, store) = store_with(&[("boot/pxe/kernel.img", b"\x7fELF")]);
        let (_file, size) = store.open_read("boot/pxe/kernel.img").unwrap();
        assert_eq!(size, 4);
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let (_dir, store) = store_with(&[]);
        assert_eq!(store.open_read("nope.bin").unwrap_err(), ErrorKind::FileNotFound);
    }

    #[test]
    fn directory_is_not_readable() {
        let (_dir, store) = store_with(&[("sub/file", b"x")]);
        assert_eq!(store.open_read("sub").unwrap_err(), ErrorKind::FileNotFound);
    }

    #[test]
    fn unsafe_names_never_resolve() {
        let (_dir, store) = store_with(&[("ok.txt", b"x")]);
        let unsafe_names = [
            "../../etc/passwd",
            "..",
            "a/../../b",
            "/etc/passwd",
            "..\\..\\secrets.txt",
            "C:\\windows\\system.ini",
            "file.txt:stream",
            "nul\0byte",
            "",
        ];
        for name in unsafe_names {
            assert_eq!(
                store.open_read(name).unwrap_err(),
                ErrorKind::AccessViolation,
                "name {name:?} must be refused"
            );
            assert_eq!(
                store.open_write(name).unwrap_err(),
                ErrorKind::AccessViolation,
                "name {name:?} must be refused for writing"
            );
        }
    }

    #[test]
    fn dot_segments_are_dropped_not_fatal() {
        let (_dir, store) = store_with(&[("sub/file.txt", b"data")]);
        let (_file, size) = store.open_read("./sub/./file.txt").unwrap();
        assert_eq!(size, 4);
    }

    #[test]
    fn backslash_separators_resolve_inside_root() {
        let (_dir, store) = store_with(&[("sub/win.txt", b"ok")]);
        let (_file, size) = store.open_read("sub\\win.txt").unwrap();
        assert_eq!(size, 2);
    }

    #[test]
    fn open_write_creates_new_file() {
        let (dir, store) = store_with(&[]);
        let mut file = store.open_write("fresh.bin").unwrap();
        use std::io::Write;
        file.write_all(b"payload").unwrap();
        drop(file);
        assert_eq!(fs::read(dir.path().join("fresh.bin")).unwrap(), b"payload");
    }

    #[test]
    fn open_write_refuses_existing_file() {
        let (_dir, store) = store_with(&[("existing.txt", b"old")]);
        assert_eq!(
            store.open_write("existing.txt").unwrap_err(),
            ErrorKind::FileAlreadyExists
        );
    }

    #[test]
    fn remove_discards_a_created_file() {
        let (dir, store) = store_with(&[]);
        let file = store.open_write("halfway.bin").unwrap();
        drop(file);

        store.remove("halfway.bin").unwrap();
        assert!(!dir.path().join("halfway.bin").exists());
        // The name is free for a fresh create again.
        store.open_write("halfway.bin").unwrap();
    }

    #[test]
    fn open_write_needs_existing_parent() {
        let (_dir, store) = store_with(&[]);
        assert_eq!(
            store.open_write("no_dir/file.bin").unwrap_err(),
            ErrorKind::FileNotFound
        );
    }
}
