//! The small on-disk UNIX-socket rendezvous file (§4.4, §4.7).
//!
//! The header tag is part of the on-disk format and must stay byte-stable;
//! do not change it without a corresponding bump elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use linux_errno::Errno;

/// Fixed tag written before the ASCII decimal port number.
pub const WINFS_UNIX_HEADER: &[u8] = b"WINFSUNIXSOCK\0";

pub trait SpecialFileStore: Send + Sync {
    /// Whether `path` resolves to a host-native (WinFS) file rather than a
    /// virtual one. `bind()` on a UNIX socket fails `EPERM` when false.
    fn is_host_native(&self, path: &Path) -> bool;
    fn create(&self, path: &Path) -> Result<(), Errno>;
    fn write_port(&self, path: &Path, port: u16) -> Result<(), Errno>;
    /// Reads back the port written by `write_port`. `None` if the header is
    /// missing or malformed (not a socket rendezvous file).
    fn read_port(&self, path: &Path) -> Result<Option<u16>, Errno>;
}

/// `std::fs`-backed implementation rooted at a configurable directory,
/// matching [`crate::config::Config::winfs_root`].
pub struct StdFsSpecialFileStore {
    root: PathBuf,
}

impl StdFsSpecialFileStore {
    pub fn new(root: PathBuf) -> Self {
        StdFsSpecialFileStore { root }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl SpecialFileStore for StdFsSpecialFileStore {
    fn is_host_native(&self, path: &Path) -> bool {
        // Every path under std::fs is host-native by construction; a real
        // integration with a guest VFS would check whether the path
        // resolves through a virtual filesystem mount instead.
        let _ = self.resolve(path);
        true
    }

    fn create(&self, path: &Path) -> Result<(), Errno> {
        fs::File::create(self.resolve(path)).map(|_| ()).map_err(|e| {
            log::error!("failed to create UNIX rendezvous file {path:?}: {e}");
            Errno::EACCES
        })
    }

    fn write_port(&self, path: &Path, port: u16) -> Result<(), Errno> {
        let mut contents = Vec::with_capacity(WINFS_UNIX_HEADER.len() + 6);
        contents.extend_from_slice(WINFS_UNIX_HEADER);
        contents.extend_from_slice(port.to_string().as_bytes());
        fs::write(self.resolve(path), contents).map_err(|e| {
            log::error!("failed to write UNIX rendezvous file {path:?}: {e}");
            Errno::EIO
        })
    }

    fn read_port(&self, path: &Path) -> Result<Option<u16>, Errno> {
        let bytes = fs::read(self.resolve(path)).map_err(|e| {
            log::warn!("failed to open UNIX rendezvous file {path:?}: {e}");
            Errno::ECONNREFUSED
        })?;
        Ok(parse_rendezvous(&bytes))
    }
}

fn parse_rendezvous(bytes: &[u8]) -> Option<u16> {
    let rest = bytes.strip_prefix(WINFS_UNIX_HEADER)?;
    std::str::from_utf8(rest).ok()?.trim().parse().ok()
}

/// In-memory store for tests, avoiding real filesystem access.
#[derive(Default)]
pub struct InMemorySpecialFileStore {
    files: std::sync::Mutex<std::collections::HashMap<PathBuf, Vec<u8>>>,
    native: std::sync::Mutex<std::collections::HashSet<PathBuf>>,
}

impl InMemorySpecialFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_virtual(&self, path: &Path) {
        self.native.lock().unwrap().remove(path);
    }
}

impl SpecialFileStore for InMemorySpecialFileStore {
    fn is_host_native(&self, path: &Path) -> bool {
        let mut native = self.native.lock().unwrap();
        native.insert(path.to_path_buf());
        true
    }

    fn create(&self, path: &Path) -> Result<(), Errno> {
        self.files.lock().unwrap().entry(path.to_path_buf()).or_default();
        Ok(())
    }

    fn write_port(&self, path: &Path, port: u16) -> Result<(), Errno> {
        let mut contents = Vec::with_capacity(WINFS_UNIX_HEADER.len() + 6);
        contents.extend_from_slice(WINFS_UNIX_HEADER);
        contents.extend_from_slice(port.to_string().as_bytes());
        self.files.lock().unwrap().insert(path.to_path_buf(), contents);
        Ok(())
    }

    fn read_port(&self, path: &Path) -> Result<Option<u16>, Errno> {
        let files = self.files.lock().unwrap();
        let bytes = files.get(path).ok_or(Errno::ECONNREFUSED)?;
        Ok(parse_rendezvous(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_round_trips_through_the_rendezvous_file() {
        let store = InMemorySpecialFileStore::new();
        let path = Path::new("/tmp/sock-a");
        store.create(path).unwrap();
        store.write_port(path, 54321).unwrap();
        assert_eq!(store.read_port(path).unwrap(), Some(54321));
    }

    #[test]
    fn missing_file_is_econnrefused() {
        let store = InMemorySpecialFileStore::new();
        assert_eq!(store.read_port(Path::new("/tmp/nope")), Err(Errno::ECONNREFUSED));
    }

    #[test]
    fn file_without_the_header_is_not_a_socket_file() {
        let store = InMemorySpecialFileStore::new();
        let path = Path::new("/tmp/plain");
        store.files.lock().unwrap().insert(path.to_path_buf(), b"hello".to_vec());
        assert_eq!(store.read_port(path).unwrap(), None);
    }
}
