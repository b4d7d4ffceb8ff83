//! UNIX-domain sockets are proxied as TCP-loopback sockets whose rendezvous
//! is a filesystem path (§4.4).

use std::path::{Path, PathBuf};

use linux_errno::Errno;

use crate::abi::sockaddr;
use crate::host::socket_backend::{SocketBackend, SocketHandle};
use crate::host::special_file::SpecialFileStore;

/// `sa_family` is two bytes; the rest of a UNIX `sockaddr_un` is the path.
const PATH_OFFSET: usize = 2;

/// Extracts and validates the path embedded in a `sockaddr_un`. Rejects the
/// abstract namespace (first path byte zero with more bytes following),
/// which this bridge does not support.
pub fn parse_unix_path(addr: &[u8]) -> Result<PathBuf, Errno> {
    if addr.len() <= PATH_OFFSET {
        return Err(Errno::EINVAL);
    }
    let path_bytes = &addr[PATH_OFFSET..];
    if path_bytes.is_empty() {
        return Err(Errno::EINVAL);
    }
    if path_bytes[0] == 0 && path_bytes.len() > 1 {
        log::error!("abstract UNIX sockaddr not supported");
        return Err(Errno::EINVAL);
    }
    let end = path_bytes.iter().position(|&b| b == 0).unwrap_or(path_bytes.len());
    let text = std::str::from_utf8(&path_bytes[..end]).map_err(|_| Errno::EINVAL)?;
    if text.is_empty() {
        return Err(Errno::EINVAL);
    }
    Ok(PathBuf::from(text))
}

/// Binds a UNIX-family socket: creates the rendezvous file, binds the real
/// socket to loopback:0, and writes the assigned port into the file.
pub fn bind(
    backend: &dyn SocketBackend,
    store: &dyn SpecialFileStore,
    handle: &SocketHandle,
    path: &Path,
) -> Result<(), Errno> {
    if !store.is_host_native(path) {
        return Err(Errno::EPERM);
    }
    store.create(path)?;
    backend.bind(handle, &sockaddr::loopback_sockaddr_in(0))?;
    let name = backend.getsockname(handle)?;
    if name.len() < 4 {
        return Err(Errno::EIO);
    }
    let port = u16::from_be_bytes([name[2], name[3]]);
    store.write_port(path, port)
}

/// Connects a UNIX-family socket: reads the rendezvous file's port and
/// connects to loopback:port. Fails `ECONNREFUSED` if the header is missing
/// or malformed, matching a dead/non-listening peer.
pub fn connect(
    backend: &dyn SocketBackend,
    store: &dyn SpecialFileStore,
    handle: &SocketHandle,
    path: &Path,
) -> Result<(), Errno> {
    let port = store.read_port(path)?.ok_or(Errno::ECONNREFUSED)?;
    backend.connect(handle, &sockaddr::loopback_sockaddr_in(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::address_family::HostFamily;
    use crate::host::socket_backend::loopback::LoopbackBackend;
    use crate::host::special_file::InMemorySpecialFileStore;

    #[test]
    fn abstract_namespace_is_rejected() {
        let mut addr = vec![0u8; 2];
        addr.extend_from_slice(&[0, b'x']);
        assert_eq!(parse_unix_path(&addr), Err(Errno::EINVAL));
    }

    #[test]
    fn empty_path_is_rejected() {
        let addr = vec![0u8; 2];
        assert_eq!(parse_unix_path(&addr), Err(Errno::EINVAL));
    }

    #[test]
    fn ordinary_path_parses() {
        let mut addr = vec![0u8; 2];
        addr.extend_from_slice(b"/tmp/x.sock\0");
        assert_eq!(parse_unix_path(&addr).unwrap(), PathBuf::from("/tmp/x.sock"));
    }

    #[test]
    fn bind_writes_assigned_port_then_connect_reads_it_back() {
        let backend = LoopbackBackend::new();
        let store = InMemorySpecialFileStore::new();
        let handle = backend.create(HostFamily::Inet, 1, 0).unwrap();
        let path = Path::new("/tmp/rendezvous");

        bind(&backend, &store, &handle, path).unwrap();

        let client = backend.create(HostFamily::Inet, 1, 0).unwrap();
        connect(&backend, &store, &client, path).unwrap();
        assert!(backend.getpeername(&client).is_ok());
    }

    #[test]
    fn connect_without_a_prior_bind_is_econnrefused() {
        let backend = LoopbackBackend::new();
        let store = InMemorySpecialFileStore::new();
        let handle = backend.create(HostFamily::Inet, 1, 0).unwrap();
        assert_eq!(
            connect(&backend, &store, &handle, Path::new("/tmp/nope")),
            Err(Errno::ECONNREFUSED)
        );
    }
}
