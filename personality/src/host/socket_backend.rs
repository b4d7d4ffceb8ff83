//! The concrete host socket calls, isolated behind a trait so the vtable
//! logic in [`crate::socket`] never mentions `windows-sys` directly (§4.12).

use std::any::Any;
use std::sync::Arc;

use linux_errno::Errno;

use crate::abi::address_family::HostFamily;
use crate::host::process::ForkCookie;
use crate::reactor::DrainedEvents;

/// An opaque handle to a host socket. Backends stash whatever they need
/// (a raw `SOCKET`, or an in-memory queue pair) behind the `Any` object;
/// callers never inspect it directly.
#[derive(Clone)]
pub struct SocketHandle(pub Arc<dyn Any + Send + Sync>);

impl SocketHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        SocketHandle(Arc::new(value))
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

pub trait SocketBackend: Send + Sync {
    fn create(&self, family: HostFamily, ty: i32, protocol: i32) -> Result<SocketHandle, Errno>;
    fn bind(&self, handle: &SocketHandle, addr: &[u8]) -> Result<(), Errno>;
    fn connect(&self, handle: &SocketHandle, addr: &[u8]) -> Result<(), Errno>;
    fn listen(&self, handle: &SocketHandle, backlog: i32) -> Result<(), Errno>;
    fn accept(&self, handle: &SocketHandle) -> Result<(SocketHandle, Vec<u8>), Errno>;
    fn send(&self, handle: &SocketHandle, buf: &[u8], flags: i32) -> Result<usize, Errno>;
    fn recv(&self, handle: &SocketHandle, buf: &mut [u8], flags: i32) -> Result<usize, Errno>;
    fn send_to(&self, handle: &SocketHandle, buf: &[u8], flags: i32, addr: Option<&[u8]>) -> Result<usize, Errno>;
    fn recv_from(&self, handle: &SocketHandle, buf: &mut [u8], flags: i32) -> Result<(usize, Option<Vec<u8>>), Errno>;
    fn shutdown(&self, handle: &SocketHandle, how: i32) -> Result<(), Errno>;
    fn getsockname(&self, handle: &SocketHandle) -> Result<Vec<u8>, Errno>;
    fn getpeername(&self, handle: &SocketHandle) -> Result<Vec<u8>, Errno>;
    fn setsockopt(&self, handle: &SocketHandle, host_level: i32, host_name: i32, value: &[u8]) -> Result<(), Errno>;
    fn getsockopt(&self, handle: &SocketHandle, host_level: i32, host_name: i32, out: &mut [u8]) -> Result<usize, Errno>;
    fn close(&self, handle: &SocketHandle);
    fn duplicate_for_child(&self, handle: &SocketHandle, cookie: ForkCookie) -> Result<Vec<u8>, Errno>;
    fn recreate_from_cookie(&self, cookie: &[u8]) -> Result<SocketHandle, Errno>;
    /// Drains the host's accumulated network-events record for `handle`,
    /// as `WSAEnumNetworkEvents` would after a prior `WSAEventSelect`.
    fn drain_events(&self, handle: &SocketHandle) -> DrainedEvents;
}

#[cfg(windows)]
pub mod windows_backend {
    //! Binds [`SocketBackend`] to real WinSock calls via `windows-sys`,
    //! matching the binding style used elsewhere in the Rust ecosystem for
    //! Windows-hosted networking (cf. the `mio`/`minidumper` Windows
    //! backends).

    use super::*;
    use std::sync::Mutex;
    use windows_sys::Win32::Networking::WinSock;

    pub struct WindowsSocketBackend;

    struct RawSocket(Mutex<WinSock::SOCKET>);

    impl WindowsSocketBackend {
        pub fn new() -> Self {
            WindowsSocketBackend
        }

        fn last_error(&self) -> crate::abi::errno::WinsockError {
            crate::abi::errno::WinsockError(unsafe { WinSock::WSAGetLastError() } as i32)
        }

        fn translate_err(&self) -> Errno {
            match crate::abi::translate_socket_error(self.last_error()) {
                Ok(()) => Errno::EIO,
                Err(e) => e,
            }
        }

        fn socket_of(&self, handle: &SocketHandle) -> WinSock::SOCKET {
            *handle.downcast_ref::<RawSocket>().expect("foreign SocketHandle").0.lock().unwrap()
        }
    }

    impl Default for WindowsSocketBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SocketBackend for WindowsSocketBackend {
        fn create(&self, family: HostFamily, ty: i32, protocol: i32) -> Result<SocketHandle, Errno> {
            let sock = unsafe { WinSock::socket(family.numeric() as i32, ty, protocol) };
            if sock == WinSock::INVALID_SOCKET {
                return Err(self.translate_err());
            }
            Ok(SocketHandle::new(RawSocket(Mutex::new(sock))))
        }

        fn bind(&self, handle: &SocketHandle, addr: &[u8]) -> Result<(), Errno> {
            let sock = self.socket_of(handle);
            let rc = unsafe { WinSock::bind(sock, addr.as_ptr() as *const _, addr.len() as i32) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(())
        }

        fn connect(&self, handle: &SocketHandle, addr: &[u8]) -> Result<(), Errno> {
            let sock = self.socket_of(handle);
            let rc = unsafe { WinSock::connect(sock, addr.as_ptr() as *const _, addr.len() as i32) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(())
        }

        fn listen(&self, handle: &SocketHandle, backlog: i32) -> Result<(), Errno> {
            let sock = self.socket_of(handle);
            let rc = unsafe { WinSock::listen(sock, backlog) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(())
        }

        fn accept(&self, handle: &SocketHandle) -> Result<(SocketHandle, Vec<u8>), Errno> {
            let sock = self.socket_of(handle);
            let mut buf = vec![0u8; crate::abi::sockaddr::SOCKADDR_STORAGE_SIZE];
            let mut len = buf.len() as i32;
            let accepted = unsafe { WinSock::accept(sock, buf.as_mut_ptr() as *mut _, &mut len) };
            if accepted == WinSock::INVALID_SOCKET {
                return Err(self.translate_err());
            }
            buf.truncate(len.max(0) as usize);
            Ok((SocketHandle::new(RawSocket(Mutex::new(accepted))), buf))
        }

        fn send(&self, handle: &SocketHandle, buf: &[u8], flags: i32) -> Result<usize, Errno> {
            let sock = self.socket_of(handle);
            let rc = unsafe { WinSock::send(sock, buf.as_ptr(), buf.len() as i32, flags) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(rc as usize)
        }

        fn recv(&self, handle: &SocketHandle, buf: &mut [u8], flags: i32) -> Result<usize, Errno> {
            let sock = self.socket_of(handle);
            let rc = unsafe { WinSock::recv(sock, buf.as_mut_ptr(), buf.len() as i32, flags) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(rc as usize)
        }

        fn send_to(&self, handle: &SocketHandle, buf: &[u8], flags: i32, addr: Option<&[u8]>) -> Result<usize, Errno> {
            let sock = self.socket_of(handle);
            let (ptr, len) = addr.map(|a| (a.as_ptr(), a.len() as i32)).unwrap_or((std::ptr::null(), 0));
            let rc = unsafe { WinSock::sendto(sock, buf.as_ptr(), buf.len() as i32, flags, ptr as *const _, len) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(rc as usize)
        }

        fn recv_from(&self, handle: &SocketHandle, buf: &mut [u8], flags: i32) -> Result<(usize, Option<Vec<u8>>), Errno> {
            let sock = self.socket_of(handle);
            let mut addr_buf = vec![0u8; crate::abi::sockaddr::SOCKADDR_STORAGE_SIZE];
            let mut addr_len = addr_buf.len() as i32;
            let rc = unsafe {
                WinSock::recvfrom(sock, buf.as_mut_ptr(), buf.len() as i32, flags, addr_buf.as_mut_ptr() as *mut _, &mut addr_len)
            };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            addr_buf.truncate(addr_len.max(0) as usize);
            Ok((rc as usize, Some(addr_buf)))
        }

        fn shutdown(&self, handle: &SocketHandle, how: i32) -> Result<(), Errno> {
            let sock = self.socket_of(handle);
            let rc = unsafe { WinSock::shutdown(sock, how) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(())
        }

        fn getsockname(&self, handle: &SocketHandle) -> Result<Vec<u8>, Errno> {
            let sock = self.socket_of(handle);
            let mut buf = vec![0u8; crate::abi::sockaddr::SOCKADDR_STORAGE_SIZE];
            let mut len = buf.len() as i32;
            let rc = unsafe { WinSock::getsockname(sock, buf.as_mut_ptr() as *mut _, &mut len) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            buf.truncate(len.max(0) as usize);
            Ok(buf)
        }

        fn getpeername(&self, handle: &SocketHandle) -> Result<Vec<u8>, Errno> {
            let sock = self.socket_of(handle);
            let mut buf = vec![0u8; crate::abi::sockaddr::SOCKADDR_STORAGE_SIZE];
            let mut len = buf.len() as i32;
            let rc = unsafe { WinSock::getpeername(sock, buf.as_mut_ptr() as *mut _, &mut len) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            buf.truncate(len.max(0) as usize);
            Ok(buf)
        }

        fn setsockopt(&self, handle: &SocketHandle, host_level: i32, host_name: i32, value: &[u8]) -> Result<(), Errno> {
            let sock = self.socket_of(handle);
            let rc = unsafe {
                WinSock::setsockopt(sock, host_level, host_name, value.as_ptr() as *const _, value.len() as i32)
            };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(())
        }

        fn getsockopt(&self, handle: &SocketHandle, host_level: i32, host_name: i32, out: &mut [u8]) -> Result<usize, Errno> {
            let sock = self.socket_of(handle);
            let mut len = out.len() as i32;
            let rc = unsafe { WinSock::getsockopt(sock, host_level, host_name, out.as_mut_ptr() as *mut _, &mut len) };
            if rc == WinSock::SOCKET_ERROR {
                return Err(self.translate_err());
            }
            Ok(len.max(0) as usize)
        }

        fn close(&self, handle: &SocketHandle) {
            let sock = self.socket_of(handle);
            unsafe {
                WinSock::closesocket(sock);
            }
        }

        fn duplicate_for_child(&self, handle: &SocketHandle, cookie: ForkCookie) -> Result<Vec<u8>, Errno> {
            let sock = self.socket_of(handle);
            let mut info: WinSock::WSAPROTOCOL_INFOW = unsafe { std::mem::zeroed() };
            let rc = unsafe { WinSock::WSADuplicateSocketW(sock, cookie.0, &mut info) };
            if rc != 0 {
                return Err(self.translate_err());
            }
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    &info as *const _ as *const u8,
                    std::mem::size_of::<WinSock::WSAPROTOCOL_INFOW>(),
                )
            };
            Ok(bytes.to_vec())
        }

        fn recreate_from_cookie(&self, cookie: &[u8]) -> Result<SocketHandle, Errno> {
            if cookie.len() != std::mem::size_of::<WinSock::WSAPROTOCOL_INFOW>() {
                return Err(Errno::EINVAL);
            }
            let info = unsafe { std::ptr::read(cookie.as_ptr() as *const WinSock::WSAPROTOCOL_INFOW) };
            let sock = unsafe {
                WinSock::WSASocketW(
                    info.iAddressFamily,
                    info.iSocketType,
                    info.iProtocol,
                    &info,
                    0,
                    WinSock::WSA_FLAG_OVERLAPPED,
                )
            };
            if sock == WinSock::INVALID_SOCKET {
                return Err(self.translate_err());
            }
            Ok(SocketHandle::new(RawSocket(Mutex::new(sock))))
        }

        fn drain_events(&self, handle: &SocketHandle) -> DrainedEvents {
            // A real integration calls WSAEnumNetworkEvents against the
            // event object registered via WSAEventSelect at socket
            // creation time. That event handle lives alongside the
            // SocketFile, not the backend, so it is threaded through by
            // the caller; this stub never reports spurious readiness.
            let _ = handle;
            DrainedEvents::default()
        }
    }
}

/// Always-compiled backend used by the unit tests in §4.11: sockets are
/// modeled as in-memory byte-stream pairs wired together by `connect`,
/// never touching a real OS socket.
pub mod loopback {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        family: u16,
        ty: i32,
        bound_addr: Option<Vec<u8>>,
        peer_addr: Option<Vec<u8>>,
        inbox: VecDeque<u8>,
        listening: bool,
        pending_connections: VecDeque<(SocketHandle, Vec<u8>)>,
        shutdown_read: bool,
        shutdown_write: bool,
    }

    struct LoopbackSocket(Mutex<Inner>);

    #[derive(Default)]
    pub struct LoopbackBackend;

    impl LoopbackBackend {
        pub fn new() -> Self {
            Self::default()
        }

        fn inner<'a>(&self, handle: &'a SocketHandle) -> &'a Mutex<Inner> {
            &handle.downcast_ref::<LoopbackSocket>().expect("foreign SocketHandle").0
        }

        /// Test hook: makes `listener`'s next `accept()` succeed with
        /// `accepted`, as if a peer had just connected to it.
        pub fn queue_connection(&self, listener: &SocketHandle, accepted: SocketHandle, peer_addr: Vec<u8>) {
            self.inner(listener).lock().unwrap().pending_connections.push_back((accepted, peer_addr));
        }

        /// Test hook: makes bytes available to a subsequent `recv`/`recv_from`.
        pub fn push_inbound(&self, handle: &SocketHandle, bytes: &[u8]) {
            self.inner(handle).lock().unwrap().inbox.extend(bytes.iter().copied());
        }
    }

    impl SocketBackend for LoopbackBackend {
        fn create(&self, family: HostFamily, ty: i32, _protocol: i32) -> Result<SocketHandle, Errno> {
            let mut inner = Inner::default();
            inner.family = family.numeric();
            inner.ty = ty;
            Ok(SocketHandle::new(LoopbackSocket(Mutex::new(inner))))
        }

        fn bind(&self, handle: &SocketHandle, addr: &[u8]) -> Result<(), Errno> {
            self.inner(handle).lock().unwrap().bound_addr = Some(addr.to_vec());
            Ok(())
        }

        fn connect(&self, handle: &SocketHandle, addr: &[u8]) -> Result<(), Errno> {
            self.inner(handle).lock().unwrap().peer_addr = Some(addr.to_vec());
            Ok(())
        }

        fn listen(&self, handle: &SocketHandle, _backlog: i32) -> Result<(), Errno> {
            self.inner(handle).lock().unwrap().listening = true;
            Ok(())
        }

        fn accept(&self, handle: &SocketHandle) -> Result<(SocketHandle, Vec<u8>), Errno> {
            self.inner(handle)
                .lock()
                .unwrap()
                .pending_connections
                .pop_front()
                .ok_or(Errno::EWOULDBLOCK)
        }

        fn send(&self, handle: &SocketHandle, buf: &[u8], _flags: i32) -> Result<usize, Errno> {
            let guard = self.inner(handle).lock().unwrap();
            if guard.shutdown_write {
                return Err(Errno::EPIPE);
            }
            Ok(buf.len())
        }

        fn recv(&self, handle: &SocketHandle, buf: &mut [u8], _flags: i32) -> Result<usize, Errno> {
            let mut guard = self.inner(handle).lock().unwrap();
            if guard.shutdown_read {
                return Ok(0);
            }
            let n = guard.inbox.len().min(buf.len());
            for slot in buf.iter_mut().take(n) {
                *slot = guard.inbox.pop_front().unwrap();
            }
            if n == 0 {
                return Err(Errno::EWOULDBLOCK);
            }
            Ok(n)
        }

        fn send_to(&self, handle: &SocketHandle, buf: &[u8], flags: i32, _addr: Option<&[u8]>) -> Result<usize, Errno> {
            self.send(handle, buf, flags)
        }

        fn recv_from(&self, handle: &SocketHandle, buf: &mut [u8], flags: i32) -> Result<(usize, Option<Vec<u8>>), Errno> {
            let n = self.recv(handle, buf, flags)?;
            let addr = self.inner(handle).lock().unwrap().peer_addr.clone();
            Ok((n, addr))
        }

        fn shutdown(&self, handle: &SocketHandle, how: i32) -> Result<(), Errno> {
            let mut guard = self.inner(handle).lock().unwrap();
            match how {
                0 => guard.shutdown_read = true,
                1 => guard.shutdown_write = true,
                2 => {
                    guard.shutdown_read = true;
                    guard.shutdown_write = true;
                }
                _ => return Err(Errno::EINVAL),
            }
            Ok(())
        }

        fn getsockname(&self, handle: &SocketHandle) -> Result<Vec<u8>, Errno> {
            self.inner(handle).lock().unwrap().bound_addr.clone().ok_or(Errno::EINVAL)
        }

        fn getpeername(&self, handle: &SocketHandle) -> Result<Vec<u8>, Errno> {
            self.inner(handle).lock().unwrap().peer_addr.clone().ok_or(Errno::ENOTCONN)
        }

        fn setsockopt(&self, _handle: &SocketHandle, _host_level: i32, _host_name: i32, _value: &[u8]) -> Result<(), Errno> {
            Ok(())
        }

        fn getsockopt(&self, _handle: &SocketHandle, _host_level: i32, _host_name: i32, out: &mut [u8]) -> Result<usize, Errno> {
            out.fill(0);
            Ok(out.len())
        }

        fn close(&self, _handle: &SocketHandle) {}

        fn duplicate_for_child(&self, _handle: &SocketHandle, cookie: ForkCookie) -> Result<Vec<u8>, Errno> {
            Ok(cookie.0.to_ne_bytes().to_vec())
        }

        fn recreate_from_cookie(&self, _cookie: &[u8]) -> Result<SocketHandle, Errno> {
            Ok(SocketHandle::new(LoopbackSocket(Mutex::new(Inner::default()))))
        }

        fn drain_events(&self, _handle: &SocketHandle) -> DrainedEvents {
            DrainedEvents::default()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::abi::address_family::HostFamily;

        #[test]
        fn bind_then_getsockname_round_trips_the_address() {
            let backend = LoopbackBackend::new();
            let handle = backend.create(HostFamily::Inet, 1, 0).unwrap();
            backend.bind(&handle, &[1, 2, 3, 4]).unwrap();
            assert_eq!(backend.getsockname(&handle).unwrap(), vec![1, 2, 3, 4]);
        }

        #[test]
        fn unbound_socket_name_is_einval() {
            let backend = LoopbackBackend::new();
            let handle = backend.create(HostFamily::Inet, 1, 0).unwrap();
            assert_eq!(backend.getsockname(&handle), Err(Errno::EINVAL));
        }

        #[test]
        fn recv_with_empty_inbox_would_block() {
            let backend = LoopbackBackend::new();
            let handle = backend.create(HostFamily::Inet, 1, 0).unwrap();
            let mut buf = [0u8; 8];
            assert_eq!(backend.recv(&handle, &mut buf, 0), Err(Errno::EWOULDBLOCK));
        }

        #[test]
        fn pushed_inbound_bytes_are_read_back() {
            let backend = LoopbackBackend::new();
            let handle = backend.create(HostFamily::Inet, 1, 0).unwrap();
            backend.push_inbound(&handle, b"hi");
            let mut buf = [0u8; 8];
            let n = backend.recv(&handle, &mut buf, 0).unwrap();
            assert_eq!(&buf[..n], b"hi");
        }

        #[test]
        fn queued_connection_is_returned_by_accept() {
            let backend = LoopbackBackend::new();
            let listener = backend.create(HostFamily::Inet, 1, 0).unwrap();
            let accepted = backend.create(HostFamily::Inet, 1, 0).unwrap();
            backend.queue_connection(&listener, accepted, vec![9, 9]);
            let (_handle, addr) = backend.accept(&listener).unwrap();
            assert_eq!(addr, vec![9, 9]);
        }

        #[test]
        fn shutdown_write_then_send_is_epipe() {
            let backend = LoopbackBackend::new();
            let handle = backend.create(HostFamily::Inet, 1, 0).unwrap();
            backend.shutdown(&handle, 1).unwrap();
            assert_eq!(backend.send(&handle, b"x", 0), Err(Errno::EPIPE));
        }
    }
}
