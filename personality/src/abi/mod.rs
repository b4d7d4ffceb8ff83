//! ABI translation tables between the Linux-facing syscall surface and the
//! host (Windows/WinSock) APIs that actually carry out the work.

pub mod address_family;
pub mod errno;
pub mod sockaddr;
pub mod sockopt;
pub mod socket_type;

pub use address_family::AddressFamily;
pub use errno::{translate_socket_error, WinsockError};
pub use socket_type::SocketType;
