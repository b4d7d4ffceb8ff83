//! The narrow host-collaborator seams the core depends on (§4.7), each
//! expressed as a trait so socket/futex logic is exercisable without a
//! real Win32 host.

pub mod file_table;
pub mod memory;
pub mod process;
pub mod socket_backend;
pub mod special_file;
pub mod wait;

pub use file_table::{FileTable, SimpleFileTable};
pub use memory::{FaultInjectingMemory, MemoryAccess, PermissiveMemory};
pub use process::{ForkCookie, InProcessForkModel, ProcessModel};
pub use socket_backend::{SocketBackend, SocketHandle};
pub use special_file::{SpecialFileStore, StdFsSpecialFileStore, WINFS_UNIX_HEADER};
pub use wait::{InterruptibleWait, WaitOutcome};
