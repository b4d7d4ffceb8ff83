//! A user-space Linux personality layer: socket emulation and a futex
//! subsystem hosted atop a Win32-style socket and threading API.
//!
//! The crate is organized the way the syscall surface it emulates is: ABI
//! translation tables (`abi`), the socket file object and its UNIX-domain
//! bridge (`socket`), the futex core (`futex`), the narrow host-collaborator
//! seams everything above is built against (`host`), the readiness-event
//! reactor shared by both (`reactor`), the fd-keyed syscall dispatch layer
//! (`syscall`), timer stubs (`timers`), and startup configuration (`config`).

pub mod abi;
pub mod config;
pub mod futex;
pub mod host;
pub mod reactor;
pub mod socket;
pub mod syscall;
pub mod timers;

pub use config::Config;
pub use syscall::Personality;
