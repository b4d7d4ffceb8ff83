//! Linux `SOCK_*` constants, the flag bits packed into the `type` argument,
//! and their translation to the host socket API.

use bitflags::bitflags;
use linux_errno::Errno;

pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;
pub const SOCK_RAW: i32 = 3;
pub const SOCK_RDM: i32 = 4;
pub const SOCK_SEQPACKET: i32 = 5;

pub const SOCK_TYPE_MASK: i32 = 0xf;
pub const SOCK_NONBLOCK: i32 = 0o4000;
pub const SOCK_CLOEXEC: i32 = 0o2000000;

pub mod host {
    pub const SOCK_STREAM: i32 = 1;
    pub const SOCK_DGRAM: i32 = 2;
    pub const SOCK_RAW: i32 = 3;
    pub const SOCK_RDM: i32 = 4;
    pub const SOCK_SEQPACKET: i32 = 5;
}

bitflags! {
    /// Flag bits that ride in the high bits of `socket()`'s `type` argument.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: i32 {
        const NONBLOCK = SOCK_NONBLOCK;
        const CLOEXEC = SOCK_CLOEXEC;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Stream,
    Dgram,
    Raw,
    Rdm,
    SeqPacket,
}

impl SocketType {
    pub fn from_linux(ty: i32) -> Result<Self, Errno> {
        match ty & SOCK_TYPE_MASK {
            SOCK_STREAM => Ok(SocketType::Stream),
            SOCK_DGRAM => Ok(SocketType::Dgram),
            SOCK_RAW => Ok(SocketType::Raw),
            SOCK_RDM => Ok(SocketType::Rdm),
            SOCK_SEQPACKET => Ok(SocketType::SeqPacket),
            other => {
                log::error!("unknown socket type: {other}");
                Err(Errno::EPROTONOSUPPORT)
            }
        }
    }

    pub fn to_linux(self) -> i32 {
        match self {
            SocketType::Stream => SOCK_STREAM,
            SocketType::Dgram => SOCK_DGRAM,
            SocketType::Raw => SOCK_RAW,
            SocketType::Rdm => SOCK_RDM,
            SocketType::SeqPacket => SOCK_SEQPACKET,
        }
    }

    pub fn host_type(self) -> i32 {
        match self {
            SocketType::Stream => host::SOCK_STREAM,
            SocketType::Dgram => host::SOCK_DGRAM,
            SocketType::Raw => host::SOCK_RAW,
            SocketType::Rdm => host::SOCK_RDM,
            SocketType::SeqPacket => host::SOCK_SEQPACKET,
        }
    }
}

/// Splits a raw `type` argument into its socket type and flag bits.
pub fn split_type_and_flags(raw: i32) -> (i32, OpenFlags) {
    let flags = OpenFlags::from_bits_truncate(raw & !SOCK_TYPE_MASK);
    (raw & SOCK_TYPE_MASK, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nonblock_and_cloexec_before_translating() {
        let raw = SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC;
        let (ty, flags) = split_type_and_flags(raw);
        assert_eq!(SocketType::from_linux(ty).unwrap(), SocketType::Stream);
        assert!(flags.contains(OpenFlags::NONBLOCK));
        assert!(flags.contains(OpenFlags::CLOEXEC));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert_eq!(SocketType::from_linux(0xff), Err(Errno::EPROTONOSUPPORT));
    }

    #[test]
    fn all_known_types_round_trip() {
        for ty in [SOCK_STREAM, SOCK_DGRAM, SOCK_RAW, SOCK_RDM, SOCK_SEQPACKET] {
            assert_eq!(SocketType::from_linux(ty).unwrap().to_linux(), ty);
        }
    }
}
