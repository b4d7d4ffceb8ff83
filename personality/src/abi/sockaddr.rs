//! Byte-level translation of `sockaddr` buffers between the guest (Linux)
//! and host (WinSock) layouts.
//!
//! Both layouts agree on everything except the `sa_family`/`ss_family`
//! field's numeric value for `AF_INET6` (§4.1): the bytes that follow are
//! copied verbatim.

use super::address_family::{self, AddressFamily, HostFamily};
use linux_errno::Errno;

/// Mirrors `sizeof(struct sockaddr_storage)`; large enough for any address
/// family this layer handles.
pub const SOCKADDR_STORAGE_SIZE: usize = 128;

const SOCKADDR_IN_MIN_LEN: usize = 16;
const SOCKADDR_IN6_MIN_LEN: usize = 28;

fn read_family(bytes: &[u8]) -> Result<u16, Errno> {
    if bytes.len() < 2 {
        return Err(Errno::EINVAL);
    }
    Ok(u16::from_ne_bytes([bytes[0], bytes[1]]))
}

fn write_family(bytes: &mut [u8], family: u16) {
    bytes[0..2].copy_from_slice(&family.to_ne_bytes());
}

/// Translates a guest-supplied sockaddr into the bytes to hand the host
/// socket API, along with the length to pass alongside them.
///
/// `declared_af` is the family the socket was created with (relevant only
/// to confirm UNSPEC's zero-fill path; the family actually encoded in
/// `input` drives every other case, matching the source's behavior of
/// trusting the sockaddr's own family field).
pub fn translate_to_host(input: &[u8]) -> Result<(Vec<u8>, usize), Errno> {
    let af = read_family(input)?;
    if af == address_family::AF_UNSPEC as u16 {
        return Ok((vec![0u8; input.len()], input.len()));
    }
    if af == address_family::AF_INET as u16 {
        if input.len() < SOCKADDR_IN_MIN_LEN {
            return Err(Errno::EINVAL);
        }
        let mut out = input.to_vec();
        write_family(&mut out, HostFamily::Inet.numeric());
        let len = out.len();
        Ok((out, len))
    } else if af == address_family::AF_INET6 as u16 {
        if input.len() < SOCKADDR_IN6_MIN_LEN {
            return Err(Errno::EINVAL);
        }
        let mut out = input.to_vec();
        write_family(&mut out, HostFamily::Inet6.numeric());
        let len = out.len();
        Ok((out, len))
    } else {
        log::error!("unknown address family in sockaddr: {af}");
        Err(Errno::EINVAL)
    }
}

/// Translates a host-returned sockaddr back into guest form, rewriting the
/// family field of INET6 addresses and leaving everything else untouched.
pub fn translate_to_linux(buf: &mut [u8], len: usize) -> usize {
    if len < 2 {
        return len;
    }
    let af = u16::from_ne_bytes([buf[0], buf[1]]);
    if af == HostFamily::Inet6.numeric() {
        write_family(buf, address_family::AF_INET6 as u16);
    }
    len
}

/// Builds the loopback `sockaddr_in` used by the UNIX bridge (§4.4): host
/// family, `INADDR_LOOPBACK`, and the given port in network byte order.
pub fn loopback_sockaddr_in(port: u16) -> [u8; SOCKADDR_IN_MIN_LEN] {
    let mut buf = [0u8; SOCKADDR_IN_MIN_LEN];
    write_family(&mut buf, HostFamily::Inet.numeric());
    buf[2..4].copy_from_slice(&port.to_be_bytes());
    buf[4..8].copy_from_slice(&[127, 0, 0, 1]);
    buf
}

/// All-zero sockaddr of the given family, used to synthesize
/// `getsockname()` results for unbound sockets (§4.3).
pub fn zeroed_sockaddr(af: AddressFamily) -> Result<Vec<u8>, Errno> {
    match af {
        AddressFamily::Inet => {
            let mut buf = vec![0u8; SOCKADDR_IN_MIN_LEN];
            write_family(&mut buf, address_family::AF_INET as u16);
            Ok(buf)
        }
        AddressFamily::Inet6 => {
            let mut buf = vec![0u8; SOCKADDR_IN6_MIN_LEN];
            write_family(&mut buf, address_family::AF_INET6 as u16);
            Ok(buf)
        }
        _ => Err(Errno::EOPNOTSUPP),
    }
}
