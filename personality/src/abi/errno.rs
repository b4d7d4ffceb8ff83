//! Translation of host (WinSock) error codes to Linux errno values.

use linux_errno::Errno;

/// Raw WinSock error codes this layer recognizes. Values match the real
/// `WSA*` constants so a `#[cfg(windows)]` backend can build this type
/// directly from `WSAGetLastError()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinsockError(pub i32);

impl WinsockError {
    pub const SUCCESS: i32 = 0;
    pub const WSA_NOT_ENOUGH_MEMORY: i32 = 8;
    pub const WSAEINTR: i32 = 10004;
    pub const WSAEBADF: i32 = 10009;
    pub const WSAEACCES: i32 = 10013;
    pub const WSAEFAULT: i32 = 10014;
    pub const WSAEINVAL: i32 = 10022;
    pub const WSAEMFILE: i32 = 10024;
    pub const WSAEWOULDBLOCK: i32 = 10035;
    pub const WSAEALREADY: i32 = 10037;
    pub const WSAENOTSOCK: i32 = 10038;
    pub const WSAEDESTADDRREQ: i32 = 10039;
    pub const WSAEMSGSIZE: i32 = 10040;
    pub const WSAEPROTOTYPE: i32 = 10041;
    pub const WSAENOPROTOOPT: i32 = 10042;
    pub const WSAEPROTONOSUPPORT: i32 = 10043;
    pub const WSAESOCKTNOSUPPORT: i32 = 10044;
    pub const WSAEOPNOTSUPP: i32 = 10045;
    pub const WSAEPFNOSUPPORT: i32 = 10046;
    pub const WSAEAFNOSUPPORT: i32 = 10047;
    pub const WSAEADDRINUSE: i32 = 10048;
    pub const WSAEADDRNOTAVAIL: i32 = 10049;
    pub const WSAENETDOWN: i32 = 10050;
    pub const WSAENETUNREACH: i32 = 10051;
    pub const WSAENETRESET: i32 = 10052;
    pub const WSAECONNABORTED: i32 = 10053;
    pub const WSAECONNRESET: i32 = 10054;
    pub const WSAENOBUFS: i32 = 10055;
    pub const WSAEISCONN: i32 = 10056;
    pub const WSAENOTCONN: i32 = 10057;
    pub const WSAETIMEDOUT: i32 = 10060;
    pub const WSAECONNREFUSED: i32 = 10061;
    pub const WSAELOOP: i32 = 10062;
    pub const WSAENAMETOOLONG: i32 = 10063;
    pub const WSAEHOSTDOWN: i32 = 10064;
    pub const WSAEHOSTUNREACH: i32 = 10065;
    pub const WSAENOTEMPTY: i32 = 10066;
    pub const WSAECANCELLED: i32 = 10103;

    pub fn is_would_block(self) -> bool {
        self.0 == Self::WSAEWOULDBLOCK
    }
}

/// Translates a host socket error kind into a Linux errno. `Ok(())` is
/// returned for the zero/success code; every other unrecognized code
/// collapses to `EIO` and is logged, per §4.1 and testable property 1.
pub fn translate_socket_error(error: WinsockError) -> Result<(), Errno> {
    use WinsockError as W;
    let mapped = match error.0 {
        W::SUCCESS => return Ok(()),
        W::WSA_NOT_ENOUGH_MEMORY => Errno::ENOMEM,
        W::WSAEINTR => Errno::EINTR,
        W::WSAEBADF => Errno::EBADF,
        W::WSAEACCES => Errno::EACCES,
        W::WSAEFAULT => Errno::EFAULT,
        W::WSAEINVAL => Errno::EINVAL,
        W::WSAEMFILE => Errno::EMFILE,
        W::WSAEWOULDBLOCK => Errno::EWOULDBLOCK,
        W::WSAEALREADY => Errno::EALREADY,
        W::WSAENOTSOCK => Errno::ENOTSOCK,
        W::WSAEDESTADDRREQ => Errno::EDESTADDRREQ,
        W::WSAEMSGSIZE => Errno::EMSGSIZE,
        W::WSAEPROTOTYPE => Errno::EPROTOTYPE,
        W::WSAENOPROTOOPT => Errno::ENOPROTOOPT,
        W::WSAEPROTONOSUPPORT => Errno::EPROTONOSUPPORT,
        W::WSAESOCKTNOSUPPORT => Errno::EPROTONOSUPPORT,
        W::WSAEOPNOTSUPP => Errno::EOPNOTSUPP,
        W::WSAEPFNOSUPPORT => Errno::EPFNOSUPPORT,
        W::WSAEAFNOSUPPORT => Errno::EAFNOSUPPORT,
        W::WSAEADDRINUSE => Errno::EADDRINUSE,
        W::WSAEADDRNOTAVAIL => Errno::EADDRNOTAVAIL,
        W::WSAENETDOWN => Errno::ENETDOWN,
        W::WSAENETUNREACH => Errno::ENETUNREACH,
        W::WSAENETRESET => Errno::ENETRESET,
        W::WSAECONNABORTED => Errno::ECONNABORTED,
        W::WSAECONNRESET => Errno::ECONNRESET,
        W::WSAENOBUFS => Errno::ENOBUFS,
        W::WSAEISCONN => Errno::EISCONN,
        W::WSAENOTCONN => Errno::ENOTCONN,
        W::WSAETIMEDOUT => Errno::ETIMEDOUT,
        W::WSAECONNREFUSED => Errno::ECONNREFUSED,
        W::WSAELOOP => Errno::ELOOP,
        W::WSAENAMETOOLONG => Errno::ENAMETOOLONG,
        // Observed Linux behavior for a dead peer; deliberate, not a typo.
        W::WSAEHOSTDOWN => Errno::ETIMEDOUT,
        W::WSAEHOSTUNREACH => Errno::EHOSTUNREACH,
        W::WSAENOTEMPTY => Errno::ENOTEMPTY,
        W::WSAECANCELLED => Errno::ECANCELED,
        other => {
            log::error!("unhandled WinSock error code: {other}");
            Errno::EIO
        }
    };
    Err(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_maps_to_ok() {
        assert_eq!(translate_socket_error(WinsockError(WinsockError::SUCCESS)), Ok(()));
    }

    #[test]
    fn hostdown_maps_to_etimedout_not_ehostdown() {
        assert_eq!(
            translate_socket_error(WinsockError(WinsockError::WSAEHOSTDOWN)),
            Err(Errno::ETIMEDOUT)
        );
    }

    #[test]
    fn every_recognized_code_maps_to_its_specified_errno() {
        let cases = [
            (WinsockError::WSA_NOT_ENOUGH_MEMORY, Errno::ENOMEM),
            (WinsockError::WSAEINTR, Errno::EINTR),
            (WinsockError::WSAEWOULDBLOCK, Errno::EWOULDBLOCK),
            (WinsockError::WSAECONNREFUSED, Errno::ECONNREFUSED),
            (WinsockError::WSAETIMEDOUT, Errno::ETIMEDOUT),
            (WinsockError::WSAEAFNOSUPPORT, Errno::EAFNOSUPPORT),
            (WinsockError::WSAESOCKTNOSUPPORT, Errno::EPROTONOSUPPORT),
        ];
        for (code, expected) in cases {
            assert_eq!(translate_socket_error(WinsockError(code)), Err(expected));
        }
    }

    #[test]
    fn unknown_code_collapses_to_eio() {
        assert_eq!(translate_socket_error(WinsockError(999_999)), Err(Errno::EIO));
    }
}
