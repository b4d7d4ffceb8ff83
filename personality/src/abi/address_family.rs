//! Linux `AF_*` constants and their translation to the host socket API.

use linux_errno::Errno;

pub const AF_UNSPEC: i32 = 0;
pub const AF_UNIX: i32 = 1;
pub const AF_INET: i32 = 2;
pub const AF_INET6: i32 = 10;

/// Numeric host (WinSock) address family values. `AF_INET` happens to
/// coincide with Linux's; `AF_INET6` does not, which is why sockaddr
/// translation has to rewrite the family field on every INET6 crossing.
pub mod host {
    pub const AF_UNSPEC: u16 = 0;
    pub const AF_INET: u16 = 2;
    pub const AF_INET6: u16 = 23;
}

/// Address family as requested by the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Unspec,
    Inet,
    Inet6,
    /// Silently demoted to loopback IPv4 at the host (§4.5).
    Unix,
}

impl AddressFamily {
    pub fn from_linux(af: i32) -> Result<Self, Errno> {
        match af {
            AF_UNSPEC => Ok(AddressFamily::Unspec),
            AF_UNIX => Ok(AddressFamily::Unix),
            AF_INET => Ok(AddressFamily::Inet),
            AF_INET6 => Ok(AddressFamily::Inet6),
            other => {
                log::error!("unknown address family: {other}");
                Err(Errno::EAFNOSUPPORT)
            }
        }
    }

    pub fn to_linux(self) -> i32 {
        match self {
            AddressFamily::Unspec => AF_UNSPEC,
            AddressFamily::Unix => AF_UNIX,
            AddressFamily::Inet => AF_INET,
            AddressFamily::Inet6 => AF_INET6,
        }
    }

    /// The family the host socket is actually created with. UNIX sockets
    /// are never created at the host; they're proxied over INET loopback.
    pub fn host_family(self) -> HostFamily {
        match self {
            AddressFamily::Unspec => HostFamily::Unspec,
            AddressFamily::Unix | AddressFamily::Inet => HostFamily::Inet,
            AddressFamily::Inet6 => HostFamily::Inet6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFamily {
    Unspec,
    Inet,
    Inet6,
}

impl HostFamily {
    pub fn numeric(self) -> u16 {
        match self {
            HostFamily::Unspec => host::AF_UNSPEC,
            HostFamily::Inet => host::AF_INET,
            HostFamily::Inet6 => host::AF_INET6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_demotes_to_inet_at_the_host() {
        assert_eq!(AddressFamily::Unix.host_family(), HostFamily::Inet);
    }

    #[test]
    fn inet_family_numbers_coincide() {
        assert_eq!(HostFamily::Inet.numeric(), AF_INET as u16);
    }

    #[test]
    fn inet6_family_numbers_differ() {
        assert_ne!(HostFamily::Inet6.numeric(), AF_INET6 as u16);
    }

    #[test]
    fn unknown_family_is_rejected() {
        assert_eq!(AddressFamily::from_linux(999), Err(Errno::EAFNOSUPPORT));
    }

    #[test]
    fn known_families_round_trip() {
        for af in [AF_UNSPEC, AF_UNIX, AF_INET, AF_INET6] {
            let parsed = AddressFamily::from_linux(af).unwrap();
            assert_eq!(parsed.to_linux(), af);
        }
    }
}
