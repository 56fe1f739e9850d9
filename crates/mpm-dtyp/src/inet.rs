//! Network address representation used by message fields.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family selector as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressFamily {
    Unspec = 0,
    Inet = 1,
    Inet6 = 2,
}

impl AddressFamily {
    pub fn from_raw(value: u8) -> Option<AddressFamily> {
        match value {
            0 => Some(AddressFamily::Unspec),
            1 => Some(AddressFamily::Inet),
            2 => Some(AddressFamily::Inet6),
            _ => None,
        }
    }
}

/// An IPv4/IPv6 address with an optional network mask bit count.
///
/// An address-less value (family unspec) is valid and represents "no
/// address".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InetAddress {
    addr: Option<IpAddr>,
    mask_bits: u8,
}

impl InetAddress {
    /// Creates an address-less (unspec) value.
    pub fn unspec() -> InetAddress {
        InetAddress::default()
    }

    pub fn new(addr: IpAddr) -> InetAddress {
        let mask_bits = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        InetAddress {
            addr: Some(addr),
            mask_bits,
        }
    }

    pub fn with_mask_bits(mut self, mask_bits: u8) -> InetAddress {
        self.mask_bits = mask_bits;
        self
    }

    /// Creates an IPv4 address from a host-order u32.
    pub fn from_v4_bits(bits: u32) -> InetAddress {
        InetAddress::new(IpAddr::V4(Ipv4Addr::from(bits)))
    }

    pub fn family(&self) -> AddressFamily {
        match self.addr {
            None => AddressFamily::Unspec,
            Some(IpAddr::V4(_)) => AddressFamily::Inet,
            Some(IpAddr::V6(_)) => AddressFamily::Inet6,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.addr.is_some()
    }

    pub fn addr(&self) -> Option<IpAddr> {
        self.addr
    }

    pub fn mask_bits(&self) -> u8 {
        self.mask_bits
    }

    pub fn set_mask_bits(&mut self, mask_bits: u8) {
        self.mask_bits = mask_bits;
    }

    /// Returns the IPv4 address as a host-order u32, or 0 for other
    /// families.
    pub fn v4_bits(&self) -> u32 {
        match self.addr {
            Some(IpAddr::V4(a)) => u32::from(a),
            _ => 0,
        }
    }

    /// Returns the 16 IPv6 address octets, or zeroes for other families.
    pub fn v6_octets(&self) -> [u8; 16] {
        match self.addr {
            Some(IpAddr::V6(a)) => a.octets(),
            _ => [0; 16],
        }
    }
}

impl From<IpAddr> for InetAddress {
    fn from(addr: IpAddr) -> InetAddress {
        InetAddress::new(addr)
    }
}

impl From<Ipv4Addr> for InetAddress {
    fn from(addr: Ipv4Addr) -> InetAddress {
        InetAddress::new(IpAddr::V4(addr))
    }
}

impl From<Ipv6Addr> for InetAddress {
    fn from(addr: Ipv6Addr) -> InetAddress {
        InetAddress::new(IpAddr::V6(addr))
    }
}

impl fmt::Display for InetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "UNSPEC"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families() {
        assert_eq!(InetAddress::unspec().family(), AddressFamily::Unspec);
        assert!(!InetAddress::unspec().is_valid());

        let v4 = InetAddress::from(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(v4.family(), AddressFamily::Inet);
        assert_eq!(v4.v4_bits(), 0x0A000001);
        assert_eq!(v4.mask_bits(), 32);

        let v6 = InetAddress::from("2001:db8::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(v6.family(), AddressFamily::Inet6);
        assert_eq!(v6.mask_bits(), 128);
    }

    #[test]
    fn display() {
        assert_eq!(InetAddress::from_v4_bits(0x0A000001).to_string(), "10.0.0.1");
        assert_eq!(InetAddress::unspec().to_string(), "UNSPEC");
    }
}
