//! Unit stepping of fixed-width addresses.
//!
//! An address is treated as a big-endian unsigned integer of its own width
//! (32 bits for IPv4, 128 bits for IPv6). The result always keeps the width
//! of the input, so an IPv4 address never turns into an IPv6 one.
//!
//! [`step`] wraps around at the ends of the address space while
//! [`checked_step`] refuses to cross them. The frontier walk uses the checked
//! form so that a direction simply runs dry at the edge.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Which way to move through the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Increment,
    Decrement,
}

impl Direction {
    /// The other direction.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Increment => Self::Decrement,
            Self::Decrement => Self::Increment,
        }
    }
}

/// Moves `address` one unit in `direction`, wrapping modulo 2^width.
///
/// ```rust
/// # use std::net::IpAddr;
/// # use tlsreach::address::{step, Direction};
/// let top: IpAddr = "255.255.255.255".parse().unwrap();
/// assert_eq!(step(top, Direction::Increment), "0.0.0.0".parse::<IpAddr>().unwrap());
/// ```
#[must_use]
pub fn step(address: IpAddr, direction: Direction) -> IpAddr {
    match (address, direction) {
        (IpAddr::V4(v4), Direction::Increment) => {
            IpAddr::V4(Ipv4Addr::from(u32::from(v4).wrapping_add(1)))
        }
        (IpAddr::V4(v4), Direction::Decrement) => {
            IpAddr::V4(Ipv4Addr::from(u32::from(v4).wrapping_sub(1)))
        }
        (IpAddr::V6(v6), Direction::Increment) => {
            IpAddr::V6(Ipv6Addr::from(u128::from(v6).wrapping_add(1)))
        }
        (IpAddr::V6(v6), Direction::Decrement) => {
            IpAddr::V6(Ipv6Addr::from(u128::from(v6).wrapping_sub(1)))
        }
    }
}

/// Moves `address` one unit in `direction`, or returns `None` when that
/// would leave the address space (`0.0.0.0 - 1`, `255.255.255.255 + 1`
/// and the IPv6 equivalents).
#[must_use]
pub fn checked_step(address: IpAddr, direction: Direction) -> Option<IpAddr> {
    match (address, direction) {
        (IpAddr::V4(v4), Direction::Increment) => {
            u32::from(v4).checked_add(1).map(|n| IpAddr::V4(n.into()))
        }
        (IpAddr::V4(v4), Direction::Decrement) => {
            u32::from(v4).checked_sub(1).map(|n| IpAddr::V4(n.into()))
        }
        (IpAddr::V6(v6), Direction::Increment) => {
            u128::from(v6).checked_add(1).map(|n| IpAddr::V6(n.into()))
        }
        (IpAddr::V6(v6), Direction::Decrement) => {
            u128::from(v6).checked_sub(1).map(|n| IpAddr::V6(n.into()))
        }
    }
}
