//! IPv4 helpers
//!
//! Tie-breaks compare addresses as 32-bit integers. Comparing dotted-quad
//! strings orders `10.0.0.10` before `10.0.0.9`.

use std::cmp::Ordering;
use std::net::Ipv4Addr;

/// Strip a `/mask` suffix and a `%route-domain` suffix from a device address
pub fn bare_address(address: &str) -> &str {
    let without_mask = address.split('/').next().unwrap_or(address);
    without_mask.split('%').next().unwrap_or(without_mask)
}

/// Convert a dotted-quad address to its integer value
pub fn ipv4_to_u32(address: &str) -> Option<u32> {
    bare_address(address.trim())
        .parse::<Ipv4Addr>()
        .ok()
        .map(u32::from)
}

/// Numeric address ordering; unparseable addresses sort after every valid one
pub fn compare_ipv4(a: &str, b: &str) -> Ordering {
    match (ipv4_to_u32(a), ipv4_to_u32(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(compare_ipv4("10.0.0.9", "10.0.0.10"), Ordering::Less);
        assert_eq!(compare_ipv4("10.0.1.0", "10.0.0.255"), Ordering::Greater);
        assert_eq!(compare_ipv4("bogus", "10.0.0.1"), Ordering::Greater);
    }

    #[test]
    fn test_bare_address() {
        assert_eq!(bare_address("10.0.1.4/24"), "10.0.1.4");
        assert_eq!(bare_address("10.0.1.4%1/24"), "10.0.1.4");
        assert_eq!(ipv4_to_u32("10.0.0.1"), Some(0x0a00_0001));
    }
}
