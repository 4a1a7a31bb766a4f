//! Network range helpers: parsing, interval decomposition, prefix widening
//! and the ordering key used by the merge engine.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ip_network::IpNetwork;

/// Parse `"10.0.0.0/8"` or a bare address (`"1.2.3.4"` → `/32`).
///
/// Host bits below the prefix are masked off rather than rejected.
pub fn parse_network(text: &str) -> Result<IpNetwork, String> {
    let text = text.trim();
    let (addr, prefix) = match text.split_once('/') {
        Some((addr, prefix)) => {
            let addr: IpAddr = addr
                .trim()
                .parse()
                .map_err(|e| format!("invalid network address {addr:?}: {e}"))?;
            let prefix: u8 = prefix
                .trim()
                .parse()
                .map_err(|e| format!("invalid prefix length {prefix:?}: {e}"))?;
            (addr, prefix)
        }
        None => {
            let addr: IpAddr = text
                .parse()
                .map_err(|e| format!("invalid IP or CIDR notation {text:?}: {e}"))?;
            (addr, address_bits(addr))
        }
    };

    IpNetwork::new_truncate(addr, prefix).map_err(|e| format!("invalid network {text:?}: {e}"))
}

/// Parse a single address.
pub fn parse_addr(text: &str) -> Result<IpAddr, String> {
    text.trim()
        .parse()
        .map_err(|e| format!("invalid IP address {text:?}: {e}"))
}

/// Width of the address family in bits (32 or 128).
pub fn address_bits(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// IP version of an address (4 or 6).
pub fn ip_version(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 6,
    }
}

fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn u128_to_addr(value: u128, version: u8) -> IpAddr {
    if version == 4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

/// Number of addresses in a block of `host_bits`, minus one.
fn block_span(host_bits: u32) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    }
}

/// Decompose an inclusive address interval into the minimal list of CIDR
/// networks covering exactly that interval, in ascending order.
pub fn interval_networks(from: IpAddr, to: IpAddr) -> Result<Vec<IpNetwork>, String> {
    let version = ip_version(from);
    if version != ip_version(to) {
        return Err(format!("range {from} - {to} mixes IP versions"));
    }
    let (start, end) = (addr_to_u128(from), addr_to_u128(to));
    if start > end {
        return Err(format!("range start {from} is after range end {to}"));
    }

    let width = u32::from(address_bits(from));
    let mut networks = Vec::new();
    let mut cursor = start;
    loop {
        let mut host_bits = cursor.trailing_zeros().min(width);
        while block_span(host_bits) > end - cursor {
            host_bits -= 1;
        }
        let prefix = (width - host_bits) as u8;
        let network = IpNetwork::new(u128_to_addr(cursor, version), prefix)
            .map_err(|e| format!("invalid block {cursor}/{prefix}: {e}"))?;
        networks.push(network);

        let last = cursor + block_span(host_bits);
        if last == end {
            break;
        }
        cursor = last + 1;
    }

    Ok(networks)
}

/// Widen `network` to `prefix` bits, masking the base address accordingly.
///
/// Networks already at or below `prefix` are returned unchanged.
pub fn widen(network: IpNetwork, prefix: u8) -> IpNetwork {
    if network.netmask() <= prefix {
        return network;
    }
    IpNetwork::new_truncate(network.network_address(), prefix).unwrap_or(network)
}

/// Total ordering key for networks: IPv4 before IPv6, then start address,
/// then prefix length (containing networks sort before contained ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkKey {
    pub version: u8,
    pub start: u128,
    pub prefix: u8,
}

impl NetworkKey {
    pub fn of(network: &IpNetwork) -> Self {
        let addr = network.network_address();
        Self {
            version: ip_version(addr),
            start: addr_to_u128(addr),
            prefix: network.netmask(),
        }
    }

    /// Last address (inclusive) covered by this network.
    pub fn end(&self) -> u128 {
        let width = if self.version == 4 { 32 } else { 128 };
        self.start + block_span(width - u32::from(self.prefix))
    }

    /// The key of the enclosing network with a shorter `prefix`.
    pub fn truncated(&self, prefix: u8) -> Self {
        let width: u32 = if self.version == 4 { 32 } else { 128 };
        let host_bits = width - u32::from(prefix);
        let start = if host_bits >= 128 {
            0
        } else {
            self.start & !block_span(host_bits)
        };
        Self {
            version: self.version,
            start,
            prefix,
        }
    }
}
