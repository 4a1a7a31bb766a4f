//! Network-level optimizations applied before merge: IP-version
//! enforcement and prefix trimming. Float rounding is applied by the coercer
//! from the same [`OptimizationConfig`].

use rangemeld_shared::network::ip_version;
use rangemeld_shared::{IpNetwork, OptimizationConfig, widen};

/// Bits an IPv4 network is offset by inside an IPv6 database.
const V4_IN_V6_OFFSET: u8 = 96;

/// Why a network was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// `force_ip_version` is set and the family differs from the database.
    VersionMismatch,
    /// An IPv6 network cannot be stored in an IPv4 database.
    Unrepresentable,
}

/// Result of optimizing one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Keep { network: IpNetwork, trimmed: bool },
    Discard(Discard),
}

/// Applies a database's optimization settings to networks.
#[derive(Debug, Clone)]
pub struct Optimizer {
    ip_version: u8,
    force_ip_version: bool,
    max_prefix: u8,
}

impl Optimizer {
    pub fn new(ip_version: u8, config: &OptimizationConfig) -> Self {
        Self {
            ip_version,
            force_ip_version: config.force_ip_version,
            max_prefix: config.max_prefix,
        }
    }

    pub fn apply(&self, network: IpNetwork) -> Outcome {
        let version = ip_version(network.network_address());
        if version != self.ip_version {
            if self.force_ip_version {
                return Outcome::Discard(Discard::VersionMismatch);
            }
            if version == 6 {
                return Outcome::Discard(Discard::Unrepresentable);
            }
        }

        if self.max_prefix == 0 {
            return Outcome::Keep {
                network,
                trimmed: false,
            };
        }

        // max_prefix is measured in the database's address width.
        let offset = if version == 4 && self.ip_version == 6 {
            V4_IN_V6_OFFSET
        } else {
            0
        };
        if network.netmask() + offset <= self.max_prefix {
            return Outcome::Keep {
                network,
                trimmed: false,
            };
        }
        Outcome::Keep {
            network: widen(network, self.max_prefix.saturating_sub(offset)),
            trimmed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangemeld_shared::parse_network;

    fn net(s: &str) -> IpNetwork {
        parse_network(s).unwrap()
    }

    fn optimizer(ip_version: u8, force_ip_version: bool, max_prefix: u8) -> Optimizer {
        Optimizer::new(
            ip_version,
            &OptimizationConfig {
                force_ip_version,
                max_prefix,
                ..Default::default()
            },
        )
    }

    #[test]
    fn trims_to_max_prefix_with_masked_base() {
        let outcome = optimizer(4, false, 16).apply(net("10.20.30.0/24"));
        assert_eq!(
            outcome,
            Outcome::Keep {
                network: net("10.20.0.0/16"),
                trimmed: true
            }
        );
    }

    #[test]
    fn short_prefixes_untouched() {
        let outcome = optimizer(4, false, 16).apply(net("10.0.0.0/8"));
        assert_eq!(
            outcome,
            Outcome::Keep {
                network: net("10.0.0.0/8"),
                trimmed: false
            }
        );
        assert!(matches!(
            optimizer(4, false, 0).apply(net("10.0.0.1/32")),
            Outcome::Keep { trimmed: false, .. }
        ));
    }

    #[test]
    fn v4_prefix_measured_in_v6_width() {
        let db = optimizer(6, false, 112);
        assert_eq!(
            db.apply(net("10.20.30.0/24")),
            Outcome::Keep {
                network: net("10.20.0.0/16"),
                trimmed: true
            }
        );
        assert_eq!(
            db.apply(net("2001:db8::1/128")),
            Outcome::Keep {
                network: net("2001:db8::/112"),
                trimmed: true
            }
        );
    }

    #[test]
    fn forced_version_discards_mismatch() {
        assert_eq!(
            optimizer(6, true, 0).apply(net("10.0.0.0/8")),
            Outcome::Discard(Discard::VersionMismatch)
        );
        assert_eq!(
            optimizer(4, true, 0).apply(net("2001:db8::/32")),
            Outcome::Discard(Discard::VersionMismatch)
        );
    }

    #[test]
    fn v6_never_fits_v4_database() {
        assert_eq!(
            optimizer(4, false, 0).apply(net("2001:db8::/32")),
            Outcome::Discard(Discard::Unrepresentable)
        );
        assert!(matches!(
            optimizer(6, false, 0).apply(net("10.0.0.0/8")),
            Outcome::Keep { trimmed: false, .. }
        ));
    }
}
