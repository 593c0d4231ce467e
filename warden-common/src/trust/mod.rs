use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::time::SystemTime;

use crate::models::saved_device::SavedDevice;

pub const DEFAULT_SUBNET_V4_PREFIX: u8 = 24;
const SUBNET_V6_PREFIX: u8 = 64;

/// Outcome of a device-trust check. The evaluator only ever decides whether
/// the OTP challenge may be skipped; the primary credential check is not
/// its concern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TrustDecision {
    Trusted,
    Untrusted {
        reason: &'static str,
        require_otp: bool,
    },
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustDecision::Trusted)
    }
}

/// Decision table for a login from a recognized-or-unknown device.
///
/// A missing record or invalid trust leaves the challenge decision to the
/// caller; a subnet change on an otherwise-trusted device always forces a
/// re-challenge.
pub fn evaluate(
    device: Option<&SavedDevice>,
    current_ip: IpAddr,
    now: SystemTime,
    subnet_v4_prefix: u8,
) -> TrustDecision {
    let Some(device) = device else {
        return TrustDecision::Untrusted {
            reason: "new device",
            require_otp: false,
        };
    };

    if !device.is_trust_valid(now) {
        return TrustDecision::Untrusted {
            reason: "trust expired",
            require_otp: false,
        };
    }

    let last_known_ip = match device.ip_address.parse::<IpAddr>() {
        Ok(ip) => ip,
        // An unparseable stored address cannot vouch for the current one
        Err(_) => {
            return TrustDecision::Untrusted {
                reason: "ip changed",
                require_otp: true,
            };
        }
    };

    if !same_subnet(last_known_ip, current_ip, subnet_v4_prefix) {
        return TrustDecision::Untrusted {
            reason: "ip changed",
            require_otp: true,
        };
    }

    TrustDecision::Trusted
}

/// Compares the network portion of two addresses. IPv4 addresses match on
/// the given prefix (/24 by default); IPv6 addresses match on /64.
pub fn same_subnet(a: IpAddr, b: IpAddr, v4_prefix: u8) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let prefix = u32::from(v4_prefix.min(32));
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            (u32::from(a) & mask) == (u32::from(b) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            let mask = u128::MAX << (128 - u32::from(SUBNET_V6_PREFIX));
            (u128::from(a) & mask) == (u128::from(b) & mask)
        }
        _ => false,
    }
}

/// Derives the opaque fingerprint for a device from its reported
/// characteristics. Raw identifying data is never stored; only this digest.
pub fn fingerprint(device_id: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;
    use uuid::Uuid;

    fn test_device(ip: &str, trust_expires_at: SystemTime, revoked_at: Option<SystemTime>) -> SavedDevice {
        SavedDevice {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            device_fingerprint: fingerprint("device-1", "agent/1.0"),
            ip_address: String::from(ip),
            device_name: None,
            last_used_at: SystemTime::now(),
            trust_expires_at,
            revoked_at,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_same_subnet_v4() {
        let a = "192.168.10.5".parse().unwrap();
        let b = "192.168.10.200".parse().unwrap();
        let c = "192.168.11.5".parse().unwrap();

        assert!(same_subnet(a, b, 24));
        assert!(!same_subnet(a, c, 24));
        assert!(same_subnet(a, c, 16));
        assert!(same_subnet(a, c, 0));
    }

    #[test]
    fn test_same_subnet_v6_and_mixed() {
        let a = "2001:db8:1:1::1".parse().unwrap();
        let b = "2001:db8:1:1::ffff".parse().unwrap();
        let c = "2001:db8:1:2::1".parse().unwrap();
        let v4 = "192.168.10.5".parse().unwrap();

        assert!(same_subnet(a, b, 24));
        assert!(!same_subnet(a, c, 24));
        assert!(!same_subnet(a, v4, 24));
    }

    #[test]
    fn test_evaluate_unknown_device() {
        let ip = "10.0.0.1".parse().unwrap();

        assert_eq!(
            evaluate(None, ip, SystemTime::now(), DEFAULT_SUBNET_V4_PREFIX),
            TrustDecision::Untrusted {
                reason: "new device",
                require_otp: false,
            }
        );
    }

    #[test]
    fn test_evaluate_never_trusts_expired_or_revoked() {
        let now = SystemTime::now();
        let ip = "10.0.0.1".parse().unwrap();

        let expired = test_device("10.0.0.1", now - Duration::from_secs(1), None);
        let expiring_now = test_device("10.0.0.1", now, None);
        let revoked = test_device(
            "10.0.0.1",
            now + Duration::from_secs(3600),
            Some(now - Duration::from_secs(5)),
        );

        // Fingerprint and subnet both match; trust validity alone must deny
        for device in [&expired, &expiring_now, &revoked] {
            assert_eq!(
                evaluate(Some(device), ip, now, DEFAULT_SUBNET_V4_PREFIX),
                TrustDecision::Untrusted {
                    reason: "trust expired",
                    require_otp: false,
                }
            );
        }
    }

    #[test]
    fn test_evaluate_subnet_change_forces_otp() {
        let now = SystemTime::now();
        let device = test_device("192.168.10.5", now + Duration::from_secs(3600), None);

        let other_subnet = "192.168.11.5".parse().unwrap();
        assert_eq!(
            evaluate(Some(&device), other_subnet, now, DEFAULT_SUBNET_V4_PREFIX),
            TrustDecision::Untrusted {
                reason: "ip changed",
                require_otp: true,
            }
        );

        let same = "192.168.10.77".parse().unwrap();
        assert!(evaluate(Some(&device), same, now, DEFAULT_SUBNET_V4_PREFIX).is_trusted());
    }

    #[test]
    fn test_evaluate_garbage_stored_ip_requires_otp() {
        let now = SystemTime::now();
        let device = test_device("not-an-ip", now + Duration::from_secs(3600), None);

        assert_eq!(
            evaluate(
                Some(&device),
                "10.0.0.1".parse().unwrap(),
                now,
                DEFAULT_SUBNET_V4_PREFIX
            ),
            TrustDecision::Untrusted {
                reason: "ip changed",
                require_otp: true,
            }
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_opaque() {
        let fp1 = fingerprint("device-1", "agent/1.0");
        let fp2 = fingerprint("device-1", "agent/1.0");
        let fp3 = fingerprint("device-2", "agent/1.0");

        assert_eq!(fp1, fp2);
        assert_ne!(fp1, fp3);
        assert_eq!(fp1.len(), 64);
        assert!(!fp1.contains("device-1"));
    }
}
