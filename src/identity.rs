// Host identity module - hostname and primary IP stamped on every measurement
//
// Resolved once at daemon startup and shared read-only with every monitor
// task. There is no re-resolution on network changes.

use chrono::{DateTime, Utc};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{info, warn};

use crate::measurement::Measurement;

/// Tag keys owned by enrichment
pub const HOSTNAME_TAG: &str = "hostname";
pub const HOSTNAME_RAW_TAG: &str = "hostname_raw";
pub const IPADDR_TAG: &str = "ipaddr";
pub const TYPE_TAG: &str = "type";

/// Identity of the host the daemon runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    hostname: String,
    ipaddr: IpAddr,
}

impl HostIdentity {
    pub fn new(hostname: impl Into<String>, ipaddr: IpAddr) -> Self {
        HostIdentity {
            hostname: hostname.into(),
            ipaddr,
        }
    }

    /// Looks up the local hostname and primary IP address
    ///
    /// Lookup failures degrade to `localhost` / `127.0.0.1` with a warning
    /// rather than aborting startup.
    pub fn resolve() -> Self {
        let hostname = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                warn!(error = %e, "Failed to resolve hostname, using 'localhost'");
                "localhost".to_string()
            }
        };

        let ipaddr = match primary_ip() {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "Failed to resolve primary IP address, using loopback");
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        };

        let identity = HostIdentity::new(hostname, ipaddr);
        info!("Running on {} ({})", identity.hostname(), identity.ipaddr());
        identity
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn ipaddr(&self) -> IpAddr {
        self.ipaddr
    }

    /// Stamps a measurement with host identity, the monitor type and a timestamp
    ///
    /// Idempotent on the tags it owns: enriching twice yields the same tag
    /// values, and the timestamp is only set the first time.
    pub fn enrich(&self, measurement: &mut Measurement, monitor_type: &str, now: DateTime<Utc>) {
        measurement.set_tag(HOSTNAME_TAG, self.hostname.as_str());
        measurement.set_tag(HOSTNAME_RAW_TAG, self.hostname.as_str());
        measurement.set_tag(IPADDR_TAG, self.ipaddr.to_string());
        measurement.set_tag(TYPE_TAG, monitor_type);
        measurement.stamp(now);
    }
}

/// Local address the kernel would route outbound traffic from
///
/// Connecting a UDP socket only selects a route; no packet is sent.
fn primary_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity() -> HostIdentity {
        HostIdentity::new("node-1.example.org", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
    }

    #[test]
    fn test_enrich_sets_owned_tags() {
        let mut m = Measurement::new().with_value("uptime", 10i64);
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        identity().enrich(&mut m, "uptime", now);

        assert_eq!(m.tag(HOSTNAME_TAG), Some("node-1.example.org"));
        assert_eq!(m.tag(HOSTNAME_RAW_TAG), Some("node-1.example.org"));
        assert_eq!(m.tag(IPADDR_TAG), Some("10.0.0.5"));
        assert_eq!(m.tag(TYPE_TAG), Some("uptime"));
        assert_eq!(m.timestamp(), Some(now));
    }

    #[test]
    fn test_enrich_is_idempotent() {
        let id = identity();
        let first = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 15, 10, 31, 0).unwrap();

        let mut once = Measurement::new().with_value("load_1m", 0.5).with_tag("x", "y");
        id.enrich(&mut once, "load", first);

        let mut twice = once.clone();
        id.enrich(&mut twice, "load", later);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_enrich_overrides_colliding_value() {
        let mut m = Measurement::new().with_value("type", 3i64);
        identity().enrich(&mut m, "procs", Utc::now());
        assert!(m.value("type").is_none());
        assert_eq!(m.tag("type"), Some("procs"));
    }

    #[test]
    fn test_resolve_never_fails() {
        let id = HostIdentity::resolve();
        assert!(!id.hostname().is_empty());
    }
}
