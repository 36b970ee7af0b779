use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;
use crate::config::SafetyConfig;
use crate::errors::{Rejection, WardenError};

/// An IP network with its address already masked to the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNet {
    addr: IpAddr,
    prefix: u8,
}

impl IpNet {
    /// Parse `addr/prefix`, or a bare address as a single-host network.
    pub fn parse(value: &str) -> Option<Self> {
        let (addr, prefix) = match value.split_once('/') {
            Some((addr, prefix)) => (addr.trim(), Some(prefix.trim())),
            None => (value.trim(), None),
        };
        let addr: IpAddr = addr.parse().ok()?;
        let max = max_prefix(&addr);
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { addr: mask(addr, prefix), prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip.to_canonical()) {
            (IpAddr::V4(_), ip @ IpAddr::V4(_)) | (IpAddr::V6(_), ip @ IpAddr::V6(_)) => {
                mask(ip, self.prefix) == self.addr
            }
            _ => false,
        }
    }

    /// Two prefixes overlap exactly when one contains the other's network
    /// address.
    pub fn overlaps(&self, other: &IpNet) -> bool {
        self.contains(other.addr) || other.contains(self.addr)
    }

    pub fn covers(&self, other: &IpNet) -> bool {
        self.prefix <= other.prefix && self.contains(other.addr)
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let m = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
            IpAddr::V4((bits & m).into())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let m = if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) };
            IpAddr::V6((bits & m).into())
        }
    }
}

/// One configured range: a network or a domain name with its subdomains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRule {
    Net(IpNet),
    Domain(String),
}

impl RangeRule {
    pub fn parse(value: &str) -> Result<Self, WardenError> {
        let value = value.trim();
        if let Some(net) = IpNet::parse(value) {
            return Ok(Self::Net(net));
        }
        if value.contains('/') {
            return Err(WardenError::Config(format!("Invalid network range: {}", value)));
        }
        let domain = value.trim_start_matches("*.").trim_start_matches('.').to_lowercase();
        if !is_hostname(&domain) {
            return Err(WardenError::Config(format!("Invalid range entry: {}", value)));
        }
        Ok(Self::Domain(domain))
    }

    fn matches(&self, target: &Target) -> bool {
        match (self, target) {
            (Self::Net(net), Target::Ip(ip)) => net.contains(*ip),
            (Self::Net(net), Target::Net(t)) => net.overlaps(t),
            (Self::Domain(d), Target::Host(h)) => domain_matches(d, h),
            _ => false,
        }
    }

    /// Allow-list semantics: the whole target must fall inside the rule.
    fn admits(&self, target: &Target) -> bool {
        match (self, target) {
            (Self::Net(net), Target::Net(t)) => net.covers(t),
            _ => self.matches(target),
        }
    }
}

fn domain_matches(domain: &str, host: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// A scan target reduced to what the gate reasons about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Ip(IpAddr),
    Net(IpNet),
    Host(String),
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, Rejection> {
        let value = raw.trim();
        let invalid = || Rejection::InvalidTarget(raw.to_string());
        if value.is_empty() || value.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(invalid());
        }

        if value.contains("://") {
            let url = reqwest::Url::parse(value).map_err(|_| invalid())?;
            let host = url.host_str().ok_or_else(invalid)?;
            return Self::from_host(host.trim_start_matches('[').trim_end_matches(']')).ok_or_else(invalid);
        }
        if value.contains('/') {
            return IpNet::parse(value).map(Self::Net).ok_or_else(invalid);
        }
        if let Some(target) = Self::from_host(value) {
            return Ok(target);
        }
        // [v6]:port or host:port
        let host = if let Some(rest) = value.strip_prefix('[') {
            rest.split_once(']').map(|(h, _)| h)
        } else {
            value
                .rsplit_once(':')
                .filter(|(_, port)| port.parse::<u16>().is_ok())
                .map(|(h, _)| h)
        };
        host.and_then(Self::from_host).ok_or_else(invalid)
    }

    /// True when `self` names nothing outside `scope`.
    pub fn within(&self, scope: &Target) -> bool {
        match (scope, self) {
            (Target::Ip(a), Target::Ip(b)) => a == b,
            (Target::Net(net), Target::Ip(ip)) => net.contains(*ip),
            (Target::Net(net), Target::Net(inner)) => net.covers(inner),
            (Target::Host(a), Target::Host(b)) => a == b,
            _ => false,
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(Self::Ip(ip.to_canonical()));
        }
        let host = host.trim_end_matches('.').to_lowercase();
        if ends_in_number(&host) {
            return legacy_ipv4(&host).map(Self::Ip);
        }
        is_hostname(&host).then_some(Self::Host(host))
    }
}

/// Scanners hand hosts to `inet_aton`, which reads `127.1`, `2130706433`,
/// `0x7f000001` and `0177.0.0.1` as addresses. A host whose last label is
/// numeric is therefore an address or nothing.
fn ends_in_number(host: &str) -> bool {
    let Some(last) = host.rsplit('.').next() else {
        return false;
    };
    if last.is_empty() {
        return false;
    }
    let hex = last.strip_prefix("0x").map(|h| h.chars().all(|c| c.is_ascii_hexdigit()));
    hex.unwrap_or_else(|| last.chars().all(|c| c.is_ascii_digit()))
}

/// Resolve the shorthand forms through the WHATWG host parser.
fn legacy_ipv4(host: &str) -> Option<IpAddr> {
    let url = reqwest::Url::parse(&format!("http://{}/", host)).ok()?;
    url.host_str()?.parse::<Ipv4Addr>().ok().map(IpAddr::V4)
}

fn is_hostname(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 253
        && value.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Blocklist and allow-list evaluation. The blocklist is absolute.
#[derive(Debug, Clone)]
pub struct TargetValidator {
    blocked: Vec<(String, RangeRule)>,
    allowed: Vec<(String, RangeRule)>,
}

impl TargetValidator {
    pub fn new(config: &SafetyConfig) -> Result<Self, WardenError> {
        let parse_all = |ranges: &[String]| -> Result<Vec<(String, RangeRule)>, WardenError> {
            ranges
                .iter()
                .map(|r| Ok((r.trim().to_string(), RangeRule::parse(r)?)))
                .collect()
        };
        Ok(Self {
            blocked: parse_all(&config.blocked_ranges)?,
            allowed: parse_all(&config.allowed_ranges)?,
        })
    }

    pub fn allow_list_mode(&self) -> bool {
        !self.allowed.is_empty()
    }

    pub fn validate(&self, raw: &str) -> Result<(), Rejection> {
        let target = Target::parse(raw)?;

        if let Some((range, _)) = self.blocked.iter().find(|(_, rule)| rule.matches(&target)) {
            debug!(target = raw, range = %range, "Target matched blocked range");
            return Err(Rejection::BlockedTarget {
                target: raw.trim().to_string(),
                range: range.clone(),
            });
        }

        if self.allow_list_mode() && !self.allowed.iter().any(|(_, rule)| rule.admits(&target)) {
            return Err(Rejection::NotAllowed(raw.trim().to_string()));
        }
        Ok(())
    }
}
