//! ACL rule parsing and matching

use crate::proxy::AdmissionRequest;
use crate::{Error, Result};
use http::Method;
use ipnet::IpNet;
use std::net::IpAddr;
use std::ops::RangeInclusive;

/// What a matching rule decides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
}

impl TryFrom<&str> for Action {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "ALLOW" | "ACCEPT" => Ok(Action::Allow),
            "DENY" | "REJECT" => Ok(Action::Deny),
            _ => Err(Error::parse(format!("Unknown ACL action: {}", s))),
        }
    }
}

/// Rule condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Exact host
    Domain(String),
    /// Host or any of its subdomains
    DomainSuffix(String),
    /// Host contains keyword
    DomainKeyword(String),
    /// IP literal host inside a network
    IpCidr(IpNet),
    /// Destination port or port range
    DstPort(RangeInclusive<u16>),
    /// Authenticated user name
    User(String),
    /// Request method
    Method(Method),
    /// Final rule
    Match,
}

/// Parsed rule: `TYPE,payload,ACTION` or `MATCH,ACTION`
#[derive(Debug, Clone)]
pub struct Rule {
    pub condition: Condition,
    pub action: Action,
}

impl Rule {
    /// Parse rule from string
    pub fn parse(rule_str: &str) -> Result<Self> {
        let parts: Vec<&str> = rule_str.split(',').map(|s| s.trim()).collect();

        let invalid = || Error::parse(format!("Invalid ACL rule: {}", rule_str));

        let kind = parts.first().ok_or_else(invalid)?.to_uppercase();
        if kind == "MATCH" || kind == "FINAL" {
            if parts.len() != 2 {
                return Err(invalid());
            }
            return Ok(Rule {
                condition: Condition::Match,
                action: Action::try_from(parts[1])?,
            });
        }

        if parts.len() != 3 || parts[1].is_empty() {
            return Err(invalid());
        }
        let payload = parts[1];

        let condition = match kind.as_str() {
            "DOMAIN" => Condition::Domain(payload.to_ascii_lowercase()),
            "DOMAIN-SUFFIX" => {
                Condition::DomainSuffix(payload.trim_start_matches('.').to_ascii_lowercase())
            }
            "DOMAIN-KEYWORD" => Condition::DomainKeyword(payload.to_ascii_lowercase()),
            "IP-CIDR" | "IP-CIDR6" => Condition::IpCidr(
                payload
                    .parse()
                    .map_err(|e| Error::parse(format!("Invalid CIDR {}: {}", payload, e)))?,
            ),
            "DST-PORT" => Condition::DstPort(parse_port_range(payload)?),
            "USER" => Condition::User(payload.to_string()),
            "METHOD" => Condition::Method(
                Method::from_bytes(payload.to_uppercase().as_bytes())
                    .map_err(|_| Error::parse(format!("Invalid method: {}", payload)))?,
            ),
            _ => return Err(Error::parse(format!("Unknown ACL rule type: {}", parts[0]))),
        };

        Ok(Rule {
            condition,
            action: Action::try_from(parts[2])?,
        })
    }

    /// Check whether the rule applies to a request
    pub fn matches(&self, req: &AdmissionRequest) -> bool {
        match &self.condition {
            Condition::Domain(domain) => req.host == *domain,
            Condition::DomainSuffix(suffix) => {
                req.host == *suffix
                    || (req.host.len() > suffix.len()
                        && req.host.ends_with(suffix.as_str())
                        && req.host.as_bytes()[req.host.len() - suffix.len() - 1] == b'.')
            }
            Condition::DomainKeyword(keyword) => req.host.contains(keyword.as_str()),
            Condition::IpCidr(net) => req
                .host
                .parse::<IpAddr>()
                .map(|ip| net.contains(&ip))
                .unwrap_or(false),
            Condition::DstPort(range) => range.contains(&req.port),
            Condition::User(user) => req.authenticated && req.user == *user,
            Condition::Method(method) => req.method == *method,
            Condition::Match => true,
        }
    }
}

fn parse_port_range(payload: &str) -> Result<RangeInclusive<u16>> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|e| Error::parse(format!("Invalid port {}: {}", s, e)))
    };

    match payload.split_once('-') {
        Some((lo, hi)) => {
            let (lo, hi) = (parse(lo)?, parse(hi)?);
            if lo > hi {
                return Err(Error::parse(format!("Invalid port range: {}", payload)));
            }
            Ok(lo..=hi)
        }
        None => {
            let port = parse(payload)?;
            Ok(port..=port)
        }
    }
}
