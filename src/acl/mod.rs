//! Access control
//!
//! Rule-based ACL over the classified request plus a static host allow-list.

mod rule;
mod trie;

pub use rule::{Action, Condition, Rule};
pub use trie::DomainTrie;

use crate::proxy::AdmissionRequest;
use crate::Result;
use tracing::trace;

/// ACL and allow-list collaborator
pub trait AccessControl: Send + Sync {
    /// Evaluate the ACL for a classified request
    fn is_allowed(&self, req: &AdmissionRequest) -> bool;

    /// Whether the host is on the static allow-list
    fn is_whitelisted(&self, host: &str) -> bool;
}

/// Ordered first-match ACL
pub struct RuleAcl {
    rules: Vec<Rule>,
    whitelist: DomainTrie,
}

impl RuleAcl {
    pub fn new(rules: &[String], whitelist: &[String]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|r| Rule::parse(r))
            .collect::<Result<Vec<_>>>()?;

        Ok(RuleAcl {
            rules,
            whitelist: whitelist.iter().collect(),
        })
    }

    /// Get rule count
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl AccessControl for RuleAcl {
    fn is_allowed(&self, req: &AdmissionRequest) -> bool {
        match self.rules.iter().find(|rule| rule.matches(req)) {
            Some(rule) => {
                trace!("[acl] {}:{} matched {:?}", req.host, req.port, rule);
                rule.action == Action::Allow
            }
            None => true,
        }
    }

    fn is_whitelisted(&self, host: &str) -> bool {
        self.whitelist.contains(host)
    }
}
