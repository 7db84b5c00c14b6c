//! Domain trie for allow-list matching

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    /// Entry ends here
    terminal: bool,
}

/// Set of domains where every entry also covers its subdomains.
///
/// Accepts `example.com`, `.example.com` and `*.example.com` as the same
/// entry. `+` or `*` covers every host.
#[derive(Debug, Clone, Default)]
pub struct DomainTrie {
    root: TrieNode,
    match_all: bool,
    count: usize,
}

impl DomainTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert domain, returns false for empty input
    pub fn insert(&mut self, domain: &str) -> bool {
        let domain = domain.trim().to_ascii_lowercase();

        if domain == "+" || domain == "*" {
            self.match_all = true;
            self.count += 1;
            return true;
        }

        let domain = domain
            .strip_prefix("*.")
            .or_else(|| domain.strip_prefix('.'))
            .unwrap_or(&domain);
        if domain.is_empty() {
            return false;
        }

        let mut node = &mut self.root;
        for label in domain.rsplit('.') {
            node = node.children.entry(label.to_string()).or_default();
        }
        node.terminal = true;
        self.count += 1;
        true
    }

    /// Check if host equals or is a subdomain of an entry
    pub fn contains(&self, host: &str) -> bool {
        if self.match_all {
            return true;
        }
        if host.is_empty() {
            return false;
        }

        let host = host.to_ascii_lowercase();
        let mut node = &self.root;
        for label in host.rsplit('.') {
            match node.children.get(label) {
                Some(child) if child.terminal => return true,
                Some(child) => node = child,
                None => return false,
            }
        }
        false
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<S: AsRef<str>> FromIterator<S> for DomainTrie {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut trie = DomainTrie::new();
        for domain in iter {
            trie.insert(domain.as_ref());
        }
        trie
    }
}
