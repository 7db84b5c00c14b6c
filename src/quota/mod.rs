//! Per-user data quota
//!
//! Counters are lock-free per user; the map itself is sharded by `DashMap`.

use crate::config::UserConfig;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Quota collaborator
pub trait QuotaStore: Send + Sync {
    /// Whether the user may still transfer data. Never mutates.
    fn check(&self, user: &str) -> bool;

    /// Add completed usage for the user
    fn update(&self, user: &str, bytes: u64);

    /// Human-readable usage summary
    fn format(&self, user: &str) -> String;
}

struct UserQuota {
    limit: Option<u64>,
    used: AtomicU64,
}

impl UserQuota {
    fn new(limit: Option<u64>) -> Self {
        UserQuota {
            limit: limit.filter(|l| *l > 0),
            used: AtomicU64::new(0),
        }
    }
}

/// In-memory quota store
pub struct MemoryQuota {
    users: DashMap<String, UserQuota>,
}

impl MemoryQuota {
    pub fn new(users: &[UserConfig]) -> Self {
        let map = DashMap::new();
        for user in users {
            map.insert(user.username.clone(), UserQuota::new(user.quota));
        }
        MemoryQuota { users: map }
    }

    /// Bytes used so far
    pub fn used(&self, user: &str) -> u64 {
        self.users
            .get(user)
            .map(|q| q.used.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Configured limit, if any
    pub fn limit(&self, user: &str) -> Option<u64> {
        self.users.get(user).and_then(|q| q.limit)
    }

    /// Reset a user's counter
    pub fn reset(&self, user: &str) {
        if let Some(q) = self.users.get(user) {
            q.used.store(0, Ordering::Relaxed);
        }
    }
}

impl QuotaStore for MemoryQuota {
    fn check(&self, user: &str) -> bool {
        match self.users.get(user) {
            Some(q) => match q.limit {
                Some(limit) => q.used.load(Ordering::Relaxed) < limit,
                None => true,
            },
            None => true,
        }
    }

    fn update(&self, user: &str, bytes: u64) {
        if user.is_empty() {
            return;
        }
        if let Some(q) = self.users.get(user) {
            q.used.fetch_add(bytes, Ordering::Relaxed);
            return;
        }
        self.users
            .entry(user.to_string())
            .or_insert_with(|| UserQuota::new(None))
            .used
            .fetch_add(bytes, Ordering::Relaxed);
    }

    fn format(&self, user: &str) -> String {
        if user.is_empty() {
            return "-".to_string();
        }
        let limit = match self.limit(user) {
            Some(limit) => format_bytes(limit),
            None => "unlimited".to_string(),
        };
        format!("{}/{}", format_bytes(self.used(user)), limit)
    }
}

/// Format a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryQuota {
        MemoryQuota::new(&[
            UserConfig {
                username: "alice".to_string(),
                password: String::new(),
                quota: Some(1000),
            },
            UserConfig {
                username: "bob".to_string(),
                password: String::new(),
                quota: Some(0),
            },
        ])
    }

    #[test]
    fn test_check_limit() {
        let quota = store();
        assert!(quota.check("alice"));
        quota.update("alice", 999);
        assert!(quota.check("alice"));
        quota.update("alice", 1);
        assert!(!quota.check("alice"));

        quota.reset("alice");
        assert!(quota.check("alice"));
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let quota = store();
        quota.update("bob", u32::MAX as u64);
        assert!(quota.check("bob"));
        assert_eq!(quota.limit("bob"), None);
    }

    #[test]
    fn test_unknown_and_empty_users() {
        let quota = store();
        assert!(quota.check(""));
        assert!(quota.check("carol"));

        quota.update("", 10);
        assert_eq!(quota.used(""), 0);

        quota.update("carol", 10);
        assert_eq!(quota.used("carol"), 10);
        assert!(quota.check("carol"));
    }

    #[test]
    fn test_format() {
        let quota = store();
        quota.update("alice", 512);
        assert_eq!(quota.format("alice"), "512 B/1000 B");
        assert_eq!(quota.format("bob"), "0 B/unlimited");
        assert_eq!(quota.format(""), "-");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(10 * 1024 * 1024 * 1024), "10.00 GiB");
    }
}
