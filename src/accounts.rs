//! Account directory boundary.
//!
//! The router and synchronizer only ever ask two questions: is this
//! domain ours, and does this local username exist. Both answers come
//! through this trait so the core never grows a user-store dependency.

use perch_proto::Address;

pub trait AccountDirectory: Send + Sync {
    /// Whether the domain is served by this node (users of it are local).
    fn is_local_domain(&self, domain: &str) -> bool;

    /// Whether `username` names a registered account on a local domain.
    fn is_registered_local_account(&self, username: &str) -> bool;

    /// Whether the address belongs to a registered local account.
    fn is_local_account(&self, address: &Address) -> bool {
        match address.local() {
            Some(local) => {
                self.is_local_domain(address.domain()) && self.is_registered_local_account(local)
            }
            None => false,
        }
    }
}

/// Fixed account list for the daemon's config-driven mode and for tests.
pub struct StaticDirectory {
    domain: String,
    accounts: Vec<String>,
}

impl StaticDirectory {
    pub fn new(domain: impl Into<String>, accounts: Vec<String>) -> Self {
        Self {
            domain: domain.into(),
            accounts,
        }
    }
}

impl AccountDirectory for StaticDirectory {
    fn is_local_domain(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }

    fn is_registered_local_account(&self, username: &str) -> bool {
        self.accounts.iter().any(|a| a == username)
    }
}
