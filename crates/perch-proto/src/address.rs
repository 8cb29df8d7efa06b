//! Network addresses (JIDs): `local@domain/resource`.
//!
//! Subscription state lives on *bare* addresses (`local@domain`); sessions are
//! identified by full addresses carrying a resource. Parsing normalizes the
//! local part and domain to lowercase so that map lookups never depend on the
//! case a client happened to send.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The address was empty or structurally invalid.
    #[error("malformed address: {0}")]
    Malformed(String),
    /// A part exceeded the 1023-byte limit.
    #[error("address part too long: {0}")]
    TooLong(String),
}

const MAX_PART_LEN: usize = 1023;

/// A full network address: optional local part, domain, optional resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

/// A bare address (no resource), used as the identity key for rosters and
/// subscription state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BareAddress {
    local: Option<String>,
    domain: String,
}

impl Address {
    /// Build an address from parts. Parts are normalized (lowercased local
    /// part and domain; the resource keeps its case).
    pub fn new(
        local: Option<&str>,
        domain: &str,
        resource: Option<&str>,
    ) -> Result<Self, AddressError> {
        let domain = validate_part(domain, "domain")?.to_lowercase();
        let local = match local {
            Some(l) => Some(validate_part(l, "local")?.to_lowercase()),
            None => None,
        };
        let resource = match resource {
            Some(r) => Some(validate_part(r, "resource")?.to_string()),
            None => None,
        };
        Ok(Self { local, domain, resource })
    }

    /// The local (account) part, if any.
    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// The domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The session resource, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Strip the resource, yielding the bare address.
    pub fn to_bare(&self) -> BareAddress {
        BareAddress {
            local: self.local.clone(),
            domain: self.domain.clone(),
        }
    }

    /// Whether this address is already bare.
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }
}

impl BareAddress {
    /// Build a bare address from parts.
    pub fn new(local: Option<&str>, domain: &str) -> Result<Self, AddressError> {
        let addr = Address::new(local, domain, None)?;
        Ok(addr.to_bare())
    }

    /// The local (account) part, if any.
    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// The domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Promote back to a full address with no resource.
    pub fn to_address(&self) -> Address {
        Address {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// A full address on this account with the given resource.
    pub fn with_resource(&self, resource: &str) -> Result<Address, AddressError> {
        Address::new(self.local.as_deref(), &self.domain, Some(resource))
    }
}

fn validate_part<'a>(part: &'a str, what: &str) -> Result<&'a str, AddressError> {
    if part.is_empty() {
        return Err(AddressError::Malformed(format!("empty {what} part")));
    }
    if part.len() > MAX_PART_LEN {
        return Err(AddressError::TooLong(what.to_string()));
    }
    if part.contains(['@', '/', ' ']) && what != "resource" {
        return Err(AddressError::Malformed(format!(
            "{what} part contains reserved character"
        )));
    }
    Ok(part)
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressError::Malformed("empty address".into()));
        }
        // Resource is everything after the first '/'; the local/domain split
        // is on the first '@' before that.
        let (bare, resource) = match s.split_once('/') {
            Some((b, r)) => (b, Some(r)),
            None => (s, None),
        };
        let (local, domain) = match bare.split_once('@') {
            Some((l, d)) => (Some(l), d),
            None => (None, bare),
        };
        Address::new(local, domain, resource)
    }
}

impl FromStr for BareAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: Address = s.parse()?;
        Ok(addr.to_bare())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{}@", local)?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl fmt::Display for BareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{}@", local)?;
        }
        write!(f, "{}", self.domain)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.to_string()
    }
}

impl TryFrom<String> for BareAddress {
    type Error = AddressError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BareAddress> for String {
    fn from(a: BareAddress) -> String {
        a.to_string()
    }
}

impl From<BareAddress> for Address {
    fn from(a: BareAddress) -> Address {
        a.to_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_address() {
        let a: Address = "Alice@Example.ORG/laptop".parse().unwrap();
        assert_eq!(a.local(), Some("alice"));
        assert_eq!(a.domain(), "example.org");
        assert_eq!(a.resource(), Some("laptop"));
        assert_eq!(a.to_string(), "alice@example.org/laptop");
    }

    #[test]
    fn parse_bare_and_domain_only() {
        let b: BareAddress = "bob@example.org".parse().unwrap();
        assert_eq!(b.local(), Some("bob"));
        assert!(b.to_address().is_bare());

        let d: Address = "example.org".parse().unwrap();
        assert_eq!(d.local(), None);
        assert_eq!(d.domain(), "example.org");
    }

    #[test]
    fn resource_keeps_case() {
        let a: Address = "carol@example.org/Home-PC".parse().unwrap();
        assert_eq!(a.resource(), Some("Home-PC"));
    }

    #[test]
    fn bare_strips_resource() {
        let a: Address = "dan@example.org/phone".parse().unwrap();
        assert_eq!(a.to_bare().to_string(), "dan@example.org");
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<Address>().is_err());
        assert!("@example.org".parse::<Address>().is_err());
        assert!("alice@".parse::<Address>().is_err());
        assert!("alice@ex ample.org".parse::<Address>().is_err());
    }

    #[test]
    fn serde_round_trip_as_string() {
        let a: Address = "eve@example.org/web".parse().unwrap();
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"eve@example.org/web\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
