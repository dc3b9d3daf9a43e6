//! Mount table: which backends are exposed, and under which rules
//!
//! Only backends that finished their bootstrap are ever pushed here. The
//! table grows while the fleet starts up and is handed to the HTTP layer
//! by value once startup is over.

use std::sync::Arc;

use crate::error::{ProxyError, ProxyResult};
use crate::registry::CapabilityRegistry;

/// One backend exposed under `/<name>/`
#[derive(Debug, Clone)]
pub struct Mount {
    pub name: String,
    /// Accepted bearer tokens; empty means no authorization
    pub auth_tokens: Vec<String>,
    /// Advertise the logging capability and log each request at info
    pub log_enabled: bool,
    pub registry: Arc<CapabilityRegistry>,
}

/// A backend name becomes a literal path segment, so it may only use
/// ASCII letters, digits, `.`, `_` and `-`, and must not be `.` or `..`
pub fn validate_name(name: &str) -> ProxyResult<()> {
    if name.is_empty() {
        return Err(ProxyError::Config("backend name must not be empty".to_string()));
    }
    if name == "." || name == ".." {
        return Err(ProxyError::Config(format!(
            "backend name '{}' is not a valid path segment",
            name
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ProxyError::Config(format!(
            "backend name '{}' contains '{}'; only [A-Za-z0-9._-] is allowed",
            name, c
        )));
    }
    Ok(())
}

impl Mount {
    /// Path prefix the backend is served under
    pub fn path(&self) -> String {
        format!("/{}", self.name)
    }
}

/// Append-only collection of mounts
#[derive(Debug, Default, Clone)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mount. Names are unique plain path segments.
    pub fn push(&mut self, mount: Mount) -> ProxyResult<()> {
        validate_name(&mount.name)?;
        if self.get(&mount.name).is_some() {
            return Err(ProxyError::Config(format!(
                "backend '{}' is already mounted",
                mount.name
            )));
        }
        self.mounts.push(mount);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Mount> {
        self.mounts.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mount> {
        self.mounts.iter()
    }

    /// Mounted backend names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mounts.iter().map(|m| m.name.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(name: &str) -> Mount {
        Mount {
            name: name.to_string(),
            auth_tokens: vec![],
            log_enabled: false,
            registry: Arc::new(CapabilityRegistry::new()),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut table = MountTable::new();
        table.push(mount("github")).unwrap();
        assert!(table.push(mount("github")).is_err());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("github").unwrap().path(), "/github");
    }

    #[test]
    fn test_route_syntax_names_rejected() {
        let mut table = MountTable::new();
        for name in ["{id}", "*rest", "a b", ".."] {
            assert!(
                matches!(table.push(mount(name)), Err(ProxyError::Config(_))),
                "{} was mounted",
                name
            );
        }
        assert!(table.is_empty());
        table.push(mount("git-hub_2.0")).unwrap();
        assert_eq!(table.names(), vec!["git-hub_2.0".to_string()]);
    }

    #[test]
    fn test_names_sorted() {
        let mut table = MountTable::new();
        table.push(mount("zeta")).unwrap();
        table.push(mount("alpha")).unwrap();
        assert_eq!(table.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
