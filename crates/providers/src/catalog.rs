//! Service -> repository catalog.
//!
//! A small JSON file (`SERVICE_CATALOG_PATH`) mapping service/workload
//! names to `org/repo`, consulted before falling back to the naming
//! convention (`GITHUB_ORG/<service>`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceCatalog {
    #[serde(default)]
    services: BTreeMap<String, String>,
}

impl ServiceCatalog {
    /// Load from a JSON file; a missing or bad file yields an empty
    /// catalog (naming convention still works).
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Self>(&raw) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "service catalog parse failed");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("SERVICE_CATALOG_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map_or_else(Self::default, |p| Self::load(Path::new(&p)))
    }

    #[must_use]
    pub fn from_map(services: BTreeMap<String, String>) -> Self {
        Self { services }
    }

    /// Exact lookup of a service/workload name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.services.get(name.trim()).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut m = BTreeMap::new();
        m.insert("payments-api".to_string(), "acme/payments".to_string());
        let c = ServiceCatalog::from_map(m);
        assert_eq!(c.lookup("payments-api"), Some("acme/payments"));
        assert_eq!(c.lookup("unknown"), None);
    }
}
