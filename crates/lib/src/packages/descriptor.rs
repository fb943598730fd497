//! Package descriptor: a skill package's name, the routes it serves, and where to reach it.

use serde::{Deserialize, Serialize};

/// Last known reachability of a package endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    pub name: String,
    /// Intents/routes served. A trailing `*` makes the route a prefix pattern (e.g. `weather.*`).
    pub routes: Vec<String>,
    /// Base URL for the HTTP transport; ignored by in-process packages.
    pub endpoint: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub health: HealthState,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>, routes: &[&str], endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: routes.iter().map(|r| r.to_string()).collect(),
            endpoint: endpoint.into(),
            description: String::new(),
            health: HealthState::Unknown,
        }
    }

    /// Routes lowercased and trimmed, as the registry compares them.
    pub fn normalized_routes(&self) -> Vec<String> {
        self.routes.iter().map(|r| normalize_route(r)).collect()
    }
}

pub fn normalize_route(route: &str) -> String {
    route.trim().to_lowercase()
}

/// How well `route` (normalized) serves `target` (normalized): exact match ranks above any
/// pattern; longer pattern prefixes rank above shorter ones.
pub(crate) fn route_rank(route: &str, target: &str) -> Option<usize> {
    if route == target {
        return Some(usize::MAX);
    }
    let prefix = route.strip_suffix('*')?;
    if target.starts_with(prefix) {
        Some(prefix.len())
    } else {
        None
    }
}

/// `package.yaml` in a package directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PackageManifest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub routes: Vec<String>,
    pub endpoint: String,
}

impl From<PackageManifest> for PackageDescriptor {
    fn from(m: PackageManifest) -> Self {
        Self {
            name: m.name,
            routes: m.routes,
            endpoint: m.endpoint,
            description: m.description.unwrap_or_default(),
            health: HealthState::Unknown,
        }
    }
}
