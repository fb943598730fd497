//! Package registry: route table from intents (or explicit routes) to skill packages.
//! Read-mostly; registration takes the write lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::descriptor::{normalize_route, route_rank, HealthState, PackageDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("route {route:?} is already served by package {existing}")]
    DuplicateRoute { route: String, existing: String },
    #[error("no package serves {0}")]
    MissingPackage(String),
    #[error("invalid package descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Registered packages keyed by name.
pub struct PackageRegistry {
    inner: Arc<RwLock<BTreeMap<String, PackageDescriptor>>>,
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Add a package, or replace the package with the same name. Fails when another package
    /// already claims one of the routes. A registered package claims its routes whether or not
    /// its endpoint is currently reachable.
    pub async fn register(&self, descriptor: PackageDescriptor) -> Result<(), RegistryError> {
        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::InvalidDescriptor("empty name".to_string()));
        }
        let routes = descriptor.normalized_routes();
        if routes.is_empty() || routes.iter().any(|r| r.is_empty()) {
            return Err(RegistryError::InvalidDescriptor(format!(
                "package {} has no usable routes",
                name
            )));
        }
        if descriptor.endpoint.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor(format!(
                "package {} has no endpoint",
                name
            )));
        }

        let mut g = self.inner.write().await;
        for (other_name, other) in g.iter() {
            if *other_name == name {
                continue;
            }
            let other_routes = other.normalized_routes();
            if let Some(route) = routes.iter().find(|r| other_routes.contains(r)) {
                return Err(RegistryError::DuplicateRoute {
                    route: route.clone(),
                    existing: other_name.clone(),
                });
            }
        }
        let replaced = g.contains_key(&name);
        let descriptor = PackageDescriptor {
            name: name.clone(),
            health: HealthState::Unknown,
            ..descriptor
        };
        g.insert(name.clone(), descriptor);
        if replaced {
            log::info!("registry: replaced package {}", name);
        } else {
            log::info!("registry: registered package {} ({})", name, routes.join(", "));
        }
        Ok(())
    }

    pub async fn deregister(&self, name: &str) -> Option<PackageDescriptor> {
        let removed = self.inner.write().await.remove(name);
        if removed.is_some() {
            log::info!("registry: deregistered package {}", name);
        }
        removed
    }

    /// Resolve the package for this turn. The explicit route is tried first, then the intent.
    /// Returns the package with the normalized target it matched.
    pub async fn lookup(
        &self,
        intent: Option<&str>,
        explicit_route: Option<&str>,
    ) -> Result<(PackageDescriptor, String), RegistryError> {
        let g = self.inner.read().await;
        let candidates = explicit_route
            .into_iter()
            .chain(intent)
            .map(normalize_route)
            .filter(|t| !t.is_empty());
        let mut tried = Vec::new();
        for target in candidates {
            if let Some(found) = best_match(&g, &target) {
                return Ok((found.clone(), target));
            }
            tried.push(target);
        }
        let what = if tried.is_empty() {
            "unclassified input".to_string()
        } else {
            tried.join(" or ")
        };
        Err(RegistryError::MissingPackage(what))
    }

    pub async fn get(&self, name: &str) -> Option<PackageDescriptor> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn mark_health(&self, name: &str, health: HealthState) {
        if let Some(p) = self.inner.write().await.get_mut(name) {
            if p.health != health {
                log::debug!("registry: package {} is now {:?}", name, health);
            }
            p.health = health;
        }
    }

    /// All packages ordered by name.
    pub async fn list(&self) -> Vec<PackageDescriptor> {
        self.inner.read().await.values().cloned().collect()
    }
}

fn best_match<'a>(
    packages: &'a BTreeMap<String, PackageDescriptor>,
    target: &str,
) -> Option<&'a PackageDescriptor> {
    let mut best: Option<(usize, &PackageDescriptor)> = None;
    for p in packages.values() {
        for route in p.normalized_routes() {
            if let Some(rank) = route_rank(&route, target) {
                if best.map_or(true, |(r, _)| rank > r) {
                    best = Some((rank, p));
                }
            }
        }
    }
    best.map(|(_, p)| p)
}
