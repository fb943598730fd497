//! Skill packages: descriptors, manifest loading, the route registry, and invocation transports.
//!
//! Packages load from the config directory's `packages` dir (~/.switchboard/packages) and any
//! `packages.extraDirs`; each package directory holds a `package.yaml` manifest.

mod descriptor;
mod loader;
mod registry;
mod transport;

pub use descriptor::{normalize_route, HealthState, PackageDescriptor, PackageManifest};
pub use loader::{load_packages, MANIFEST_FILE};
pub use registry::{PackageRegistry, RegistryError};
pub use transport::{HttpSkillTransport, InvokeError, LocalSkill, LocalTransport, SkillTransport};

use std::sync::Arc;

/// Probe every registered package in the background and record its health.
pub fn spawn_health_probes(registry: Arc<PackageRegistry>, transport: Arc<dyn SkillTransport>) {
    tokio::spawn(async move {
        let packages = registry.list().await;
        let probes = packages.iter().map(|p| transport.probe(p));
        let results = futures_util::future::join_all(probes).await;
        for (p, result) in packages.iter().zip(results) {
            match result {
                Ok(()) => registry.mark_health(&p.name, HealthState::Healthy).await,
                Err(e) => {
                    log::warn!("packages: {} unreachable at {}: {}", p.name, p.endpoint, e);
                    registry.mark_health(&p.name, HealthState::Unreachable).await;
                }
            }
        }
        log::info!("packages: health probe completed for {} package(s)", packages.len());
    });
}
