//! Load package descriptors from dirs: each package is a subdirectory holding `package.yaml`.
//! Precedence: the primary packages dir first, then extra dirs (later overwrites earlier by name).

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::descriptor::{PackageDescriptor, PackageManifest};

pub const MANIFEST_FILE: &str = "package.yaml";

/// Load every manifest under `packages_dir` and `extra_dirs`, skipping names in `disabled`.
/// Missing directories are treated as empty; unparsable manifests are logged and skipped.
pub fn load_packages(
    packages_dir: Option<&Path>,
    extra_dirs: &[PathBuf],
    disabled: &[String],
) -> Result<Vec<PackageDescriptor>> {
    let mut merged: HashMap<String, PackageDescriptor> = HashMap::new();

    if let Some(d) = packages_dir {
        for p in load_packages_from_dir(d)? {
            merged.insert(p.name.clone(), p);
        }
    }
    for dir in extra_dirs {
        for p in load_packages_from_dir(dir)? {
            merged.insert(p.name.clone(), p);
        }
    }

    let mut out: Vec<PackageDescriptor> = merged
        .into_values()
        .filter(|p| {
            let skip = disabled.iter().any(|n| n == &p.name);
            if skip {
                log::debug!("packages: {} is disabled, skipping", p.name);
            }
            !skip
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

fn load_packages_from_dir(dir: &Path) -> Result<Vec<PackageDescriptor>> {
    let mut out = Vec::new();
    let read_dir = match std::fs::read_dir(dir) {
        Ok(d) => d,
        Err(_) => return Ok(out),
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest_path = path.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&manifest_path) {
            Ok(c) => c,
            Err(_) => continue,
        };
        match serde_yaml::from_str::<PackageManifest>(&content) {
            Ok(m) => out.push(m.into()),
            Err(e) => {
                log::warn!("failed to parse {}: {}", manifest_path.display(), e);
            }
        }
    }
    Ok(out)
}
