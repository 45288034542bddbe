//! Dependency validation and load ordering
//!
//! [`check_dependencies`] runs an iterative fixed point over a registry
//! snapshot: any module with a missing or version-mismatched hard
//! dependency is removed, and passes repeat until a full pass removes
//! nothing (removing a module can invalidate the modules that depended on
//! it). Soft dependencies never trigger removal. Every removal is a
//! partial failure: the caller proceeds with the resolved set.
//!
//! [`sort_by_dependencies`] then orders the resolved set so that every
//! module loads after the modules it depends on, hard or soft, with ties
//! broken by discovery order.

use crate::registry::ModuleRegistry;
use crate::version::VersionConstraint;
use crate::{Error, Result};
use log::{error, warn};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Safety cap on fixed-point passes. Hitting it is logged as severe, but
/// resolution still terminates with whatever set converged.
const MAX_PASSES: usize = 100;

/// Outcome of a dependency check: the surviving ids, the removed ids, and
/// the diagnostic log explaining each removal.
#[derive(Debug, Clone)]
pub struct DependencyReport {
    /// Ids that survived, in discovery order.
    pub resolved: Vec<String>,
    /// Ids removed because of unmet hard dependencies.
    pub removed: Vec<String>,
    /// Two lines per removal, naming the dependent, the target, and the
    /// unmet range.
    pub log: Vec<String>,
}

impl DependencyReport {
    pub fn is_ok(&self) -> bool {
        self.removed.is_empty()
    }

    /// The report as an error value, for callers that treat any removal as
    /// fatal. `None` when nothing was removed.
    pub fn to_error(&self) -> Option<Error> {
        if self.is_ok() {
            return None;
        }
        Some(Error::Dependency {
            removed: self.removed.clone(),
            log: self.log.clone(),
        })
    }
}

/// Validate every registry entry against its declared dependencies.
pub fn check_dependencies(registry: &ModuleRegistry) -> DependencyReport {
    let initial = registry.ids_in_discovery_order();
    let mut remaining: HashSet<String> = initial.iter().cloned().collect();
    let mut log = Vec::new();

    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;

        for id in &initial {
            if !remaining.contains(id) {
                continue;
            }
            let entry = match registry.get(id) {
                Some(entry) => entry,
                None => continue,
            };
            for dependency in &entry.manifest.dependencies {
                if !remaining.contains(&dependency.id) {
                    if dependency.soft {
                        continue;
                    }
                    log.push(format!(
                        "The dependency '{}' is missing for the module '{}'",
                        dependency.id, id
                    ));
                    log.push(format!(
                        "   {} asks for a version in the range '{}'",
                        id, dependency.version_constraint
                    ));
                    remaining.remove(id);
                    changed = true;
                    break;
                }
                if dependency.is_unconstrained() {
                    continue;
                }
                let constraint = match VersionConstraint::parse(&dependency.version_constraint) {
                    Ok(constraint) => constraint,
                    Err(e) => {
                        // constraints are validated at registration time
                        warn!("unparsable constraint on '{}': {}", dependency.id, e);
                        continue;
                    }
                };
                let target = match registry.get(&dependency.id) {
                    Some(target) => target,
                    None => continue,
                };
                if !constraint.matches(&target.version) {
                    if dependency.soft {
                        continue;
                    }
                    log.push(format!(
                        "'{}' asks for '{}' with the version constraint '{}'",
                        id, dependency.id, dependency.version_constraint
                    ));
                    log.push(format!("   The installed version is '{}'", target.version));
                    remaining.remove(id);
                    changed = true;
                    break;
                }
            }
        }

        if !changed {
            break;
        }
        if passes >= MAX_PASSES {
            error!(
                "dependency check did not converge after {} passes; continuing with the current set",
                MAX_PASSES
            );
            log.push(format!(
                "dependency check did not converge after {} passes",
                MAX_PASSES
            ));
            break;
        }
    }

    let resolved = initial
        .iter()
        .filter(|id| remaining.contains(*id))
        .cloned()
        .collect();
    let removed = initial
        .iter()
        .filter(|id| !remaining.contains(*id))
        .cloned()
        .collect();
    DependencyReport {
        resolved,
        removed,
        log,
    }
}

/// Order `ids` so that dependencies come before their dependents.
///
/// Both hard and soft dependencies count as ordering edges when both ends
/// are present. The sort is stable: modules that are not ordered relative
/// to each other keep their discovery order. A dependency cycle cannot be
/// ordered; its members are appended in discovery order with a warning.
pub fn sort_by_dependencies(registry: &ModuleRegistry, ids: &[String]) -> Vec<String> {
    let id_set: HashSet<&str> = ids.iter().map(|id| id.as_str()).collect();
    let discovery_index = |id: &str| {
        registry
            .get(id)
            .map(|entry| entry.discovery_index)
            .unwrap_or(usize::MAX)
    };

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in ids {
        let mut degree = 0;
        if let Some(entry) = registry.get(id) {
            let mut seen: HashSet<&str> = HashSet::new();
            for dependency in &entry.manifest.dependencies {
                let target = dependency.id.as_str();
                if target == id.as_str() || !id_set.contains(target) || !seen.insert(target) {
                    continue;
                }
                degree += 1;
                dependents.entry(target).or_default().push(id.as_str());
            }
        }
        in_degree.insert(id.as_str(), degree);
    }

    let mut ready: BinaryHeap<Reverse<(usize, &str)>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| Reverse((discovery_index(id), *id)))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(ids.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id.to_string());
        if let Some(next) = dependents.get(id) {
            for dependent in next {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((discovery_index(dependent), dependent)));
                    }
                }
            }
        }
    }

    if order.len() < ids.len() {
        warn!("dependency cycle detected; appending cycle members in discovery order");
        let placed: HashSet<String> = order.iter().cloned().collect();
        for id in ids {
            if !placed.contains(id) {
                order.push(id.clone());
            }
        }
    }
    order
}

/// Run the full resolution: dependency fixed point, then load ordering of
/// the surviving set.
pub fn resolve(registry: &ModuleRegistry) -> Result<(DependencyReport, Vec<String>)> {
    let report = check_dependencies(registry);
    let order = sort_by_dependencies(registry, &report.resolved);
    Ok((report, order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependencySpec, ModuleManifest};
    use crate::HostContext;
    use tempfile::TempDir;

    fn registry_with(manifests: Vec<ModuleManifest>) -> (TempDir, ModuleRegistry) {
        let dir = TempDir::new().unwrap();
        let context = HostContext::new(dir.path(), ModuleManifest::new("host", "1.0.1")).unwrap();
        let mut registry = ModuleRegistry::new(&context).unwrap();
        for manifest in manifests {
            registry.insert(manifest, None).unwrap();
        }
        (dir, registry)
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|entry| entry == id).unwrap()
    }

    #[test]
    fn test_all_dependencies_met() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("a", "1.0.0"),
            ModuleManifest::new("b", "1.0.0")
                .with_dependency(DependencySpec::new("a", "~> 1.0")),
        ]);

        let report = check_dependencies(&registry);
        assert!(report.is_ok());
        assert!(report.to_error().is_none());
        assert_eq!(report.resolved.len(), 3); // host, a, b
    }

    #[test]
    fn test_version_mismatch_removes_dependent() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("a", "1.0.0"),
            ModuleManifest::new("b", "1.0.0")
                .with_dependency(DependencySpec::new("a", "~> 1.0")),
            ModuleManifest::new("c", "1.0.0")
                .with_dependency(DependencySpec::new("a", "~> 2.0")),
        ]);

        let report = check_dependencies(&registry);
        assert_eq!(report.removed, vec!["c"]);
        assert!(report.resolved.contains(&"a".to_string()));
        assert!(report.resolved.contains(&"b".to_string()));
        let log = report.log.join("\n");
        assert!(log.contains("'c' asks for 'a'"), "log was: {}", log);
        assert!(log.contains("~> 2.0"), "log was: {}", log);
    }

    #[test]
    fn test_removal_cascades_to_transitive_dependents() {
        // c -> b -> a, but b's constraint on a is unmet: both b and c go.
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("a", "1.0.0"),
            ModuleManifest::new("b", "1.0.0")
                .with_dependency(DependencySpec::new("a", ">= 2.0.0")),
            ModuleManifest::new("c", "1.0.0")
                .with_dependency(DependencySpec::new("b", ">= 1.0.0")),
        ]);

        let report = check_dependencies(&registry);
        assert_eq!(report.removed, vec!["b", "c"]);
        assert_eq!(report.resolved, vec!["host", "a"]);
    }

    #[test]
    fn test_missing_soft_dependency_is_tolerated() {
        let (_dir, registry) = registry_with(vec![ModuleManifest::new("d", "1.0.0")
            .with_dependency(DependencySpec::new("e", ">= 1.0.0").soft())]);

        let report = check_dependencies(&registry);
        assert!(report.is_ok());
        assert!(report.resolved.contains(&"d".to_string()));
        assert!(report.log.is_empty());
    }

    #[test]
    fn test_mismatched_soft_dependency_is_tolerated() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("lib", "0.5.0"),
            ModuleManifest::new("d", "1.0.0")
                .with_dependency(DependencySpec::new("lib", ">= 1.0.0").soft()),
        ]);

        let report = check_dependencies(&registry);
        assert!(report.is_ok());
        assert!(report.log.is_empty());
    }

    #[test]
    fn test_unconstrained_dependency_matches_any_version() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("lib", "0.0.1"),
            ModuleManifest::new("d", "1.0.0").with_dependency(DependencySpec::new("lib", "")),
        ]);

        let report = check_dependencies(&registry);
        assert!(report.is_ok());
    }

    #[test]
    fn test_host_version_checked_like_any_dependency() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("old", "1.0.0")
                .with_dependency(DependencySpec::new("host", "~> 0.9")),
            ModuleManifest::new("new", "1.0.0")
                .with_dependency(DependencySpec::new("host", "~> 1.0")),
        ]);

        let report = check_dependencies(&registry);
        assert_eq!(report.removed, vec!["old"]);
    }

    #[test]
    fn test_missing_dependency_diagnostics_match_shape() {
        let (_dir, registry) = registry_with(vec![ModuleManifest::new("m", "1.0.0")
            .with_dependency(DependencySpec::new("gone", "~> 1.0"))]);

        let report = check_dependencies(&registry);
        assert_eq!(
            report.log[0],
            "The dependency 'gone' is missing for the module 'm'"
        );
        assert_eq!(report.log[1], "   m asks for a version in the range '~> 1.0'");
    }

    #[test]
    fn test_dependencies_sort_before_dependents() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("app", "1.0.0")
                .with_dependency(DependencySpec::new("lib", ">= 1.0.0"))
                .with_dependency(DependencySpec::new("util", ">= 1.0.0").soft()),
            ModuleManifest::new("lib", "1.0.0")
                .with_dependency(DependencySpec::new("util", ">= 1.0.0")),
            ModuleManifest::new("util", "1.0.0"),
        ]);

        let (report, order) = resolve(&registry).unwrap();
        assert!(report.is_ok());
        assert!(position(&order, "util") < position(&order, "lib"));
        assert!(position(&order, "lib") < position(&order, "app"));
        // soft edge also ordered
        assert!(position(&order, "util") < position(&order, "app"));
    }

    #[test]
    fn test_sort_breaks_ties_by_discovery_order() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("z-first", "1.0.0"),
            ModuleManifest::new("a-second", "1.0.0"),
        ]);

        let order = sort_by_dependencies(&registry, &registry.ids_in_discovery_order());
        assert!(position(&order, "z-first") < position(&order, "a-second"));
    }

    #[test]
    fn test_sort_handles_cycles_without_hanging() {
        let (_dir, registry) = registry_with(vec![
            ModuleManifest::new("ying", "1.0.0")
                .with_dependency(DependencySpec::new("yang", ">= 1.0.0")),
            ModuleManifest::new("yang", "1.0.0")
                .with_dependency(DependencySpec::new("ying", ">= 1.0.0")),
        ]);

        let (report, order) = resolve(&registry).unwrap();
        // the cycle is version-satisfied, so nothing is removed
        assert!(report.is_ok());
        assert_eq!(order.len(), 3);
        assert!(order.contains(&"ying".to_string()));
        assert!(order.contains(&"yang".to_string()));
    }
}
