//! Dependency graph helpers. The graph is the set of installed manifolds; inputs naming manifolds that
//! are not installed are ignored.

use crate::{EngineError, Manifold};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Checks that installing `name` with `manifold` keeps the graph acyclic.
pub(crate) fn check_acyclic(installed: &HashMap<String, Manifold>, name: &str, manifold: &Manifold) -> Result<(), EngineError> {
    if manifold.depends_on(name) {
        return Err(EngineError::SelfDependency(name.to_string()));
    }
    let mut path = vec![name.to_string()];
    let mut visited = BTreeSet::new();
    for input in manifold.input_names() {
        if find_path(installed, input, name, &mut path, &mut visited) {
            return Err(EngineError::CycleDetected(path));
        }
    }
    Ok(())
}

// Depth-first search from `current` towards `target`, leaving the route in `path` when found.
fn find_path(
    installed: &HashMap<String, Manifold>,
    current: &str,
    target: &str,
    path: &mut Vec<String>,
    visited: &mut BTreeSet<String>,
) -> bool {
    path.push(current.to_string());
    if current == target {
        return true;
    }
    if visited.insert(current.to_string()) {
        if let Some(manifold) = installed.get(current) {
            for input in manifold.input_names() {
                if find_path(installed, input, target, path, visited) {
                    return true;
                }
            }
        }
    }
    path.pop();
    false
}

/// Installed manifolds ordered dependencies-first; ties are broken by name.
pub(crate) fn topological_order(installed: &HashMap<String, Manifold>) -> Vec<String> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, manifold) in installed {
        let inputs: BTreeSet<&str> = manifold.input_names().filter(|input| installed.contains_key(*input)).collect();
        pending.insert(name.as_str(), inputs.len());
        for input in inputs {
            dependents.entry(input).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending.iter().filter(|(_, count)| **count == 0).map(|(name, _)| *name).collect();
    let mut order = Vec::with_capacity(installed.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }
    order
}

/// Installed manifolds that list `name` as an input.
pub(crate) fn direct_dependents(installed: &HashMap<String, Manifold>, name: &str) -> Vec<String> {
    let mut dependents: Vec<String> =
        installed.iter().filter(|(_, manifold)| manifold.depends_on(name)).map(|(dependent, _)| dependent.clone()).collect();
    dependents.sort();
    dependents
}

/// Every manifold that depends on `name`, directly or not.
pub(crate) fn transitive_dependents(installed: &HashMap<String, Manifold>, name: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut queue = vec![name.to_string()];
    while let Some(current) = queue.pop() {
        for dependent in direct_dependents(installed, &current) {
            if found.insert(dependent.clone()) {
                queue.push(dependent);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskWorker;

    fn manifold(inputs: &[&str]) -> Manifold {
        Manifold::new(|_ctx| async { Ok(TaskWorker::spawn("noop", |_| async { Ok(()) })) }).with_inputs(inputs.iter().copied())
    }

    fn graph(entries: &[(&str, &[&str])]) -> HashMap<String, Manifold> {
        entries.iter().map(|(name, inputs)| (name.to_string(), manifold(inputs))).collect()
    }

    #[test]
    fn test_self_dependency() {
        let installed = graph(&[]);
        let err = check_acyclic(&installed, "a", &manifold(&["a"])).unwrap_err();
        assert!(matches!(err, EngineError::SelfDependency(name) if name == "a"));
    }

    #[test]
    fn test_cycle_detected() {
        let installed = graph(&[("b", &["c"]), ("c", &["a"])]);
        let err = check_acyclic(&installed, "a", &manifold(&["b"])).unwrap_err();
        match err {
            EngineError::CycleDetected(path) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            err => panic!("unexpected error {err}"),
        }
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let installed = graph(&[("b", &["a"]), ("c", &["a"]), ("a", &[])]);
        assert!(check_acyclic(&installed, "d", &manifold(&["b", "c"])).is_ok());
    }

    #[test]
    fn test_uninstalled_inputs_are_ignored() {
        let installed = graph(&[("b", &["x"])]);
        assert!(check_acyclic(&installed, "a", &manifold(&["b", "y"])).is_ok());
        assert_eq!(topological_order(&installed), vec!["b"]);
    }

    #[test]
    fn test_topological_order() {
        let installed = graph(&[("d", &["b", "c"]), ("c", &["a"]), ("b", &["a"]), ("a", &[]), ("e", &[])]);
        assert_eq!(topological_order(&installed), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_dependents() {
        let installed = graph(&[("d", &["b", "c"]), ("c", &["a"]), ("b", &["a"]), ("a", &[])]);
        assert_eq!(direct_dependents(&installed, "a"), vec!["b", "c"]);
        assert_eq!(transitive_dependents(&installed, "a").into_iter().collect::<Vec<_>>(), vec!["b", "c", "d"]);
        assert!(transitive_dependents(&installed, "d").is_empty());
    }
}
