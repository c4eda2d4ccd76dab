//! Circular dependency detection for a kernel run.
//!
//! A worker blocked on a dependency that (transitively) waits on the worker
//! itself would never wake up. Every variable that sits on a cycle is found
//! with a depth-first search before any worker is spawned.

use std::collections::{BTreeMap, HashSet};

use super::Selection;

/// Returns a path `start -> ... -> start` if `start` lies on a cycle.
pub fn detect_cycle(start: &str, selection: &Selection) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut path = vec![start.to_string()];

    if detect_cycle_dfs(start, start, selection, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn detect_cycle_dfs<'a>(
    current: &'a str,
    start: &str,
    selection: &'a Selection,
    visited: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    let Some(formula) = selection.get(current) else {
        return false;
    };

    for dep in &formula.dependencies {
        if dep == start {
            path.push(dep.clone());
            return true;
        }
        if !visited.insert(dep.as_str()) {
            continue;
        }
        path.push(dep.clone());
        if detect_cycle_dfs(dep, start, selection, visited, path) {
            return true;
        }
        path.pop();
    }
    false
}

/// Every variable in `selection` that lies on a cycle, with its cycle path.
pub fn find_cycles(selection: &Selection) -> BTreeMap<String, Vec<String>> {
    selection
        .keys()
        .filter_map(|name| detect_cycle(name, selection).map(|path| (name.clone(), path)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Formula;

    fn selection(entries: &[(&str, &[&str])]) -> Selection {
        entries
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    Formula::new("", deps.iter().map(|d| d.to_string()).collect()),
                )
            })
            .collect()
    }

    #[test]
    fn test_detect_cycle_no_cycle() {
        let sel = selection(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        assert!(find_cycles(&sel).is_empty());
    }

    #[test]
    fn test_detect_cycle_self_reference() {
        let sel = selection(&[("a", &["a"])]);
        assert_eq!(detect_cycle("a", &sel), Some(vec!["a".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_detect_cycle_indirect() {
        let sel = selection(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &["a"])]);
        let cycles = find_cycles(&sel);
        assert_eq!(cycles.len(), 3);
        assert_eq!(cycles["a"], vec!["a", "b", "c", "a"]);
        assert!(!cycles.contains_key("d"));
    }

    #[test]
    fn test_detect_cycle_ignores_missing_dependencies() {
        let sel = selection(&[("a", &["ghost"])]);
        assert!(detect_cycle("a", &sel).is_none());
    }
}
