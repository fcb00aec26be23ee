//! Static dependency rule configuration and cycle detection (C9, config half).
//!
//! The runtime fan-in/fan-out evaluation against the job store lives in
//! `report_engine::dependency_engine`; this module only owns the immutable
//! rule list and the startup-time graph validation over report types.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRule {
    pub parent_report_type: Option<String>,
    pub parent_report_types: Option<Vec<String>>,
    pub parent_role: Option<String>,
    pub dependent_report_type: String,
    pub dependent_role: Option<String>,
    pub dependent_target_system: Option<String>,
    pub dependent_data_format: Option<String>,
    pub dependent_priority: Option<i32>,
    pub dependent_chunk_size: Option<i64>,
}

impl DependencyRule {
    pub fn parents(&self) -> Vec<&str> {
        if let Some(single) = &self.parent_report_type {
            vec![single.as_str()]
        } else if let Some(many) = &self.parent_report_types {
            many.iter().map(String::as_str).collect()
        } else {
            Vec::new()
        }
    }

    pub fn is_fan_in(&self) -> bool {
        self.parent_report_types.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    rules: Vec<DependencyRule>,
}

impl DependencyGraph {
    /// Compile the static rule list, rejecting cyclic report-type dependencies.
    pub fn compile(rules: Vec<DependencyRule>) -> Result<Self> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for rule in &rules {
            for parent in rule.parents() {
                adjacency
                    .entry(parent)
                    .or_default()
                    .push(rule.dependent_report_type.as_str());
            }
        }

        if let Some(cycle) = find_cycle(&adjacency) {
            return Err(CoreError::Dependency(format!(
                "cyclic dependency graph detected: {}",
                cycle.join(" -> ")
            )));
        }

        Ok(Self { rules })
    }

    pub fn rules_for_parent(&self, parent_report_type: &str) -> impl Iterator<Item = &DependencyRule> {
        self.rules
            .iter()
            .filter(move |r| r.parents().contains(&parent_report_type))
    }
}

/// Tarjan-style strongly-connected-components search, reporting the first
/// non-trivial SCC found (a cycle) as an ordered path for the error message.
fn find_cycle<'a>(adjacency: &HashMap<&'a str, Vec<&'a str>>) -> Option<Vec<String>> {
    let mut index_counter = 0usize;
    let mut stack: Vec<&str> = Vec::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut indices: HashMap<&str, usize> = HashMap::new();
    let mut low_links: HashMap<&str, usize> = HashMap::new();
    let mut found: Option<Vec<String>> = None;

    let nodes: HashSet<&str> = adjacency
        .keys()
        .copied()
        .chain(adjacency.values().flatten().copied())
        .collect();

    fn strong_connect<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        index_counter: &mut usize,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        indices: &mut HashMap<&'a str, usize>,
        low_links: &mut HashMap<&'a str, usize>,
        found: &mut Option<Vec<String>>,
    ) {
        if found.is_some() || indices.contains_key(node) {
            return;
        }
        indices.insert(node, *index_counter);
        low_links.insert(node, *index_counter);
        *index_counter += 1;
        stack.push(node);
        on_stack.insert(node);

        if let Some(neighbors) = adjacency.get(node) {
            for &next in neighbors {
                if found.is_some() {
                    return;
                }
                if !indices.contains_key(next) {
                    strong_connect(next, adjacency, index_counter, stack, on_stack, indices, low_links, found);
                    let next_low = low_links[next];
                    let cur_low = low_links[node];
                    low_links.insert(node, cur_low.min(next_low));
                } else if on_stack.contains(next) {
                    let next_idx = indices[next];
                    let cur_low = low_links[node];
                    low_links.insert(node, cur_low.min(next_idx));
                }
            }
        }

        if low_links[node] == indices[node] {
            let mut component = Vec::new();
            loop {
                let w = stack.pop().unwrap();
                on_stack.remove(w);
                component.push(w.to_string());
                if w == node {
                    break;
                }
            }
            if component.len() > 1 {
                *found = Some(component);
            }
        }
    }

    for &node in &nodes {
        if found.is_some() {
            break;
        }
        strong_connect(node, adjacency, &mut index_counter, &mut stack, &mut on_stack, &mut indices, &mut low_links, &mut found);
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(parent: &str, dependent: &str) -> DependencyRule {
        DependencyRule {
            parent_report_type: Some(parent.to_string()),
            parent_report_types: None,
            parent_role: None,
            dependent_report_type: dependent.to_string(),
            dependent_role: None,
            dependent_target_system: None,
            dependent_data_format: None,
            dependent_priority: None,
            dependent_chunk_size: None,
        }
    }

    #[test]
    fn acyclic_graph_compiles() {
        let rules = vec![rule("A", "B"), rule("B", "C")];
        assert!(DependencyGraph::compile(rules).is_ok());
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let rules = vec![rule("A", "B"), rule("B", "C"), rule("C", "A")];
        let err = DependencyGraph::compile(rules).unwrap_err();
        assert!(matches!(err, CoreError::Dependency(_)));
    }

    #[test]
    fn fan_in_rule_lists_all_required_parents() {
        let rule = DependencyRule {
            parent_report_type: None,
            parent_report_types: Some(vec!["A".into(), "B".into()]),
            parent_role: None,
            dependent_report_type: "C".into(),
            dependent_role: None,
            dependent_target_system: None,
            dependent_data_format: None,
            dependent_priority: None,
            dependent_chunk_size: None,
        };
        assert!(rule.is_fan_in());
        assert_eq!(rule.parents(), vec!["A", "B"]);
    }
}
