//! Node status oracle: selector matching and upgrade convergence checks.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::error::{Result, RuoError};

/// Node attribute compared against the upgrade target.
#[derive(Clone, Copy, Debug)]
pub enum Target<'a> {
    /// `status.nodeInfo.kubeletVersion`
    KubeletVersion(&'a str),
    /// `status.nodeInfo.osImage`
    OsImage(&'a str),
}

fn requirement_matches(
    req: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool> {
    let values = req.values.as_deref().unwrap_or_default();
    let current = labels.get(&req.key);
    match req.operator.as_str() {
        "In" => Ok(current.is_some_and(|v| values.contains(v))),
        "NotIn" => Ok(current.is_none_or(|v| !values.contains(v))),
        "Exists" => Ok(current.is_some()),
        "DoesNotExist" => Ok(current.is_none()),
        other => Err(RuoError::InvalidSelector(format!(
            "unsupported operator '{other}' for key '{}'",
            req.key
        ))),
    }
}

/// Evaluate a label selector against a label set. An empty selector matches everything.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> Result<bool> {
    if let Some(match_labels) = &selector.match_labels
        && !match_labels.iter().all(|(k, v)| labels.get(k) == Some(v))
    {
        return Ok(false);
    }
    for req in selector.match_expressions.iter().flatten() {
        if !requirement_matches(req, labels)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn describe(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    parts.extend(selector.match_expressions.iter().flatten().map(|req| {
        format!(
            "{} {} [{}]",
            req.key,
            req.operator,
            req.values.as_deref().unwrap_or_default().join(",")
        )
    }));
    parts.join(", ")
}

/// Nodes matching the selector. Matching no node at all is an error.
pub fn find_matching<'a>(nodes: &'a [Node], selector: Option<&LabelSelector>) -> Result<Vec<&'a Node>> {
    let empty = LabelSelector::default();
    let selector = selector.unwrap_or(&empty);
    let empty_labels = BTreeMap::new();

    let mut matching = Vec::new();
    for node in nodes {
        let labels = node.metadata.labels.as_ref().unwrap_or(&empty_labels);
        if selector_matches(selector, labels)? {
            matching.push(node);
        }
    }

    if matching.is_empty() {
        return Err(RuoError::NoMatchingNodes(describe(selector)));
    }
    Ok(matching)
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}

fn is_schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

fn reports(node: &Node, target: Target<'_>) -> bool {
    let Some(info) = node.status.as_ref().and_then(|s| s.node_info.as_ref()) else {
        return false;
    };
    match target {
        Target::KubeletVersion(version) => info.kubelet_version == version,
        Target::OsImage(image) => info.os_image == image,
    }
}

/// Every node is Ready, schedulable and reports the target.
pub fn all_upgraded(nodes: &[&Node], target: Target<'_>) -> bool {
    nodes
        .iter()
        .all(|node| is_ready(node) && is_schedulable(node) && reports(node, target))
}

/// Nodes matching the selector have all converged on the target.
pub fn upgraded(nodes: &[Node], selector: Option<&LabelSelector>, target: Target<'_>) -> Result<bool> {
    let matching = find_matching(nodes, selector)?;
    Ok(all_upgraded(&matching, target))
}

fn is_control_plane(node: &Node, control_plane_label: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(control_plane_label))
        .is_some_and(|v| v == "true")
}

/// Every node carries the control-plane role.
pub fn control_plane_only(nodes: &[Node], control_plane_label: &str) -> bool {
    nodes.iter().all(|n| is_control_plane(n, control_plane_label))
}

/// (control-plane, worker) node counts.
pub fn role_counts(nodes: &[Node], control_plane_label: &str) -> (usize, usize) {
    let control_plane = nodes
        .iter()
        .filter(|n| is_control_plane(n, control_plane_label))
        .count();
    (control_plane, nodes.len() - control_plane)
}
