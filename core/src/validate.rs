use std::collections::HashSet;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::tree::{ImpactTree, NodeId, Visitor};
use crate::types::{AffectedChannel, ImpactAnalysis};

struct Checker<'a> {
    seen: HashSet<&'a str>,
    problems: Vec<String>,
}

impl<'a> Visitor<'a> for Checker<'a> {
    fn enter(&mut self, tree: &ImpactTree<'a>, id: NodeId) {
        let kind = tree.node(id).kind;
        let node_id = kind.id();
        if node_id.trim().is_empty() {
            self.problems.push(format!("{} '{}' has an empty id", kind.label(), kind.name()));
        } else if !self.seen.insert(node_id) {
            self.problems.push(format!("duplicate node id '{node_id}'"));
        }
        if kind.name().trim().is_empty() {
            self.problems.push(format!("{} '{node_id}' has an empty name", kind.label()));
        }
    }
}

/// Check structural rules of a channel tree: every node has a non-empty id
/// unique within the tree and a non-empty name.
pub fn validate_channels(channels: &[AffectedChannel]) -> Result<()> {
    let tree = ImpactTree::build(channels);
    let mut checker = Checker {
        seen: HashSet::new(),
        problems: Vec::new(),
    };
    tree.walk(&mut checker);

    if checker.problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(checker.problems.join("; ")))
    }
}

pub fn validate_analysis(analysis: &ImpactAnalysis) -> Result<()> {
    if analysis.id.trim().is_empty() {
        return Err(Error::Validation("analysis has an empty id".to_string()));
    }
    if analysis.total_impacted_apis > analysis.total_apis {
        return Err(Error::Validation(format!(
            "analysis {} reports {} impacted APIs out of {}",
            analysis.id, analysis.total_impacted_apis, analysis.total_apis
        )));
    }
    validate_channels(&analysis.affected_channels)
}

/// Deserialize a record, reporting malformed input (unknown enum values,
/// negative counts, missing fields) as a validation failure.
pub fn parse<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| Error::Validation(e.to_string()))
}

pub fn parse_analysis(json: &str) -> Result<ImpactAnalysis> {
    let analysis: ImpactAnalysis = parse(json)?;
    validate_analysis(&analysis)?;
    Ok(analysis)
}
