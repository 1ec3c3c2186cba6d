use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::tree::{ImpactTree, NodeId, NodeKind, Visitor};
use crate::types::{AffectedChannel, Criticality, ImpactAnalysis};

/// Ranking of criticality labels, most severe first.
///
/// Defaults to `major > minor > support`. Written as `major>minor>support`
/// in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityOrder([Criticality; 3]);

impl Default for SeverityOrder {
    fn default() -> Self {
        SeverityOrder([Criticality::Major, Criticality::Minor, Criticality::Support])
    }
}

impl SeverityOrder {
    pub fn new(order: [Criticality; 3]) -> Result<Self> {
        let distinct: HashSet<Criticality> = order.iter().copied().collect();
        if distinct.len() != 3 {
            return Err(Error::Validation(format!(
                "severity order must name each criticality exactly once, got {}",
                SeverityOrder(order)
            )));
        }
        Ok(SeverityOrder(order))
    }

    /// Lower rank means more severe.
    pub fn rank(&self, c: Criticality) -> usize {
        self.0.iter().position(|&x| x == c).unwrap_or(self.0.len())
    }

    pub fn most_severe(&self, a: Criticality, b: Criticality) -> Criticality {
        if self.rank(b) < self.rank(a) { b } else { a }
    }
}

impl fmt::Display for SeverityOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}>{b}>{c}")
    }
}

impl FromStr for SeverityOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<Criticality> = s
            .split('>')
            .map(|p| p.trim().parse())
            .collect::<Result<_>>()?;
        let order: [Criticality; 3] = parts.try_into().map_err(|_| {
            Error::Validation(format!("severity order '{s}' must list three levels"))
        })?;
        SeverityOrder::new(order)
    }
}

impl Serialize for SeverityOrder {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SeverityOrder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(rename = "totalAPIs")]
    pub total_apis: u32,
    #[serde(rename = "totalImpactedAPIs")]
    pub total_impacted_apis: u32,
    pub affected_modules: u32,
    pub criticality_level: Criticality,
}

struct Counter {
    order: SeverityOrder,
    total_apis: u32,
    total_impacted_apis: u32,
    affected_modules: u32,
    level: Option<Criticality>,
}

impl<'a> Visitor<'a> for Counter {
    fn enter(&mut self, tree: &ImpactTree<'a>, id: NodeId) {
        let node = tree.node(id);
        match node.kind {
            NodeKind::Module(_) if node.affected_below > 0 => self.affected_modules += 1,
            NodeKind::Api(api) => {
                self.total_apis += 1;
                if api.is_affected {
                    self.total_impacted_apis += 1;
                    self.level = Some(match self.level {
                        Some(current) => self.order.most_severe(current, api.criticality),
                        None => api.criticality,
                    });
                }
            }
            _ => {}
        }
    }
}

/// Compute the summary fields of an analysis from its tree.
///
/// A tree without any API node fails with [`Error::NoData`]. A tree whose
/// APIs are all unaffected yields zero impacted counts and `minor`.
pub fn aggregate(channels: &[AffectedChannel], order: &SeverityOrder) -> Result<Summary> {
    let tree = ImpactTree::build(channels);
    let mut counter = Counter {
        order: *order,
        total_apis: 0,
        total_impacted_apis: 0,
        affected_modules: 0,
        level: None,
    };
    tree.walk(&mut counter);

    if counter.total_apis == 0 {
        return Err(Error::NoData("analysis tree contains no APIs".to_string()));
    }

    Ok(Summary {
        total_apis: counter.total_apis,
        total_impacted_apis: counter.total_impacted_apis,
        affected_modules: counter.affected_modules,
        criticality_level: counter.level.unwrap_or(Criticality::Minor),
    })
}

/// Recompute and overwrite the summary fields of `analysis`.
/// Returns true if any stored field disagreed with the tree.
pub fn refresh(analysis: &mut ImpactAnalysis, order: &SeverityOrder) -> Result<bool> {
    let summary = aggregate(&analysis.affected_channels, order)?;
    let drifted = summary != summary_of(analysis);
    if drifted {
        tracing::warn!(
            analysis = %analysis.id,
            stored_total = analysis.total_apis,
            stored_impacted = analysis.total_impacted_apis,
            computed_total = summary.total_apis,
            computed_impacted = summary.total_impacted_apis,
            "stored summary disagrees with tree, recomputing"
        );
    }
    analysis.total_apis = summary.total_apis;
    analysis.total_impacted_apis = summary.total_impacted_apis;
    analysis.affected_modules = summary.affected_modules;
    analysis.criticality_level = summary.criticality_level;
    Ok(drifted)
}

pub fn summary_of(analysis: &ImpactAnalysis) -> Summary {
    Summary {
        total_apis: analysis.total_apis,
        total_impacted_apis: analysis.total_impacted_apis,
        affected_modules: analysis.affected_modules,
        criticality_level: analysis.criticality_level,
    }
}
