//! Demo workspace data.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::Deserialize;

use crate::aggregate::SeverityOrder;
use crate::error::Result;
use crate::tracer;
use crate::types::{
    AffectedChannel, DependencyNode, FrStatus, FunctionalRequirement, ImpactAnalysis, Repository,
    User,
};
use crate::validate;

const DEMO_JSON: &str = include_str!("../fixtures/demo.json");

#[derive(Debug, Clone, Deserialize)]
pub struct SeedData {
    pub users: Vec<User>,
    pub repositories: Vec<Repository>,
    pub requirements: Vec<FunctionalRequirement>,
    #[serde(default)]
    pub surfaces: BTreeMap<String, Vec<AffectedChannel>>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<DependencyNode>>,
    #[serde(skip)]
    pub analyses: Vec<ImpactAnalysis>,
}

/// Load the bundled demo workspace. Requirements marked `analyzed` get an
/// analysis traced against their repository's surface, stamped one day after
/// the requirement was created so the data is reproducible.
pub fn demo(order: &SeverityOrder) -> Result<SeedData> {
    let mut data: SeedData = validate::parse(DEMO_JSON)?;
    for channels in data.surfaces.values() {
        validate::validate_channels(channels)?;
    }

    let mut analyses = Vec::new();
    for fr in data.requirements.iter().filter(|fr| fr.status == FrStatus::Analyzed) {
        let Some(surface) = data.surfaces.get(&fr.repository_id) else {
            continue;
        };
        let analysis = tracer::build_analysis(
            fr,
            surface,
            format!("impact-{}", analyses.len() + 1),
            fr.created_at + Duration::days(1),
            order,
        )?;
        if let Some(repo) = data.repositories.iter_mut().find(|r| r.id == fr.repository_id) {
            repo.last_analysis = Some(analysis.analyzed_at);
        }
        analyses.push(analysis);
    }
    data.analyses = analyses;

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Criticality;

    #[test]
    fn test_demo_loads() {
        let data = demo(&SeverityOrder::default()).unwrap();
        assert_eq!(data.users.len(), 5);
        assert_eq!(data.repositories.len(), 3);
        assert_eq!(data.requirements.len(), 4);
        assert!(data.surfaces.contains_key("repo-1"));
        assert!(!data.surfaces.contains_key("repo-3"));
    }

    #[test]
    fn test_discount_requirement_analysis() {
        let data = demo(&SeverityOrder::default()).unwrap();
        assert_eq!(data.analyses.len(), 1);
        let a = &data.analyses[0];
        assert_eq!(a.fr_id, "fr-1");
        assert_eq!(a.total_apis, 9);
        assert_eq!(a.total_impacted_apis, 3);
        assert_eq!(a.affected_modules, 3);
        assert_eq!(a.criticality_level, Criticality::Major);

        let repo = data.repositories.iter().find(|r| r.id == "repo-1").unwrap();
        assert_eq!(repo.last_analysis, Some(a.analyzed_at));
    }
}
