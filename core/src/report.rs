//! Markdown impact report.
//!
//! The summary block is read from the analysis' stored aggregate fields, never
//! recomputed here. Channels, applications and modules without any affected
//! API are left out of the detailed section; unaffected APIs are never
//! listed. Output depends only on the inputs, so repeated calls are
//! byte-identical.

use chrono::SecondsFormat;

use crate::error::{Error, Result};
use crate::tree::{ImpactTree, NodeId, NodeKind, Visitor};
use crate::types::ImpactAnalysis;
use crate::validate;

const NARRATIVE_HEADING: &str = "## Analyst Narrative";

struct Renderer {
    out: String,
}

impl Renderer {
    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }
}

impl<'a> Visitor<'a> for Renderer {
    fn enter(&mut self, tree: &ImpactTree<'a>, id: NodeId) {
        let node = tree.node(id);
        if node.affected_below == 0 {
            return;
        }
        match node.kind {
            NodeKind::Channel(channel) => {
                self.line(&format!("#### {} ({})", channel.name, channel.kind));
                self.blank();
            }
            NodeKind::Application(app) => {
                self.line(&format!("##### {}", app.name));
                self.blank();
            }
            NodeKind::Module(module) => {
                self.line(&format!("###### {}", module.name));
                self.blank();
                self.line(&format!("**Total APIs:** {}  ", module.apis.len()));
                self.line(&format!("**Affected APIs:** {}", node.affected_below));
                self.blank();
            }
            NodeKind::Api(api) => {
                self.line(&format!("- **{}** - *Criticality: {}*", api.name, api.criticality));
                if !api.call_stack.is_empty() {
                    self.line("  - Call Stack:");
                    for (step, call) in api.call_stack.iter().enumerate() {
                        let line = call
                            .line
                            .map(|l| format!(" (Line {l})"))
                            .unwrap_or_default();
                        self.line(&format!(
                            "    {}. `{}()`{} - {}",
                            step + 1,
                            call.method,
                            line,
                            call.description
                        ));
                    }
                }
            }
        }
    }

    fn leave(&mut self, tree: &ImpactTree<'a>, id: NodeId) {
        let node = tree.node(id);
        if matches!(node.kind, NodeKind::Module(_)) && node.affected_below > 0 {
            self.blank();
        }
    }
}

/// Render the structured report for one analysis.
///
/// Fails with a validation error on a malformed analysis and with
/// [`Error::NoData`] when the tree holds no APIs.
pub fn generate_report(analysis: &ImpactAnalysis, fr_title: &str) -> Result<String> {
    validate::validate_analysis(analysis)?;
    let tree = ImpactTree::build(&analysis.affected_channels);
    if tree.apis().next().is_none() {
        return Err(Error::NoData(format!(
            "analysis {} has no APIs to report on",
            analysis.id
        )));
    }

    let affected_channels: Vec<&str> = tree
        .roots()
        .iter()
        .map(|&r| tree.node(r))
        .filter(|n| n.affected_below > 0)
        .map(|n| n.kind.name())
        .collect();

    let mut r = Renderer { out: String::new() };
    r.line("# Impact Analysis Report");
    r.blank();
    r.line("## Functional Requirement");
    r.blank();
    r.line(&format!("**Title:** {fr_title}  "));
    r.line(&format!(
        "**Analyzed At:** {}",
        analysis.analyzed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    r.blank();
    r.line("## Summary");
    r.blank();
    r.line(&format!("- **Total APIs:** {}", analysis.total_apis));
    r.line(&format!("- **Impacted APIs:** {}", analysis.total_impacted_apis));
    r.line(&format!("- **Affected Modules:** {}", analysis.affected_modules));
    r.line(&format!(
        "- **Criticality Level:** **{}**",
        analysis.criticality_level.as_str().to_uppercase()
    ));
    r.blank();
    r.line("## Detailed Impact Analysis");
    r.blank();
    r.line(&format!("### Affected Channels: {}", affected_channels.len()));
    r.blank();

    tree.walk(&mut r);

    let teams = if affected_channels.is_empty() {
        "all consuming channels".to_string()
    } else {
        affected_channels.join(", ")
    };
    r.line("## Recommendations");
    r.blank();
    r.line("Based on the impact analysis, the following actions are recommended:");
    r.blank();
    r.line("1. Review all affected APIs marked as **Major** criticality first");
    r.line("2. Update API contracts and documentation");
    r.line(&format!("3. Coordinate with frontend teams for {teams}"));
    r.line("4. Plan backward compatibility strategy for affected endpoints");
    r.line("5. Schedule integration testing across all affected modules");
    r.blank();
    r.line("## Next Steps");
    r.blank();
    r.line("- [ ] Create stories for each affected module");
    r.line("- [ ] Schedule impact review meeting with stakeholders");
    r.line("- [ ] Update technical documentation");
    r.line("- [ ] Plan deployment strategy");
    r.blank();
    r.line("---");
    r.line("*This report was generated automatically from the stored impact analysis.*");

    Ok(r.out)
}

/// Pick what to show for an analysis: the attached narrative verbatim when
/// `prefer_narrative` is set, otherwise the structured report with any
/// narrative appended.
pub fn render_report(
    analysis: &ImpactAnalysis,
    fr_title: &str,
    prefer_narrative: bool,
) -> Result<String> {
    match analysis.narrative_report.as_deref() {
        Some(narrative) if prefer_narrative => Ok(narrative.to_string()),
        Some(narrative) => {
            let mut out = generate_report(analysis, fr_title)?;
            out.push('\n');
            out.push_str(NARRATIVE_HEADING);
            out.push_str("\n\n");
            out.push_str(narrative);
            if !narrative.ends_with('\n') {
                out.push('\n');
            }
            Ok(out)
        }
        None => generate_report(analysis, fr_title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{self, SeverityOrder};
    use crate::tree::fixtures::{api, channel, module};
    use crate::types::{AffectedChannel, Criticality::*};
    use chrono::{TimeZone, Utc};

    fn analysis_for(channels: Vec<AffectedChannel>) -> ImpactAnalysis {
        let mut analysis = ImpactAnalysis {
            id: "impact-1".to_string(),
            fr_id: "fr-1".to_string(),
            repository_id: "repo-1".to_string(),
            analyzed_at: Utc.with_ymd_and_hms(2024, 11, 1, 9, 30, 0).unwrap(),
            total_impacted_apis: 0,
            total_apis: 0,
            affected_modules: 0,
            criticality_level: Minor,
            affected_channels: channels,
            narrative_report: None,
        };
        aggregate::refresh(&mut analysis, &SeverityOrder::default()).unwrap();
        analysis
    }

    #[test]
    fn test_report_is_idempotent() {
        let analysis = analysis_for(vec![channel(
            "web",
            vec![module("cart", vec![api("a1", true, Major), api("a2", false, Minor)])],
        )]);
        let first = generate_report(&analysis, "Discount codes").unwrap();
        let second = generate_report(&analysis, "Discount codes").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_only_affected_api_listed() {
        let analysis = analysis_for(vec![channel(
            "web",
            vec![module("cart", vec![api("a1", true, Major), api("a2", false, Minor)])],
        )]);
        let report = generate_report(&analysis, "Discount codes").unwrap();
        let api_lines: Vec<&str> = report.lines().filter(|l| l.starts_with("- **GET /")).collect();
        assert_eq!(api_lines, vec!["- **GET /a1** - *Criticality: major*"]);
        assert!(report.contains("**Total APIs:** 2  "));
        assert!(report.contains("**Affected APIs:** 1"));
    }

    #[test]
    fn test_summary_matches_aggregate() {
        let analysis = analysis_for(vec![channel(
            "web",
            vec![
                module("cart", vec![api("a1", true, Minor), api("a2", true, Support)]),
                module("auth", vec![api("a3", false, Major)]),
            ],
        )]);
        let report = generate_report(&analysis, "t").unwrap();
        assert!(report.contains("- **Total APIs:** 3\n"));
        assert!(report.contains("- **Impacted APIs:** 2\n"));
        assert!(report.contains("- **Affected Modules:** 1\n"));
        assert!(report.contains("- **Criticality Level:** **MINOR**\n"));
    }

    #[test]
    fn test_unaffected_sections_suppressed() {
        let analysis = analysis_for(vec![
            channel("web", vec![module("cart", vec![api("a1", true, Minor)])]),
            channel("mobile", vec![module("auth", vec![api("a2", false, Minor)])]),
        ]);
        let report = generate_report(&analysis, "t").unwrap();
        assert!(report.contains("#### web channel (web)"));
        assert!(!report.contains("mobile channel"));
        assert!(!report.contains("###### auth module"));
        assert!(report.contains("### Affected Channels: 1"));
        assert!(report.contains("Coordinate with frontend teams for web channel"));
    }

    #[test]
    fn test_call_stack_steps_in_order() {
        let analysis = analysis_for(vec![channel("web", vec![module("cart", vec![api("a1", true, Minor)])])]);
        let report = generate_report(&analysis, "t").unwrap();
        let first = report.find("1. `a1Controller.handle()` (Line 10) - Entry point").unwrap();
        let second = report.find("2. `a1Service.apply()` - Business rule").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_timestamp_from_analysis() {
        let analysis = analysis_for(vec![channel("web", vec![module("cart", vec![api("a1", true, Minor)])])]);
        let report = generate_report(&analysis, "Discount codes").unwrap();
        assert!(report.contains("**Analyzed At:** 2024-11-01T09:30:00Z"));
        assert!(report.contains("**Title:** Discount codes"));
    }

    #[test]
    fn test_empty_tree_blocks_report() {
        let analysis = ImpactAnalysis {
            id: "impact-2".to_string(),
            fr_id: "fr-1".to_string(),
            repository_id: "repo-1".to_string(),
            analyzed_at: Utc::now(),
            total_impacted_apis: 0,
            total_apis: 0,
            affected_modules: 0,
            criticality_level: Minor,
            affected_channels: vec![],
            narrative_report: None,
        };
        assert!(matches!(generate_report(&analysis, "t"), Err(Error::NoData(_))));
    }

    #[test]
    fn test_narrative_passthrough() {
        let mut analysis = analysis_for(vec![channel("web", vec![module("cart", vec![api("a1", true, Minor)])])]);
        analysis.narrative_report = Some("# Free text\n*kept as is*".to_string());

        let narrative_only = render_report(&analysis, "t", true).unwrap();
        assert_eq!(narrative_only, "# Free text\n*kept as is*");

        let combined = render_report(&analysis, "t", false).unwrap();
        assert!(combined.starts_with("# Impact Analysis Report"));
        assert!(combined.ends_with("## Analyst Narrative\n\n# Free text\n*kept as is*\n"));
    }
}
