//! Local impact tracing.
//!
//! Marks the APIs of a repository's registered surface that an FR touches.
//! An API is affected when a word of the FR title or description matches a
//! word of the API name or of one of its call-stack methods.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::aggregate::{self, SeverityOrder};
use crate::error::{Error, Result};
use crate::tree::ImpactTree;
use crate::types::{AffectedChannel, FunctionalRequirement, ImpactAnalysis};
use crate::validate;

static CAMEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid camel-case regex"));

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").expect("valid word regex"));

const MIN_TOKEN_LEN: usize = 3;

// HTTP verbs and "api" appear in nearly every endpoint name
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "add", "into", "from", "that", "this", "when", "should",
    "must", "will", "using", "use", "new", "all", "are", "not", "can", "our", "its", "has",
    "have", "been", "was", "were", "their", "then", "than", "each", "any", "via",
    "api", "get", "post", "put", "patch", "delete", "head",
];

fn normalize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() > 4 && lower.ends_with('s') && !lower.ends_with("ss") {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    }
}

/// Split text into lowercase matching words. camelCase, path separators and
/// punctuation all act as boundaries; short words and stop words are dropped.
pub fn tokens(text: &str) -> BTreeSet<String> {
    let spaced = CAMEL_RE.replace_all(text, "$1 $2");
    WORD_RE
        .find_iter(&spaced)
        .map(|m| normalize(m.as_str()))
        .filter(|w| w.len() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Copy `surface` with `isAffected` set on every API the requirement touches.
pub fn trace(fr: &FunctionalRequirement, surface: &[AffectedChannel]) -> Result<Vec<AffectedChannel>> {
    if ImpactTree::build(surface).apis().next().is_none() {
        return Err(Error::AnalysisFailed(format!(
            "repository {} has no registered API surface",
            fr.repository_id
        )));
    }

    let wanted = tokens(&format!("{} {}", fr.title, fr.description));
    let mut channels = surface.to_vec();
    let mut hits = 0usize;

    for channel in &mut channels {
        for app in &mut channel.applications {
            for module in &mut app.modules {
                for api in &mut module.apis {
                    let mut words = tokens(&api.name);
                    for call in &api.call_stack {
                        words.extend(tokens(&call.method));
                    }
                    api.is_affected = !wanted.is_disjoint(&words);
                    if api.is_affected {
                        hits += 1;
                    }
                }
            }
        }
    }

    tracing::debug!(fr = %fr.id, hits, "traced requirement against surface");
    Ok(channels)
}

/// Trace `fr` and wrap the result in a validated, aggregated analysis record.
pub fn build_analysis(
    fr: &FunctionalRequirement,
    surface: &[AffectedChannel],
    id: String,
    analyzed_at: DateTime<Utc>,
    order: &SeverityOrder,
) -> Result<ImpactAnalysis> {
    let channels = trace(fr, surface)?;
    let summary = aggregate::aggregate(&channels, order)?;
    let analysis = ImpactAnalysis {
        id,
        fr_id: fr.id.clone(),
        repository_id: fr.repository_id.clone(),
        analyzed_at,
        total_impacted_apis: summary.total_impacted_apis,
        total_apis: summary.total_apis,
        affected_modules: summary.affected_modules,
        criticality_level: summary.criticality_level,
        affected_channels: channels,
        narrative_report: None,
    };
    validate::validate_analysis(&analysis)?;
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::{api, channel, module};
    use crate::types::{Criticality, FrStatus};

    fn requirement(title: &str, description: &str) -> FunctionalRequirement {
        FunctionalRequirement {
            id: "fr-1".to_string(),
            repository_id: "repo-1".to_string(),
            title: title.to_string(),
            description: description.to_string(),
            file_url: None,
            created_by: "user-3".to_string(),
            created_at: Utc::now(),
            status: FrStatus::Draft,
            comments: Vec::new(),
        }
    }

    #[test]
    fn test_tokens_split_camel_case_and_paths() {
        let t = tokens("POST /api/cart/apply-discount validateDiscountRules");
        let expected: BTreeSet<String> = ["cart", "apply", "discount", "validate", "rule"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(t, expected);
    }

    #[test]
    fn test_tokens_drop_stop_words_and_short_words() {
        let t = tokens("Add a new API for the UI");
        assert!(t.is_empty(), "unexpected tokens: {t:?}");
    }

    #[test]
    fn test_trace_marks_matching_apis() {
        let mut surface = vec![channel(
            "web",
            vec![module("cart", vec![api("checkout", false, Criticality::Major), api("search", false, Criticality::Minor)])],
        )];
        surface[0].applications[0].modules[0].apis[0].name = "POST /api/checkout/finalize".to_string();
        surface[0].applications[0].modules[0].apis[1].name = "GET /api/search".to_string();

        let fr = requirement("Faster checkout", "Finalize orders in one step");
        let traced = trace(&fr, &surface).unwrap();
        let apis = &traced[0].applications[0].modules[0].apis;
        assert!(apis[0].is_affected);
        assert!(!apis[1].is_affected);
        // the surface itself is untouched
        assert!(!surface[0].applications[0].modules[0].apis[0].is_affected);
    }

    #[test]
    fn test_call_stack_methods_match() {
        let surface = vec![channel("web", vec![module("pricing", vec![api("calc", false, Criticality::Major)])])];
        // fixture stack is calcController.handle -> calcService.apply
        let fr = requirement("Change how we apply rebates", "");
        let traced = trace(&fr, &surface).unwrap();
        assert!(traced[0].applications[0].modules[0].apis[0].is_affected);
    }

    #[test]
    fn test_empty_surface_fails() {
        let fr = requirement("Anything", "");
        let err = trace(&fr, &[]).unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(_)));
    }

    #[test]
    fn test_build_analysis_aggregates() {
        let surface = vec![channel(
            "web",
            vec![
                module("m1", vec![api("refund", false, Criticality::Minor)]),
                module("m2", vec![api("invoice", false, Criticality::Major)]),
            ],
        )];
        let fr = requirement("Partial refund support", "");
        let analysis = build_analysis(
            &fr,
            &surface,
            "impact-1".to_string(),
            Utc::now(),
            &SeverityOrder::default(),
        )
        .unwrap();
        assert_eq!(analysis.total_apis, 2);
        assert_eq!(analysis.total_impacted_apis, 1);
        assert_eq!(analysis.affected_modules, 1);
        assert_eq!(analysis.criticality_level, Criticality::Minor);
        assert_eq!(analysis.fr_id, "fr-1");
    }
}
