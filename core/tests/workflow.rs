//! End-to-end flows through the library entry points against an on-disk
//! workspace, one session per step the way the CLI runs.

use std::path::Path;

use impact_core::config::{CliOverrides, Config};
use impact_core::error::Error;
use impact_core::source::SourceKind;
use impact_core::types::{
    AffectedApplication, AffectedChannel, AffectedModule, CallStackItem, ChannelType, Criticality,
    FrStatus, ImpactedApi,
};

fn seeded_workspace() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path(), &CliOverrides::default()).unwrap();
    let seeded = impact_core::seed_workspace(dir.path(), &config).unwrap();
    assert!(seeded.seeded);
    assert!(dir.path().join(".impact/impact.db").exists());
    (dir, config)
}

fn status_of(workspace: &Path, config: &Config, fr_id: &str) -> FrStatus {
    let session = impact_core::open_session(workspace, config, "admin@example.com").unwrap();
    session
        .requirements(None)
        .unwrap()
        .into_iter()
        .find(|fr| fr.id == fr_id)
        .unwrap()
        .status
}

#[test]
fn seeding_twice_is_a_no_op() {
    let (dir, config) = seeded_workspace();
    let again = impact_core::seed_workspace(dir.path(), &config).unwrap();
    assert!(!again.seeded);
}

#[test]
fn analyze_persists_across_sessions() {
    let (dir, config) = seeded_workspace();
    assert_eq!(status_of(dir.path(), &config, "fr-3"), FrStatus::Draft);

    let analysis = {
        let mut ba = impact_core::open_session(dir.path(), &config, "ba@example.com").unwrap();
        ba.analyze("fr-3").unwrap()
    };
    assert!(analysis.total_impacted_apis <= analysis.total_apis);
    assert_eq!(status_of(dir.path(), &config, "fr-3"), FrStatus::Analyzed);

    let dev = impact_core::open_session(dir.path(), &config, "dev@example.com").unwrap();
    let current = dev.impact_analysis("fr-3").unwrap().unwrap();
    assert_eq!(current, analysis);

    let report = dev.report("fr-3").unwrap();
    assert!(report.contains("Add Email Notification for Payment Failures"));
    assert!(report.contains("POST /api/payments/charge"));
    assert_eq!(report, dev.report("fr-3").unwrap());
}

#[test]
fn failed_analysis_leaves_requirement_untouched() {
    let (dir, config) = seeded_workspace();
    let mut ba = impact_core::open_session(dir.path(), &config, "sarah.ba@example.com").unwrap();
    assert!(matches!(ba.analyze("fr-4"), Err(Error::AnalysisFailed(_))));
    assert!(ba.impact_analysis("fr-4").unwrap().is_none());
    drop(ba);
    assert_eq!(status_of(dir.path(), &config, "fr-4"), FrStatus::Draft);
}

#[test]
fn registered_surface_enables_analysis() {
    let (dir, config) = seeded_workspace();
    let surface = vec![AffectedChannel {
        id: "auth-web".to_string(),
        name: "Login Portal".to_string(),
        kind: ChannelType::Web,
        applications: vec![AffectedApplication {
            id: "auth-app".to_string(),
            name: "Auth Service".to_string(),
            modules: vec![AffectedModule {
                id: "auth-session".to_string(),
                name: "SessionModule".to_string(),
                apis: vec![
                    ImpactedApi {
                        id: "auth-api-1".to_string(),
                        name: "POST /api/auth/login".to_string(),
                        is_affected: false,
                        call_stack: vec![
                            CallStackItem {
                                method: "login".to_string(),
                                description: "Credential check".to_string(),
                                line: Some(40),
                            },
                            CallStackItem {
                                method: "issueToken".to_string(),
                                description: "Sign the JWT".to_string(),
                                line: None,
                            },
                        ],
                        criticality: Criticality::Major,
                    },
                    ImpactedApi {
                        id: "auth-api-2".to_string(),
                        name: "GET /api/auth/jwks".to_string(),
                        is_affected: false,
                        call_stack: Vec::new(),
                        criticality: Criticality::Support,
                    },
                ],
            }],
        }],
    }];

    let mut admin = impact_core::open_session(dir.path(), &config, "admin@example.com").unwrap();
    let repo = admin.register_surface("repo-3", &surface).unwrap();
    assert_eq!(repo.total_apis, Some(2));
    drop(admin);

    let mut ba = impact_core::open_session(dir.path(), &config, "sarah.ba@example.com").unwrap();
    let analysis = ba.analyze("fr-4").unwrap();
    assert_eq!(analysis.total_apis, 2);
    assert_eq!(analysis.total_impacted_apis, 1);
    assert_eq!(analysis.criticality_level, Criticality::Major);
    let api = &analysis.affected_channels[0].applications[0].modules[0].apis[0];
    assert!(api.is_affected);
    assert_eq!(api.call_stack[0].method, "login");
    assert_eq!(api.call_stack[1].method, "issueToken");
}

#[test]
fn authorization_is_checked_before_mutation() {
    let (dir, config) = seeded_workspace();
    let mut dev = impact_core::open_session(dir.path(), &config, "dev@example.com").unwrap();
    assert!(matches!(dev.analyze("fr-2"), Err(Error::Authorization { .. })));
    assert!(matches!(dev.delete_requirement("fr-2"), Err(Error::Authorization { .. })));
    drop(dev);
    assert_eq!(status_of(dir.path(), &config, "fr-2"), FrStatus::UnderReview);
}

#[test]
fn memory_source_needs_no_seed() {
    let dir = tempfile::tempdir().unwrap();
    let overrides = CliOverrides {
        data_source: Some(SourceKind::Memory),
        ..Default::default()
    };
    let config = Config::load(dir.path(), &overrides).unwrap();
    let session = impact_core::open_session(dir.path(), &config, "ba@example.com").unwrap();
    assert_eq!(session.source_kind(), SourceKind::Memory);
    assert!(session.impact_analysis("fr-1").unwrap().is_some());
    assert!(!dir.path().join(".impact").exists());
    assert!(matches!(
        impact_core::seed_workspace(dir.path(), &config),
        Err(Error::Validation(_))
    ));
}
