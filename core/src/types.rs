use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Fresh record id such as `fr-1f0c...`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Developer,
    Ba,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Developer, Role::Ba];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Developer => "developer",
            Role::Ba => "ba",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrStatus {
    Draft,
    UnderReview,
    Analyzed,
    Completed,
}

impl FrStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FrStatus::Draft => "draft",
            FrStatus::UnderReview => "under-review",
            FrStatus::Analyzed => "analyzed",
            FrStatus::Completed => "completed",
        }
    }

    /// Draft and under-review requirements count as pending on the dashboard.
    pub fn is_pending(self) -> bool {
        matches!(self, FrStatus::Draft | FrStatus::UnderReview)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Minor,
    Support,
    Major,
}

impl Criticality {
    pub fn as_str(self) -> &'static str {
        match self {
            Criticality::Minor => "minor",
            Criticality::Support => "support",
            Criticality::Major => "major",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Mobile,
    Web,
    Desktop,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Mobile => "mobile",
            ChannelType::Web => "web",
            ChannelType::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Module,
    Class,
    Method,
}

macro_rules! impl_text_enum {
    ($ty:ident, $label:literal, [$($variant:ident),+]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(Error::Validation(format!("unknown {} '{s}'", $label)))
            }
        }
    };
}

impl_text_enum!(Role, "role", [Admin, Developer, Ba]);
impl_text_enum!(FrStatus, "status", [Draft, UnderReview, Analyzed, Completed]);
impl_text_enum!(Criticality, "criticality", [Minor, Support, Major]);
impl_text_enum!(ChannelType, "channel type", [Mobile, Web, Desktop]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub description: String,
    pub git_url: String,
    #[serde(default)]
    pub linked_developers: Vec<String>,
    #[serde(default, rename = "linkedBAs")]
    pub linked_bas: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_analysis: Option<DateTime<Utc>>,
    #[serde(rename = "totalAPIs", skip_serializing_if = "Option::is_none", default)]
    pub total_apis: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vulnerable_modules: Option<u32>,
}

/// Fields accepted when registering or editing a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDraft {
    pub name: String,
    pub description: String,
    pub git_url: String,
    #[serde(default)]
    pub linked_developers: Vec<String>,
    #[serde(default, rename = "linkedBAs")]
    pub linked_bas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionalRequirement {
    pub id: String,
    pub repository_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_url: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub status: FrStatus,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequirement {
    pub repository_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_url: Option<String>,
}

/// Partial edit of a requirement. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementPatch {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<FrStatus>,
}

impl RequirementPatch {
    pub fn apply(&self, fr: &mut FunctionalRequirement) {
        if let Some(title) = &self.title {
            fr.title = title.clone();
        }
        if let Some(description) = &self.description {
            fr.description = description.clone();
        }
        if let Some(file_url) = &self.file_url {
            fr.file_url = Some(file_url.clone());
        }
        if let Some(status) = self.status {
            fr.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DependencyKind,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vulnerable: Option<bool>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// One step of the path that makes an API affected.
/// Stacks are stored entry point first, root cause last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStackItem {
    pub method: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactedApi {
    pub id: String,
    pub name: String,
    pub is_affected: bool,
    #[serde(default)]
    pub call_stack: Vec<CallStackItem>,
    pub criticality: Criticality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedModule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub apis: Vec<ImpactedApi>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedApplication {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modules: Vec<AffectedModule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedChannel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default)]
    pub applications: Vec<AffectedApplication>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    pub id: String,
    pub fr_id: String,
    pub repository_id: String,
    pub analyzed_at: DateTime<Utc>,
    #[serde(rename = "totalImpactedAPIs")]
    pub total_impacted_apis: u32,
    #[serde(rename = "totalAPIs")]
    pub total_apis: u32,
    pub affected_modules: u32,
    pub criticality_level: Criticality,
    #[serde(default)]
    pub affected_channels: Vec<AffectedChannel>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub narrative_report: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub user_name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_repositories: Option<u32>,
    pub functional_requirements: u32,
    pub pending_reviews: u32,
    pub analyzed_requirements: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub role: Role,
    pub action: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisHistoryResponse {
    pub fr_id: String,
    pub current: Option<String>,
    pub analyses: Vec<ImpactAnalysis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedResponse {
    pub database: String,
    pub seeded: bool,
    pub users: u32,
    pub repositories: u32,
    pub requirements: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&FrStatus::UnderReview).unwrap();
        assert_eq!(json, "\"under-review\"");
        assert_eq!("under-review".parse::<FrStatus>().unwrap(), FrStatus::UnderReview);
    }

    #[test]
    fn test_unknown_criticality_rejected() {
        let err = "critical".parse::<Criticality>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_api_camel_case_fields() {
        let api = ImpactedApi {
            id: "api-1".to_string(),
            name: "POST /cart".to_string(),
            is_affected: true,
            call_stack: vec![CallStackItem {
                method: "CartController.add".to_string(),
                description: "entry".to_string(),
                line: Some(42),
            }],
            criticality: Criticality::Major,
        };
        let value = serde_json::to_value(&api).unwrap();
        assert_eq!(value["isAffected"], true);
        assert_eq!(value["callStack"][0]["line"], 42);
        assert_eq!(value["criticality"], "major");
    }

    #[test]
    fn test_patch_leaves_unset_fields() {
        let mut fr = FunctionalRequirement {
            id: "fr-1".to_string(),
            repository_id: "repo-1".to_string(),
            title: "Old".to_string(),
            description: "Desc".to_string(),
            file_url: None,
            created_by: "user-3".to_string(),
            created_at: Utc::now(),
            status: FrStatus::Draft,
            comments: Vec::new(),
        };
        let patch = RequirementPatch {
            title: Some("New".to_string()),
            ..Default::default()
        };
        patch.apply(&mut fr);
        assert_eq!(fr.title, "New");
        assert_eq!(fr.description, "Desc");
        assert_eq!(fr.status, FrStatus::Draft);
    }
}
