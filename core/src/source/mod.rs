//! Backends holding workspace records.
//!
//! Every backend implements [`DataSource`]; the session picks one at startup
//! from [`SourceKind`] and never branches on the backend again.

pub mod memory;
pub mod rest;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{
    AffectedChannel, Comment, DependencyNode, FunctionalRequirement, ImpactAnalysis,
    NewRequirement, Repository, RepositoryDraft, RequirementPatch, Role, User,
};

pub use memory::MemorySource;
pub use rest::RestSource;
pub use sqlite::SqliteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Demo data held in process memory
    Memory,
    /// SQLite database under the workspace directory
    #[default]
    Sqlite,
    /// Remote REST backend
    Rest,
}

impl std::str::FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(SourceKind::Memory),
            "sqlite" => Ok(SourceKind::Sqlite),
            "rest" => Ok(SourceKind::Rest),
            other => Err(Error::Validation(format!("unknown data source '{other}'"))),
        }
    }
}

pub trait DataSource {
    fn kind(&self) -> SourceKind;

    fn list_users(&self) -> Result<Vec<User>>;

    /// Look a user up by id or email.
    fn find_user(&self, key: &str) -> Result<User>;

    fn create_user(&mut self, email: &str, name: &str, role: Role) -> Result<User>;

    fn list_repositories(&self) -> Result<Vec<Repository>>;

    fn get_repository(&self, id: &str) -> Result<Repository>;

    fn create_repository(&mut self, draft: &RepositoryDraft) -> Result<Repository>;

    fn update_repository(&mut self, id: &str, draft: &RepositoryDraft) -> Result<Repository>;

    /// Deletes the repository together with its requirements and analyses.
    fn delete_repository(&mut self, id: &str) -> Result<()>;

    fn dependencies(&self, repository_id: &str) -> Result<Vec<DependencyNode>>;

    /// Replace the API surface that local analyses trace against.
    fn register_surface(&mut self, repository_id: &str, channels: &[AffectedChannel]) -> Result<()>;

    fn list_requirements(&self, repository_id: Option<&str>) -> Result<Vec<FunctionalRequirement>>;

    fn get_requirement(&self, id: &str) -> Result<FunctionalRequirement>;

    fn create_requirement(
        &mut self,
        new: &NewRequirement,
        author: &User,
    ) -> Result<FunctionalRequirement>;

    fn update_requirement(
        &mut self,
        id: &str,
        patch: &RequirementPatch,
    ) -> Result<FunctionalRequirement>;

    /// Deletes the requirement and every analysis of it.
    fn delete_requirement(&mut self, id: &str) -> Result<()>;

    fn add_comment(&mut self, fr_id: &str, author: &User, content: &str) -> Result<Comment>;

    /// Analyze a requirement. On success the new analysis is the current one
    /// for the requirement, the requirement is `analyzed` and the repository's
    /// last analysis time is stamped. On failure nothing is modified.
    fn run_analysis(&mut self, fr_id: &str) -> Result<ImpactAnalysis>;

    /// Analyze the same requirement again, superseding `analysis_id`.
    fn rerun_analysis(&mut self, analysis_id: &str) -> Result<ImpactAnalysis> {
        let prior = self.get_analysis(analysis_id)?;
        self.run_analysis(&prior.fr_id)
    }

    fn current_analysis(&self, fr_id: &str) -> Result<Option<ImpactAnalysis>>;

    /// All analyses of a requirement, newest first.
    fn list_analyses(&self, fr_id: &str) -> Result<Vec<ImpactAnalysis>>;

    fn get_analysis(&self, id: &str) -> Result<ImpactAnalysis>;

    /// Store free-form report text on an analysis. The text is kept verbatim.
    fn attach_narrative(&mut self, analysis_id: &str, narrative: &str) -> Result<ImpactAnalysis>;
}

pub(crate) fn check_draft(draft: &RepositoryDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(Error::Validation("repository name is required".to_string()));
    }
    if draft.git_url.trim().is_empty() {
        return Err(Error::Validation("repository git URL is required".to_string()));
    }
    Ok(())
}

pub(crate) fn check_new_requirement(new: &NewRequirement) -> Result<()> {
    if new.title.trim().is_empty() {
        return Err(Error::Validation("requirement title is required".to_string()));
    }
    Ok(())
}
