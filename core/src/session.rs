//! The state container behind every front end.
//!
//! A [`Session`] owns the data source chosen at wiring time and the acting
//! user. Each operation asks the access policy first and only then touches
//! the source, so a denied call never mutates anything.

use crate::aggregate::{self, SeverityOrder};
use crate::error::{Error, Result};
use crate::policy::{self, Action};
use crate::report;
use crate::source::{DataSource, SourceKind};
use crate::types::{
    AffectedChannel, AnalysisHistoryResponse, Comment, DashboardSummary, DeleteResponse,
    DependencyNode, FrStatus, FunctionalRequirement, ImpactAnalysis, NewRequirement,
    PermissionResponse, Repository, RepositoryDraft, RequirementPatch, Role, User,
};
use crate::validate;

pub struct Session {
    source: Box<dyn DataSource>,
    user: User,
    order: SeverityOrder,
    prefer_narrative: bool,
}

impl Session {
    /// Resolve `user_key` (id or email) against the source and start a session.
    pub fn open(
        source: Box<dyn DataSource>,
        user_key: &str,
        order: SeverityOrder,
        prefer_narrative: bool,
    ) -> Result<Self> {
        let user = source.find_user(user_key)?;
        tracing::debug!(user = %user.email, role = %user.role, source = ?source.kind(), "session opened");
        Ok(Self {
            source,
            user,
            order,
            prefer_narrative,
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn can(&self, action: Action) -> PermissionResponse {
        PermissionResponse {
            role: self.user.role,
            action: action.to_string(),
            allowed: policy::is_allowed(self.user.role, action),
        }
    }

    fn authorize(&self, action: Action) -> Result<()> {
        policy::authorize(self.user.role, action)
    }

    pub fn dashboard(&self) -> Result<DashboardSummary> {
        self.authorize(Action::ViewDashboard)?;
        let frs = self.source.list_requirements(None)?;
        let sees_repositories = policy::is_allowed(self.user.role, Action::ManageRepositories);

        let (total_repositories, vulnerabilities) = if sees_repositories {
            let repos = self.source.list_repositories()?;
            let vulnerable = repos.iter().filter_map(|r| r.vulnerable_modules).sum::<u32>();
            (Some(repos.len() as u32), Some(vulnerable))
        } else {
            (None, None)
        };

        Ok(DashboardSummary {
            user_name: self.user.name.clone(),
            role: self.user.role,
            total_repositories,
            functional_requirements: frs.len() as u32,
            pending_reviews: frs.iter().filter(|fr| fr.status.is_pending()).count() as u32,
            analyzed_requirements: frs
                .iter()
                .filter(|fr| fr.status == FrStatus::Analyzed)
                .count() as u32,
            vulnerabilities,
        })
    }

    pub fn users(&self) -> Result<Vec<User>> {
        self.authorize(Action::ManageUsers)?;
        self.source.list_users()
    }

    pub fn add_user(&mut self, email: &str, name: &str, role: Role) -> Result<User> {
        self.authorize(Action::ManageUsers)?;
        if email.trim().is_empty() || name.trim().is_empty() {
            return Err(Error::Validation("user email and name are required".to_string()));
        }
        self.source.create_user(email.trim(), name.trim(), role)
    }

    pub fn repositories(&self) -> Result<Vec<Repository>> {
        self.authorize(Action::ViewDashboard)?;
        self.source.list_repositories()
    }

    pub fn add_repository(&mut self, draft: &RepositoryDraft) -> Result<Repository> {
        self.authorize(Action::ManageRepositories)?;
        let repo = self.source.create_repository(draft)?;
        tracing::info!(repository = %repo.id, "repository registered");
        Ok(repo)
    }

    pub fn update_repository(&mut self, id: &str, draft: &RepositoryDraft) -> Result<Repository> {
        self.authorize(Action::ManageRepositories)?;
        self.source.update_repository(id, draft)
    }

    pub fn delete_repository(&mut self, id: &str) -> Result<DeleteResponse> {
        self.authorize(Action::ManageRepositories)?;
        self.source.delete_repository(id)?;
        Ok(DeleteResponse {
            id: id.to_string(),
            deleted: true,
        })
    }

    pub fn dependencies(&self, repository_id: &str) -> Result<Vec<DependencyNode>> {
        self.authorize(Action::ViewDashboard)?;
        self.source.dependencies(repository_id)
    }

    pub fn register_surface(
        &mut self,
        repository_id: &str,
        channels: &[AffectedChannel],
    ) -> Result<Repository> {
        self.authorize(Action::ManageRepositories)?;
        self.source.register_surface(repository_id, channels)?;
        self.source.get_repository(repository_id)
    }

    pub fn requirements(&self, repository_id: Option<&str>) -> Result<Vec<FunctionalRequirement>> {
        self.authorize(Action::ViewDashboard)?;
        self.source.list_requirements(repository_id)
    }

    pub fn create_requirement(&mut self, new: &NewRequirement) -> Result<FunctionalRequirement> {
        self.authorize(Action::EditRequirement)?;
        let fr = self.source.create_requirement(new, &self.user)?;
        tracing::info!(fr = %fr.id, repository = %fr.repository_id, "requirement created");
        Ok(fr)
    }

    /// Edit an FR. The `analyzed` status is only reachable by running an analysis.
    pub fn update_requirement(
        &mut self,
        id: &str,
        patch: &RequirementPatch,
    ) -> Result<FunctionalRequirement> {
        self.authorize(Action::EditRequirement)?;
        if patch.status == Some(FrStatus::Analyzed) {
            return Err(Error::Validation(
                "status 'analyzed' is set by running an impact analysis".to_string(),
            ));
        }
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(Error::Validation("requirement title is required".to_string()));
        }
        self.source.update_requirement(id, patch)
    }

    pub fn delete_requirement(&mut self, id: &str) -> Result<DeleteResponse> {
        self.authorize(Action::DeleteRequirement)?;
        self.source.delete_requirement(id)?;
        Ok(DeleteResponse {
            id: id.to_string(),
            deleted: true,
        })
    }

    pub fn comment(&mut self, fr_id: &str, content: &str) -> Result<Comment> {
        self.authorize(Action::Comment)?;
        if content.trim().is_empty() {
            return Err(Error::Validation("comment is empty".to_string()));
        }
        self.source.add_comment(fr_id, &self.user, content)
    }

    /// Run an impact analysis for `fr_id` and make it the current one.
    pub fn analyze(&mut self, fr_id: &str) -> Result<ImpactAnalysis> {
        self.authorize(Action::TriggerAnalysis)?;
        let analysis = self.source.run_analysis(fr_id)?;
        self.checked(analysis)
    }

    /// Analyze the FR of `analysis_id` again. The prior analysis stays in history.
    pub fn rerun(&mut self, analysis_id: &str) -> Result<ImpactAnalysis> {
        self.authorize(Action::TriggerAnalysis)?;
        let analysis = self.source.rerun_analysis(analysis_id)?;
        self.checked(analysis)
    }

    /// The source has already committed `analysis`, so it is returned as
    /// stored. A summary that disagrees with its tree is only logged.
    fn checked(&self, analysis: ImpactAnalysis) -> Result<ImpactAnalysis> {
        validate::validate_analysis(&analysis)?;
        aggregate::refresh(&mut analysis.clone(), &self.order)?;
        tracing::info!(
            analysis = %analysis.id,
            fr = %analysis.fr_id,
            impacted = analysis.total_impacted_apis,
            total = analysis.total_apis,
            level = %analysis.criticality_level,
            "impact analysis complete"
        );
        Ok(analysis)
    }

    /// Current analysis of an FR, if it has been analyzed. Unknown FRs are
    /// `NotFound`.
    pub fn impact_analysis(&self, fr_id: &str) -> Result<Option<ImpactAnalysis>> {
        self.authorize(Action::ViewAnalysis)?;
        self.source.get_requirement(fr_id)?;
        self.source.current_analysis(fr_id)
    }

    pub fn analysis(&self, id: &str) -> Result<ImpactAnalysis> {
        self.authorize(Action::ViewAnalysis)?;
        self.source.get_analysis(id)
    }

    pub fn history(&self, fr_id: &str) -> Result<AnalysisHistoryResponse> {
        self.authorize(Action::ViewAnalysis)?;
        self.source.get_requirement(fr_id)?;
        let current = self.source.current_analysis(fr_id)?.map(|a| a.id);
        Ok(AnalysisHistoryResponse {
            fr_id: fr_id.to_string(),
            current,
            analyses: self.source.list_analyses(fr_id)?,
        })
    }

    /// Render the report of an FR's current analysis.
    pub fn report(&self, fr_id: &str) -> Result<String> {
        self.authorize(Action::ViewAnalysis)?;
        let fr = self.source.get_requirement(fr_id)?;
        let analysis = self
            .source
            .current_analysis(fr_id)?
            .ok_or_else(|| Error::NoData(format!("requirement {fr_id} has not been analyzed")))?;
        report::render_report(&analysis, &fr.title, self.prefer_narrative)
    }

    pub fn attach_narrative(&mut self, analysis_id: &str, narrative: &str) -> Result<ImpactAnalysis> {
        self.authorize(Action::TriggerAnalysis)?;
        self.source.attach_narrative(analysis_id, narrative)
    }
}
