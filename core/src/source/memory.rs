use std::collections::HashMap;

use chrono::Utc;

use super::{DataSource, SourceKind, check_draft, check_new_requirement};
use crate::aggregate::SeverityOrder;
use crate::error::{Error, Result};
use crate::seed::SeedData;
use crate::tracer;
use crate::types::{
    AffectedChannel, Comment, DependencyNode, FrStatus, FunctionalRequirement, ImpactAnalysis,
    NewRequirement, Repository, RepositoryDraft, RequirementPatch, Role, User, new_id,
};
use crate::validate;

/// Records held in process memory. Used for demos and tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    order: SeverityOrder,
    users: Vec<User>,
    repositories: Vec<Repository>,
    requirements: Vec<FunctionalRequirement>,
    surfaces: HashMap<String, Vec<AffectedChannel>>,
    dependencies: HashMap<String, Vec<DependencyNode>>,
    /// Oldest first.
    analyses: Vec<ImpactAnalysis>,
    current: HashMap<String, String>,
}

impl MemorySource {
    pub fn new(order: SeverityOrder) -> Self {
        Self {
            order,
            ..Default::default()
        }
    }

    pub fn from_seed(data: SeedData, order: SeverityOrder) -> Self {
        let mut source = Self::new(order);
        source.users = data.users;
        source.repositories = data.repositories;
        source.requirements = data.requirements;
        source.surfaces = data.surfaces.into_iter().collect();
        source.dependencies = data.dependencies.into_iter().collect();
        for analysis in data.analyses {
            source.current.insert(analysis.fr_id.clone(), analysis.id.clone());
            source.analyses.push(analysis);
        }
        source
    }

    fn requirement_mut(&mut self, id: &str) -> Result<&mut FunctionalRequirement> {
        self.requirements
            .iter_mut()
            .find(|fr| fr.id == id)
            .ok_or_else(|| Error::not_found("functional requirement", id))
    }

    fn repository_mut(&mut self, id: &str) -> Result<&mut Repository> {
        self.repositories
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found("repository", id))
    }

    fn drop_requirements_where(&mut self, keep: impl Fn(&FunctionalRequirement) -> bool) {
        let removed: Vec<String> = self
            .requirements
            .iter()
            .filter(|fr| !keep(fr))
            .map(|fr| fr.id.clone())
            .collect();
        self.requirements.retain(|fr| keep(fr));
        self.analyses.retain(|a| !removed.contains(&a.fr_id));
        for id in &removed {
            self.current.remove(id);
        }
    }
}

impl DataSource for MemorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }

    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.users.clone())
    }

    fn find_user(&self, key: &str) -> Result<User> {
        self.users
            .iter()
            .find(|u| u.id == key || u.email.eq_ignore_ascii_case(key))
            .cloned()
            .ok_or_else(|| Error::not_found("user", key))
    }

    fn create_user(&mut self, email: &str, name: &str, role: Role) -> Result<User> {
        if self.users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(Error::Validation(format!("user '{email}' already exists")));
        }
        let user = User {
            id: new_id("user"),
            email: email.to_string(),
            name: name.to_string(),
            role,
        };
        self.users.push(user.clone());
        Ok(user)
    }

    fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.repositories.clone())
    }

    fn get_repository(&self, id: &str) -> Result<Repository> {
        self.repositories
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("repository", id))
    }

    fn create_repository(&mut self, draft: &RepositoryDraft) -> Result<Repository> {
        check_draft(draft)?;
        let repo = Repository {
            id: new_id("repo"),
            name: draft.name.clone(),
            description: draft.description.clone(),
            git_url: draft.git_url.clone(),
            linked_developers: draft.linked_developers.clone(),
            linked_bas: draft.linked_bas.clone(),
            created_at: Utc::now(),
            last_analysis: None,
            total_apis: None,
            vulnerable_modules: None,
        };
        self.repositories.push(repo.clone());
        Ok(repo)
    }

    fn update_repository(&mut self, id: &str, draft: &RepositoryDraft) -> Result<Repository> {
        check_draft(draft)?;
        let repo = self.repository_mut(id)?;
        repo.name = draft.name.clone();
        repo.description = draft.description.clone();
        repo.git_url = draft.git_url.clone();
        repo.linked_developers = draft.linked_developers.clone();
        repo.linked_bas = draft.linked_bas.clone();
        Ok(repo.clone())
    }

    fn delete_repository(&mut self, id: &str) -> Result<()> {
        self.get_repository(id)?;
        self.repositories.retain(|r| r.id != id);
        self.surfaces.remove(id);
        self.dependencies.remove(id);
        self.drop_requirements_where(|fr| fr.repository_id != id);
        Ok(())
    }

    fn dependencies(&self, repository_id: &str) -> Result<Vec<DependencyNode>> {
        self.get_repository(repository_id)?;
        Ok(self.dependencies.get(repository_id).cloned().unwrap_or_default())
    }

    fn register_surface(&mut self, repository_id: &str, channels: &[AffectedChannel]) -> Result<()> {
        validate::validate_channels(channels)?;
        let repo = self.repository_mut(repository_id)?;
        repo.total_apis = Some(
            channels
                .iter()
                .flat_map(|c| &c.applications)
                .flat_map(|a| &a.modules)
                .map(|m| m.apis.len() as u32)
                .sum(),
        );
        self.surfaces.insert(repository_id.to_string(), channels.to_vec());
        Ok(())
    }

    fn list_requirements(&self, repository_id: Option<&str>) -> Result<Vec<FunctionalRequirement>> {
        Ok(self
            .requirements
            .iter()
            .filter(|fr| repository_id.is_none_or(|id| fr.repository_id == id))
            .cloned()
            .collect())
    }

    fn get_requirement(&self, id: &str) -> Result<FunctionalRequirement> {
        self.requirements
            .iter()
            .find(|fr| fr.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("functional requirement", id))
    }

    fn create_requirement(
        &mut self,
        new: &NewRequirement,
        author: &User,
    ) -> Result<FunctionalRequirement> {
        check_new_requirement(new)?;
        self.get_repository(&new.repository_id)?;
        let fr = FunctionalRequirement {
            id: new_id("fr"),
            repository_id: new.repository_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            file_url: new.file_url.clone(),
            created_by: author.id.clone(),
            created_at: Utc::now(),
            status: FrStatus::Draft,
            comments: Vec::new(),
        };
        self.requirements.push(fr.clone());
        Ok(fr)
    }

    fn update_requirement(
        &mut self,
        id: &str,
        patch: &RequirementPatch,
    ) -> Result<FunctionalRequirement> {
        let fr = self.requirement_mut(id)?;
        patch.apply(fr);
        Ok(fr.clone())
    }

    fn delete_requirement(&mut self, id: &str) -> Result<()> {
        self.get_requirement(id)?;
        self.drop_requirements_where(|fr| fr.id != id);
        Ok(())
    }

    fn add_comment(&mut self, fr_id: &str, author: &User, content: &str) -> Result<Comment> {
        let fr = self.requirement_mut(fr_id)?;
        let comment = Comment {
            id: new_id("comment"),
            user_id: author.id.clone(),
            user_name: author.name.clone(),
            user_role: author.role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        fr.comments.push(comment.clone());
        Ok(comment)
    }

    fn run_analysis(&mut self, fr_id: &str) -> Result<ImpactAnalysis> {
        let fr = self.get_requirement(fr_id)?;
        let surface = self.surfaces.get(&fr.repository_id).cloned().unwrap_or_default();
        let analysis = tracer::build_analysis(&fr, &surface, new_id("impact"), Utc::now(), &self.order)?;

        // Everything fallible is done; commit.
        self.requirement_mut(fr_id)?.status = FrStatus::Analyzed;
        if let Ok(repo) = self.repository_mut(&fr.repository_id) {
            repo.last_analysis = Some(analysis.analyzed_at);
        }
        self.current.insert(fr_id.to_string(), analysis.id.clone());
        self.analyses.push(analysis.clone());
        Ok(analysis)
    }

    fn current_analysis(&self, fr_id: &str) -> Result<Option<ImpactAnalysis>> {
        Ok(self
            .current
            .get(fr_id)
            .and_then(|id| self.analyses.iter().find(|a| &a.id == id))
            .cloned())
    }

    fn list_analyses(&self, fr_id: &str) -> Result<Vec<ImpactAnalysis>> {
        Ok(self
            .analyses
            .iter()
            .rev()
            .filter(|a| a.fr_id == fr_id)
            .cloned()
            .collect())
    }

    fn get_analysis(&self, id: &str) -> Result<ImpactAnalysis> {
        self.analyses
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("impact analysis", id))
    }

    fn attach_narrative(&mut self, analysis_id: &str, narrative: &str) -> Result<ImpactAnalysis> {
        let analysis = self
            .analyses
            .iter_mut()
            .find(|a| a.id == analysis_id)
            .ok_or_else(|| Error::not_found("impact analysis", analysis_id))?;
        analysis.narrative_report = Some(narrative.to_string());
        Ok(analysis.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;

    fn seeded() -> MemorySource {
        let order = SeverityOrder::default();
        MemorySource::from_seed(seed::demo(&order).unwrap(), order)
    }

    #[test]
    fn test_find_user_by_email_or_id() {
        let source = seeded();
        assert_eq!(source.find_user("ba@example.com").unwrap().id, "user-3");
        assert_eq!(source.find_user("user-1").unwrap().role, Role::Admin);
        assert!(matches!(source.find_user("nobody"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_run_analysis_updates_status() {
        let mut source = seeded();
        let analysis = source.run_analysis("fr-3").unwrap();
        assert_eq!(analysis.total_apis, 4);
        assert_eq!(source.get_requirement("fr-3").unwrap().status, FrStatus::Analyzed);
        assert_eq!(source.current_analysis("fr-3").unwrap().unwrap().id, analysis.id);
        assert_eq!(
            source.get_repository("repo-2").unwrap().last_analysis,
            Some(analysis.analyzed_at)
        );
    }

    #[test]
    fn test_failed_analysis_changes_nothing() {
        let mut source = seeded();
        let err = source.run_analysis("fr-4").unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(_)));
        assert_eq!(source.get_requirement("fr-4").unwrap().status, FrStatus::Draft);
        assert!(source.current_analysis("fr-4").unwrap().is_none());
        assert!(source.get_repository("repo-3").unwrap().last_analysis.is_none());
    }

    #[test]
    fn test_rerun_supersedes() {
        let mut source = seeded();
        let first = source.current_analysis("fr-1").unwrap().unwrap();
        let second = source.rerun_analysis(&first.id).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(source.current_analysis("fr-1").unwrap().unwrap().id, second.id);
        let history = source.list_analyses("fr-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
    }

    #[test]
    fn test_delete_requirement_cascades() {
        let mut source = seeded();
        let analysis_id = source.current_analysis("fr-1").unwrap().unwrap().id;
        source.delete_requirement("fr-1").unwrap();
        assert!(source.get_requirement("fr-1").is_err());
        assert!(source.get_analysis(&analysis_id).is_err());
        assert!(source.current_analysis("fr-1").unwrap().is_none());
    }

    #[test]
    fn test_delete_repository_cascades() {
        let mut source = seeded();
        source.delete_repository("repo-1").unwrap();
        assert!(source.list_requirements(Some("repo-1")).unwrap().is_empty());
        assert!(source.get_analysis("impact-1").is_err());
        assert_eq!(source.list_requirements(None).unwrap().len(), 2);
    }

    #[test]
    fn test_comments_keep_order() {
        let mut source = seeded();
        let dev = source.find_user("dev@example.com").unwrap();
        source.add_comment("fr-2", &dev, "first").unwrap();
        source.add_comment("fr-2", &dev, "second").unwrap();
        let fr = source.get_requirement("fr-2").unwrap();
        let contents: Vec<&str> = fr.comments.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(fr.comments[0].user_role, Role::Developer);
    }

    #[test]
    fn test_register_surface_rejects_duplicates() {
        let mut source = seeded();
        let mut surface = source.surfaces["repo-1"].clone();
        surface.push(surface[0].clone());
        assert!(matches!(
            source.register_surface("repo-3", &surface),
            Err(Error::Validation(_))
        ));
        assert!(!source.surfaces.contains_key("repo-3"));
    }
}
