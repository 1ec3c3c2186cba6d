use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{DataSource, SourceKind, check_draft, check_new_requirement};
use crate::error::{Error, Result};
use crate::types::{
    AffectedChannel, Comment, DependencyNode, FrStatus, FunctionalRequirement, ImpactAnalysis,
    NewRequirement, Repository, RepositoryDraft, RequirementPatch, Role, User,
};
use crate::validate;

/// User key that resolves to the owner of the bearer token via `/auth/me`.
pub const TOKEN_OWNER: &str = "me";

/// Records served by a remote backend. Every call is one blocking request.
#[derive(Debug)]
pub struct RestSource {
    client: Client,
    base_url: String,
    token: Option<String>,
}

/// Pull `key` out of a wrapped response body such as `{"repository": {...}}`.
fn field<T: DeserializeOwned>(mut body: Value, key: &str) -> Result<T> {
    match body.get_mut(key) {
        Some(value) => Ok(serde_json::from_value(value.take())?),
        None => Err(Error::Validation(format!(
            "response is missing the '{key}' field"
        ))),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Map the outcome of an analyze or rerun call. Transport errors and bodies
/// that do not hold an analysis are backend failures, reported as
/// `AnalysisFailed`. Rejections the backend states (404, 400, 422) pass
/// through.
fn analysis_result(outcome: Result<Option<Value>>, path: &str) -> Result<ImpactAnalysis> {
    let unreadable = |e: serde_json::Error| {
        Error::AnalysisFailed(format!("unreadable analysis from {path}: {e}"))
    };
    let body = match outcome {
        Ok(Some(body)) => body,
        Ok(None) => return Err(Error::AnalysisFailed(format!("empty response from {path}"))),
        Err(Error::Http(e)) => return Err(Error::AnalysisFailed(e.to_string())),
        Err(Error::Json(e)) => return Err(unreadable(e)),
        Err(other) => return Err(other),
    };
    field(body, "analysis").map_err(|e| match e {
        Error::Json(e) => unreadable(e),
        Error::Validation(msg) => Error::AnalysisFailed(msg),
        other => other,
    })
}

impl RestSource {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(Error::Validation(
                "the rest data source needs a base URL".to_string(),
            ));
        }
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, mut req: RequestBuilder, path: &str) -> Result<Option<Value>> {
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        tracing::debug!(path, "rest request");
        let resp = req.send()?;
        let status = resp.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found("resource", path));
        }
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().unwrap_or_default();
            return Err(Error::Validation(error_message(&body)));
        }
        let resp = resp.error_for_status()?;
        let text = resp.text()?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder, path: &str, key: &str) -> Result<T> {
        match self.send(req, path)? {
            Some(body) => field(body, key),
            None => Err(Error::Validation(format!("empty response from {path}"))),
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<T> {
        self.fetch(self.client.get(self.url(path)), path, key)
    }

    fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        key: &str,
    ) -> Result<T> {
        self.fetch(self.client.post(self.url(path)).json(body), path, key)
    }

    fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        key: &str,
    ) -> Result<T> {
        self.fetch(self.client.put(self.url(path)).json(body), path, key)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.send(self.client.delete(self.url(path)), path)?;
        Ok(())
    }

    fn analysis_call(&self, path: &str) -> Result<ImpactAnalysis> {
        let req = self.client.post(self.url(path)).json(&json!({}));
        analysis_result(self.send(req, path), path)
    }
}

impl DataSource for RestSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Rest
    }

    fn list_users(&self) -> Result<Vec<User>> {
        self.get("/users", "users")
    }

    fn find_user(&self, key: &str) -> Result<User> {
        if key == TOKEN_OWNER {
            return self.get("/auth/me", "user");
        }
        self.list_users()?
            .into_iter()
            .find(|u| u.id == key || u.email.eq_ignore_ascii_case(key))
            .ok_or_else(|| Error::not_found("user", key))
    }

    fn create_user(&mut self, email: &str, name: &str, role: Role) -> Result<User> {
        self.post(
            "/users",
            &json!({ "email": email, "name": name, "role": role }),
            "user",
        )
    }

    fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.get("/repositories", "repositories")
    }

    fn get_repository(&self, id: &str) -> Result<Repository> {
        self.get(&format!("/repositories/{id}"), "repository")
    }

    fn create_repository(&mut self, draft: &RepositoryDraft) -> Result<Repository> {
        check_draft(draft)?;
        self.post("/repositories", draft, "repository")
    }

    fn update_repository(&mut self, id: &str, draft: &RepositoryDraft) -> Result<Repository> {
        check_draft(draft)?;
        self.put(&format!("/repositories/{id}"), draft, "repository")
    }

    fn delete_repository(&mut self, id: &str) -> Result<()> {
        self.delete(&format!("/repositories/{id}"))
    }

    fn dependencies(&self, repository_id: &str) -> Result<Vec<DependencyNode>> {
        self.get(
            &format!("/repositories/{repository_id}/dependencies"),
            "dependencies",
        )
    }

    fn register_surface(&mut self, repository_id: &str, channels: &[AffectedChannel]) -> Result<()> {
        validate::validate_channels(channels)?;
        let path = format!("/repositories/{repository_id}/surface");
        let req = self
            .client
            .put(self.url(&path))
            .json(&json!({ "channels": channels }));
        self.send(req, &path)?;
        Ok(())
    }

    fn list_requirements(&self, repository_id: Option<&str>) -> Result<Vec<FunctionalRequirement>> {
        let path = "/functional-requirements";
        let mut req = self.client.get(self.url(path));
        if let Some(repo) = repository_id {
            req = req.query(&[("repositoryId", repo)]);
        }
        self.fetch(req, path, "functionalRequirements")
    }

    fn get_requirement(&self, id: &str) -> Result<FunctionalRequirement> {
        self.get(
            &format!("/functional-requirements/{id}"),
            "functionalRequirement",
        )
    }

    fn create_requirement(
        &mut self,
        new: &NewRequirement,
        author: &User,
    ) -> Result<FunctionalRequirement> {
        check_new_requirement(new)?;
        let mut body = serde_json::to_value(new)?;
        body["createdBy"] = json!(author.id);
        body["status"] = json!(FrStatus::Draft);
        self.post("/functional-requirements", &body, "functionalRequirement")
    }

    fn update_requirement(
        &mut self,
        id: &str,
        patch: &RequirementPatch,
    ) -> Result<FunctionalRequirement> {
        self.put(
            &format!("/functional-requirements/{id}"),
            patch,
            "functionalRequirement",
        )
    }

    fn delete_requirement(&mut self, id: &str) -> Result<()> {
        self.delete(&format!("/functional-requirements/{id}"))
    }

    fn add_comment(&mut self, fr_id: &str, _author: &User, content: &str) -> Result<Comment> {
        // the backend stamps the author from the bearer token
        self.post(
            &format!("/functional-requirements/{fr_id}/comments"),
            &json!({ "content": content }),
            "comment",
        )
    }

    fn run_analysis(&mut self, fr_id: &str) -> Result<ImpactAnalysis> {
        self.analysis_call(&format!("/functional-requirements/{fr_id}/analyze"))
    }

    fn rerun_analysis(&mut self, analysis_id: &str) -> Result<ImpactAnalysis> {
        self.analysis_call(&format!("/impact-analyses/{analysis_id}/rerun"))
    }

    fn current_analysis(&self, fr_id: &str) -> Result<Option<ImpactAnalysis>> {
        Ok(self.list_analyses(fr_id)?.into_iter().next())
    }

    fn list_analyses(&self, fr_id: &str) -> Result<Vec<ImpactAnalysis>> {
        let mut analyses: Vec<ImpactAnalysis> = self.get(
            &format!("/functional-requirements/{fr_id}/impact-analyses"),
            "analyses",
        )?;
        analyses.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at));
        Ok(analyses)
    }

    fn get_analysis(&self, id: &str) -> Result<ImpactAnalysis> {
        self.get(&format!("/impact-analyses/{id}"), "analysis")
    }

    fn attach_narrative(&mut self, analysis_id: &str, narrative: &str) -> Result<ImpactAnalysis> {
        self.put(
            &format!("/impact-analyses/{analysis_id}/narrative"),
            &json!({ "narrativeReport": narrative }),
            "analysis",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let source =
            RestSource::new("https://impact.example.com/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.url("/repositories/repo-1"),
            "https://impact.example.com/repositories/repo-1"
        );
        assert_eq!(source.kind(), SourceKind::Rest);
    }

    #[test]
    fn test_missing_base_url_rejected() {
        let err = RestSource::new("  ", None, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_field_unwraps_wrapped_body() {
        let body = json!({
            "user": { "id": "user-1", "email": "a@example.com", "name": "A", "role": "admin" }
        });
        let user: User = field(body, "user").unwrap();
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn test_field_missing_key() {
        let err = field::<User>(json!({ "users": [] }), "user").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_analysis_result_without_analysis_field_fails() {
        let path = "/functional-requirements/fr-1/analyze";
        let err = analysis_result(Ok(Some(json!({ "status": "queued" }))), path).unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(_)));

        let err = analysis_result(Ok(None), path).unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(msg) if msg.contains(path)));
    }

    #[test]
    fn test_analysis_result_malformed_analysis_fails() {
        let body = json!({ "analysis": { "id": "impact-1", "totalAPIs": "many" } });
        let err = analysis_result(Ok(Some(body)), "/impact-analyses/impact-1/rerun").unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(_)));

        let garbage = serde_json::from_str::<Value>("<html>502</html>").unwrap_err();
        let err = analysis_result(Err(Error::Json(garbage)), "/impact-analyses/impact-1/rerun")
            .unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(_)));
    }

    #[test]
    fn test_analysis_result_passes_backend_rejections_through() {
        let path = "/functional-requirements/fr-9/analyze";
        let err = analysis_result(Err(Error::not_found("resource", path)), path).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = analysis_result(Err(Error::Validation("no surface".to_string())), path)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_analysis_result_unwraps_analysis() {
        let body = json!({ "analysis": {
            "id": "impact-1",
            "frId": "fr-1",
            "repositoryId": "repo-1",
            "analyzedAt": "2024-10-16T09:00:00Z",
            "totalImpactedAPIs": 0,
            "totalAPIs": 1,
            "affectedModules": 0,
            "criticalityLevel": "minor",
            "affectedChannels": []
        }});
        let analysis = analysis_result(Ok(Some(body)), "/impact-analyses/impact-1/rerun").unwrap();
        assert_eq!(analysis.fr_id, "fr-1");
        assert!(analysis.narrative_report.is_none());
    }

    #[test]
    fn test_error_message_prefers_json_message() {
        assert_eq!(error_message(r#"{"message":"title is required"}"#), "title is required");
        assert_eq!(error_message("Bad Request\n"), "Bad Request");
    }
}
