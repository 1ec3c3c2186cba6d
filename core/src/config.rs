//! Workspace configuration with layered resolution.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::SeverityOrder;
use crate::error::{Error, Result};
use crate::source::SourceKind;

pub const CONFIG_FILE: &str = "impact.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resolved configuration.
///
/// Resolution order (highest priority first):
/// 1. CLI flags
/// 2. Environment variables (`IMPACT_SOURCE`, `IMPACT_BASE_URL`, `IMPACT_TOKEN`)
/// 3. `impact.toml` in the workspace directory
/// 4. Compiled defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_source: SourceKind,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub severity_order: SeverityOrder,
    pub prefer_narrative: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_source: SourceKind::default(),
            base_url: None,
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            severity_order: SeverityOrder::default(),
            prefer_narrative: false,
        }
    }
}

/// Shape of `impact.toml`. Every key is optional; unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    data_source: Option<SourceKind>,
    base_url: Option<String>,
    token: Option<String>,
    timeout_secs: Option<u64>,
    severity_order: Option<SeverityOrder>,
    prefer_narrative: Option<bool>,
}

/// CLI override arguments that can be applied to a config.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub data_source: Option<SourceKind>,
    pub base_url: Option<String>,
    pub prefer_narrative: Option<bool>,
}

impl Config {
    pub fn load(workspace: &Path, cli: &CliOverrides) -> Result<Self> {
        Self::load_with_env(workspace, cli, |key| std::env::var(key).ok())
    }

    fn load_with_env(
        workspace: &Path,
        cli: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        let path = workspace.join(CONFIG_FILE);
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let file = parse_file(&content, &path.display().to_string())?;
            config.merge(file);
        }

        config.apply_env(env)?;

        if let Some(kind) = cli.data_source {
            config.data_source = kind;
        }
        if let Some(url) = &cli.base_url {
            config.base_url = Some(url.clone());
        }
        if let Some(prefer) = cli.prefer_narrative {
            config.prefer_narrative = prefer;
        }

        config.validate()?;
        tracing::debug!(source = ?config.data_source, order = %config.severity_order, "resolved config");
        Ok(config)
    }

    /// Parse a config from TOML text on top of the defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config = Self::default();
        config.merge(parse_file(text, "<string>")?);
        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn merge(&mut self, file: ConfigFile) {
        if let Some(kind) = file.data_source {
            self.data_source = kind;
        }
        if file.base_url.is_some() {
            self.base_url = file.base_url;
        }
        if file.token.is_some() {
            self.token = file.token;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout_secs = secs;
        }
        if let Some(order) = file.severity_order {
            self.severity_order = order;
        }
        if let Some(prefer) = file.prefer_narrative {
            self.prefer_narrative = prefer;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(kind) = env("IMPACT_SOURCE") {
            self.data_source = kind.parse().map_err(|e: Error| Error::Config {
                path: "IMPACT_SOURCE".to_string(),
                message: e.to_string(),
            })?;
        }
        if let Some(url) = env("IMPACT_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(token) = env("IMPACT_TOKEN") {
            self.token = Some(token);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::Config {
                path: "timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.data_source == SourceKind::Rest && self.base_url.is_none() {
            return Err(Error::Config {
                path: "base_url".to_string(),
                message: "the rest data source needs a base URL".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_file(text: &str, path: &str) -> Result<ConfigFile> {
    toml::from_str(text).map_err(|e| Error::Config {
        path: path.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Criticality;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), &CliOverrides::default(), no_env).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.data_source, SourceKind::Sqlite);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_file_sets_severity_order() {
        let config = Config::from_toml(
            "severity_order = \"support>major>minor\"\nprefer_narrative = true\n",
        )
        .unwrap();
        assert_eq!(
            config.severity_order,
            SeverityOrder::new([Criticality::Support, Criticality::Major, Criticality::Minor])
                .unwrap()
        );
        assert!(config.prefer_narrative);
    }

    #[test]
    fn test_invalid_toml_names_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "timeout_secs = \"soon\"").unwrap();
        let err = Config::load_with_env(dir.path(), &CliOverrides::default(), no_env).unwrap_err();
        match err {
            Error::Config { path, .. } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_layer_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "data_source = \"rest\"\nbase_url = \"https://file.example.com\"\ntoken = \"file\"\n",
        )
        .unwrap();
        let env = |key: &str| match key {
            "IMPACT_TOKEN" => Some("env".to_string()),
            "IMPACT_BASE_URL" => Some("https://env.example.com".to_string()),
            _ => None,
        };
        let cli = CliOverrides {
            base_url: Some("https://cli.example.com".to_string()),
            ..Default::default()
        };
        let config = Config::load_with_env(dir.path(), &cli, env).unwrap();
        assert_eq!(config.data_source, SourceKind::Rest);
        assert_eq!(config.token.as_deref(), Some("env"));
        assert_eq!(config.base_url.as_deref(), Some("https://cli.example.com"));
    }

    #[test]
    fn test_bad_env_source() {
        let dir = tempfile::tempdir().unwrap();
        let env = |key: &str| (key == "IMPACT_SOURCE").then(|| "postgres".to_string());
        let err = Config::load_with_env(dir.path(), &CliOverrides::default(), env).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rest_without_url_rejected() {
        let err = Config::from_toml("data_source = \"rest\"").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
