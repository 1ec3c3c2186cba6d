pub mod aggregate;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod report;
pub mod seed;
pub mod session;
pub mod source;
pub mod tracer;
pub mod tree;
pub mod types;
pub mod validate;

use std::path::{Path, PathBuf};

use config::Config;
use error::{Error, Result};
use session::Session;
use source::{DataSource, MemorySource, RestSource, SourceKind, SqliteSource};
use types::SeedResponse;

fn db_path(workspace: &Path) -> Result<PathBuf> {
    let impact_dir = workspace.join(".impact");
    std::fs::create_dir_all(&impact_dir)?;
    Ok(impact_dir.join("impact.db"))
}

/// Build the data source named by `config`. This is the only place that
/// looks at the source kind.
pub fn open_source(workspace: &Path, config: &Config) -> Result<Box<dyn DataSource>> {
    let order = config.severity_order;
    let source: Box<dyn DataSource> = match config.data_source {
        SourceKind::Memory => Box::new(MemorySource::from_seed(seed::demo(&order)?, order)),
        SourceKind::Sqlite => Box::new(SqliteSource::open(&db_path(workspace)?, order)?),
        SourceKind::Rest => {
            let base_url = config.base_url.as_deref().unwrap_or_default();
            Box::new(RestSource::new(
                base_url,
                config.token.clone(),
                config.timeout(),
            )?)
        }
    };
    Ok(source)
}

/// Open a session for the user identified by `user_key` (id or email).
pub fn open_session(workspace: &Path, config: &Config, user_key: &str) -> Result<Session> {
    let source = open_source(workspace, config)?;
    Session::open(
        source,
        user_key,
        config.severity_order,
        config.prefer_narrative,
    )
}

/// Fill an empty workspace database with the demo records.
pub fn seed_workspace(workspace: &Path, config: &Config) -> Result<SeedResponse> {
    if config.data_source != SourceKind::Sqlite {
        return Err(Error::Validation(format!(
            "only the sqlite data source can be seeded, not {:?}",
            config.data_source
        )));
    }
    let path = db_path(workspace)?;
    let mut db = SqliteSource::open(&path, config.severity_order)?;
    let data = seed::demo(&config.severity_order)?;
    let seeded = db.load_seed(&data)?;
    Ok(SeedResponse {
        database: path.display().to_string(),
        seeded,
        users: data.users.len() as u32,
        repositories: data.repositories.len() as u32,
        requirements: data.requirements.len() as u32,
    })
}
