use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

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

const USER_COLUMNS: &str = "id, email, name, role";

const REPOSITORY_COLUMNS: &str = "id, name, description, git_url, linked_developers, linked_bas,
     created_at, last_analysis, total_apis, vulnerable_modules";

const REQUIREMENT_COLUMNS: &str =
    "id, repository_id, title, description, file_url, created_by, created_at, status";

const ANALYSIS_COLUMNS: &str = "a.id, a.fr_id, a.repository_id, a.analyzed_at,
     a.total_impacted_apis, a.total_apis, a.affected_modules, a.criticality_level,
     a.channels, a.narrative_report";

/// Records persisted in a SQLite database, one per workspace.
pub struct SqliteSource {
    conn: Connection,
    order: SeverityOrder,
}

fn text_enum<T: FromStr<Err = Error>>(idx: usize, value: String) -> rusqlite::Result<T> {
    value
        .parse()
        .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(idx: usize, value: String) -> rusqlite::Result<T> {
    serde_json::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: text_enum(3, row.get(3)?)?,
    })
}

fn repository_from_row(row: &Row) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        git_url: row.get(3)?,
        linked_developers: json_column(4, row.get(4)?)?,
        linked_bas: json_column(5, row.get(5)?)?,
        created_at: row.get(6)?,
        last_analysis: row.get(7)?,
        total_apis: row.get(8)?,
        vulnerable_modules: row.get(9)?,
    })
}

fn requirement_from_row(row: &Row) -> rusqlite::Result<FunctionalRequirement> {
    Ok(FunctionalRequirement {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        file_url: row.get(4)?,
        created_by: row.get(5)?,
        created_at: row.get(6)?,
        status: text_enum(7, row.get(7)?)?,
        comments: Vec::new(),
    })
}

fn analysis_from_row(row: &Row) -> rusqlite::Result<ImpactAnalysis> {
    Ok(ImpactAnalysis {
        id: row.get(0)?,
        fr_id: row.get(1)?,
        repository_id: row.get(2)?,
        analyzed_at: row.get(3)?,
        total_impacted_apis: row.get(4)?,
        total_apis: row.get(5)?,
        affected_modules: row.get(6)?,
        criticality_level: text_enum(7, row.get(7)?)?,
        affected_channels: json_column(8, row.get(8)?)?,
        narrative_report: row.get(9)?,
    })
}

fn insert_analysis(conn: &Connection, analysis: &ImpactAnalysis) -> Result<()> {
    conn.execute(
        "INSERT INTO analyses (
            id, fr_id, repository_id, analyzed_at, total_impacted_apis, total_apis,
            affected_modules, criticality_level, channels, narrative_report
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            analysis.id,
            analysis.fr_id,
            analysis.repository_id,
            analysis.analyzed_at,
            analysis.total_impacted_apis,
            analysis.total_apis,
            analysis.affected_modules,
            analysis.criticality_level.as_str(),
            to_json(&analysis.affected_channels)?,
            analysis.narrative_report,
        ],
    )?;
    Ok(())
}

/// Store `analysis` as the current one for its requirement.
fn commit_analysis(conn: &Connection, analysis: &ImpactAnalysis) -> Result<()> {
    insert_analysis(conn, analysis)?;
    conn.execute(
        "UPDATE requirements SET status = ?1, current_analysis_id = ?2 WHERE id = ?3",
        params![FrStatus::Analyzed.as_str(), analysis.id, analysis.fr_id],
    )?;
    conn.execute(
        "UPDATE repositories SET last_analysis = ?1 WHERE id = ?2",
        params![analysis.analyzed_at, analysis.repository_id],
    )?;
    Ok(())
}

impl SqliteSource {
    /// Open or create a SQLite database at the given path.
    /// Uses WAL mode for concurrent read performance.
    pub fn open(path: &Path, order: SeverityOrder) -> Result<Self> {
        let conn = Connection::open(path)?;
        let source = Self { conn, order };
        source.init()?;
        Ok(source)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory(order: SeverityOrder) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let source = Self { conn, order };
        source.init()?;
        Ok(source)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id    TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                name  TEXT NOT NULL,
                role  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS repositories (
                id                 TEXT PRIMARY KEY,
                name               TEXT NOT NULL,
                description        TEXT NOT NULL DEFAULT '',
                git_url            TEXT NOT NULL,
                linked_developers  TEXT NOT NULL DEFAULT '[]',
                linked_bas         TEXT NOT NULL DEFAULT '[]',
                created_at         TEXT NOT NULL,
                last_analysis      TEXT,
                total_apis         INTEGER,
                vulnerable_modules INTEGER
            );

            CREATE TABLE IF NOT EXISTS surfaces (
                repository_id TEXT PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
                channels      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dependency_graphs (
                repository_id TEXT PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
                nodes         TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS requirements (
                id                  TEXT PRIMARY KEY,
                repository_id       TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                title               TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                file_url            TEXT,
                created_by          TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'draft',
                current_analysis_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_requirements_repo
                ON requirements(repository_id);

            CREATE TABLE IF NOT EXISTS comments (
                id         TEXT PRIMARY KEY,
                fr_id      TEXT NOT NULL REFERENCES requirements(id) ON DELETE CASCADE,
                user_id    TEXT NOT NULL,
                user_name  TEXT NOT NULL,
                user_role  TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_comments_fr ON comments(fr_id);

            CREATE TABLE IF NOT EXISTS analyses (
                id                  TEXT PRIMARY KEY,
                fr_id               TEXT NOT NULL REFERENCES requirements(id) ON DELETE CASCADE,
                repository_id       TEXT NOT NULL,
                analyzed_at         TEXT NOT NULL,
                total_impacted_apis INTEGER NOT NULL,
                total_apis          INTEGER NOT NULL,
                affected_modules    INTEGER NOT NULL,
                criticality_level   TEXT NOT NULL,
                channels            TEXT NOT NULL,
                narrative_report    TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_analyses_fr ON analyses(fr_id);",
        )?;
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    /// Load demo records into an empty database. Returns false and writes
    /// nothing if the database already holds users.
    pub fn load_seed(&mut self, data: &SeedData) -> Result<bool> {
        if !self.is_empty()? {
            return Ok(false);
        }

        let tx = self.conn.transaction()?;
        for user in &data.users {
            tx.execute(
                "INSERT INTO users (id, email, name, role) VALUES (?1, ?2, ?3, ?4)",
                params![user.id, user.email, user.name, user.role.as_str()],
            )?;
        }
        for repo in &data.repositories {
            tx.execute(
                "INSERT INTO repositories (
                    id, name, description, git_url, linked_developers, linked_bas,
                    created_at, last_analysis, total_apis, vulnerable_modules
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    repo.id,
                    repo.name,
                    repo.description,
                    repo.git_url,
                    to_json(&repo.linked_developers)?,
                    to_json(&repo.linked_bas)?,
                    repo.created_at,
                    repo.last_analysis,
                    repo.total_apis,
                    repo.vulnerable_modules,
                ],
            )?;
        }
        for (repo_id, channels) in &data.surfaces {
            tx.execute(
                "INSERT INTO surfaces (repository_id, channels) VALUES (?1, ?2)",
                params![repo_id, to_json(channels)?],
            )?;
        }
        for (repo_id, nodes) in &data.dependencies {
            tx.execute(
                "INSERT INTO dependency_graphs (repository_id, nodes) VALUES (?1, ?2)",
                params![repo_id, to_json(nodes)?],
            )?;
        }
        for fr in &data.requirements {
            tx.execute(
                "INSERT INTO requirements (
                    id, repository_id, title, description, file_url, created_by, created_at, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    fr.id,
                    fr.repository_id,
                    fr.title,
                    fr.description,
                    fr.file_url,
                    fr.created_by,
                    fr.created_at,
                    fr.status.as_str(),
                ],
            )?;
            for c in &fr.comments {
                tx.execute(
                    "INSERT INTO comments (id, fr_id, user_id, user_name, user_role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![c.id, fr.id, c.user_id, c.user_name, c.user_role.as_str(), c.content, c.created_at],
                )?;
            }
        }
        for analysis in &data.analyses {
            commit_analysis(&tx, analysis)?;
        }
        tx.commit()?;

        tracing::info!(
            users = data.users.len(),
            repositories = data.repositories.len(),
            requirements = data.requirements.len(),
            "seeded workspace database"
        );
        Ok(true)
    }

    fn comments_for(&self, fr_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, user_name, user_role, content, created_at
             FROM comments WHERE fr_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![fr_id], |row| {
            Ok(Comment {
                id: row.get(0)?,
                user_id: row.get(1)?,
                user_name: row.get(2)?,
                user_role: text_enum(3, row.get(3)?)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn with_comments(&self, mut fr: FunctionalRequirement) -> Result<FunctionalRequirement> {
        fr.comments = self.comments_for(&fr.id)?;
        Ok(fr)
    }

    fn surface(&self, repository_id: &str) -> Result<Vec<AffectedChannel>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT channels FROM surfaces WHERE repository_id = ?1",
                params![repository_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }
}

impl DataSource for SqliteSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Sqlite
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY rowid"))?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn find_user(&self, key: &str) -> Result<User> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 OR email = ?1"),
                params![key],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("user", key))
    }

    fn create_user(&mut self, email: &str, name: &str, role: Role) -> Result<User> {
        if self.find_user(email).is_ok() {
            return Err(Error::Validation(format!("user '{email}' already exists")));
        }
        let user = User {
            id: new_id("user"),
            email: email.to_string(),
            name: name.to_string(),
            role,
        };
        self.conn.execute(
            "INSERT INTO users (id, email, name, role) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, user.name, user.role.as_str()],
        )?;
        Ok(user)
    }

    fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories ORDER BY rowid"
        ))?;
        let rows = stmt.query_map([], repository_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn get_repository(&self, id: &str) -> Result<Repository> {
        self.conn
            .query_row(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
                params![id],
                repository_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("repository", id))
    }

    fn create_repository(&mut self, draft: &RepositoryDraft) -> Result<Repository> {
        check_draft(draft)?;
        let id = new_id("repo");
        let created_at: DateTime<Utc> = Utc::now();
        self.conn.execute(
            "INSERT INTO repositories (id, name, description, git_url, linked_developers, linked_bas, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                draft.name,
                draft.description,
                draft.git_url,
                to_json(&draft.linked_developers)?,
                to_json(&draft.linked_bas)?,
                created_at,
            ],
        )?;
        self.get_repository(&id)
    }

    fn update_repository(&mut self, id: &str, draft: &RepositoryDraft) -> Result<Repository> {
        check_draft(draft)?;
        let changed = self.conn.execute(
            "UPDATE repositories
             SET name = ?1, description = ?2, git_url = ?3, linked_developers = ?4, linked_bas = ?5
             WHERE id = ?6",
            params![
                draft.name,
                draft.description,
                draft.git_url,
                to_json(&draft.linked_developers)?,
                to_json(&draft.linked_bas)?,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found("repository", id));
        }
        self.get_repository(id)
    }

    fn delete_repository(&mut self, id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(Error::not_found("repository", id));
        }
        Ok(())
    }

    fn dependencies(&self, repository_id: &str) -> Result<Vec<DependencyNode>> {
        self.get_repository(repository_id)?;
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT nodes FROM dependency_graphs WHERE repository_id = ?1",
                params![repository_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn register_surface(&mut self, repository_id: &str, channels: &[AffectedChannel]) -> Result<()> {
        validate::validate_channels(channels)?;
        self.get_repository(repository_id)?;
        let total_apis: u32 = channels
            .iter()
            .flat_map(|c| &c.applications)
            .flat_map(|a| &a.modules)
            .map(|m| m.apis.len() as u32)
            .sum();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO surfaces (repository_id, channels) VALUES (?1, ?2)",
            params![repository_id, to_json(channels)?],
        )?;
        tx.execute(
            "UPDATE repositories SET total_apis = ?1 WHERE id = ?2",
            params![total_apis, repository_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_requirements(&self, repository_id: Option<&str>) -> Result<Vec<FunctionalRequirement>> {
        let frs: Vec<FunctionalRequirement> = match repository_id {
            Some(repo) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {REQUIREMENT_COLUMNS} FROM requirements
                     WHERE repository_id = ?1 ORDER BY rowid"
                ))?;
                let rows = stmt.query_map(params![repo], requirement_from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {REQUIREMENT_COLUMNS} FROM requirements ORDER BY rowid"
                ))?;
                let rows = stmt.query_map([], requirement_from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        frs.into_iter().map(|fr| self.with_comments(fr)).collect()
    }

    fn get_requirement(&self, id: &str) -> Result<FunctionalRequirement> {
        let fr = self
            .conn
            .query_row(
                &format!("SELECT {REQUIREMENT_COLUMNS} FROM requirements WHERE id = ?1"),
                params![id],
                requirement_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("functional requirement", id))?;
        self.with_comments(fr)
    }

    fn create_requirement(
        &mut self,
        new: &NewRequirement,
        author: &User,
    ) -> Result<FunctionalRequirement> {
        check_new_requirement(new)?;
        self.get_repository(&new.repository_id)?;
        let id = new_id("fr");
        self.conn.execute(
            "INSERT INTO requirements (
                id, repository_id, title, description, file_url, created_by, created_at, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                new.repository_id,
                new.title,
                new.description,
                new.file_url,
                author.id,
                Utc::now(),
                FrStatus::Draft.as_str(),
            ],
        )?;
        self.get_requirement(&id)
    }

    fn update_requirement(
        &mut self,
        id: &str,
        patch: &RequirementPatch,
    ) -> Result<FunctionalRequirement> {
        let mut fr = self.get_requirement(id)?;
        patch.apply(&mut fr);
        self.conn.execute(
            "UPDATE requirements SET title = ?1, description = ?2, file_url = ?3, status = ?4
             WHERE id = ?5",
            params![fr.title, fr.description, fr.file_url, fr.status.as_str(), id],
        )?;
        Ok(fr)
    }

    fn delete_requirement(&mut self, id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM requirements WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(Error::not_found("functional requirement", id));
        }
        Ok(())
    }

    fn add_comment(&mut self, fr_id: &str, author: &User, content: &str) -> Result<Comment> {
        self.get_requirement(fr_id)?;
        let comment = Comment {
            id: new_id("comment"),
            user_id: author.id.clone(),
            user_name: author.name.clone(),
            user_role: author.role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO comments (id, fr_id, user_id, user_name, user_role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                comment.id,
                fr_id,
                comment.user_id,
                comment.user_name,
                comment.user_role.as_str(),
                comment.content,
                comment.created_at,
            ],
        )?;
        Ok(comment)
    }

    fn run_analysis(&mut self, fr_id: &str) -> Result<ImpactAnalysis> {
        let fr = self.get_requirement(fr_id)?;
        let surface = self.surface(&fr.repository_id)?;
        let analysis = tracer::build_analysis(&fr, &surface, new_id("impact"), Utc::now(), &self.order)?;

        let tx = self.conn.transaction()?;
        commit_analysis(&tx, &analysis)?;
        tx.commit()?;
        Ok(analysis)
    }

    fn current_analysis(&self, fr_id: &str) -> Result<Option<ImpactAnalysis>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {ANALYSIS_COLUMNS} FROM analyses a
                     JOIN requirements r ON r.current_analysis_id = a.id
                     WHERE r.id = ?1"
                ),
                params![fr_id],
                analysis_from_row,
            )
            .optional()?)
    }

    fn list_analyses(&self, fr_id: &str) -> Result<Vec<ImpactAnalysis>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM analyses a
             WHERE a.fr_id = ?1 ORDER BY a.analyzed_at DESC, a.rowid DESC"
        ))?;
        let rows = stmt.query_map(params![fr_id], analysis_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn get_analysis(&self, id: &str) -> Result<ImpactAnalysis> {
        self.conn
            .query_row(
                &format!("SELECT {ANALYSIS_COLUMNS} FROM analyses a WHERE a.id = ?1"),
                params![id],
                analysis_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("impact analysis", id))
    }

    fn attach_narrative(&mut self, analysis_id: &str, narrative: &str) -> Result<ImpactAnalysis> {
        let changed = self.conn.execute(
            "UPDATE analyses SET narrative_report = ?1 WHERE id = ?2",
            params![narrative, analysis_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("impact analysis", analysis_id));
        }
        self.get_analysis(analysis_id)
    }
}
