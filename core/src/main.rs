use clap::Parser;
use std::process;

use impact_core::cli::{Cli, Command};
use impact_core::config::{CliOverrides, Config};
use impact_core::error::Error;
use impact_core::policy::{self, Action};
use impact_core::types::{
    AffectedChannel, FrStatus, NewRequirement, PermissionResponse, RepositoryDraft, RequirementPatch, Role,
};
use impact_core::{logging, validate};

/// Run the requested command, returning what goes to stdout: a JSON document
/// for every command except `report`, which prints Markdown.
fn run() -> Result<String, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // a pure policy lookup: no config, no data source
    if let Command::Can { role, action } = &cli.command {
        let role: Role = role.parse()?;
        let action: Action = action.parse()?;
        let response = PermissionResponse {
            role,
            action: action.to_string(),
            allowed: policy::is_allowed(role, action),
        };
        return Ok(serde_json::to_string(&response)?);
    }

    let overrides = CliOverrides {
        data_source: cli.source,
        base_url: cli.base_url.clone(),
        prefer_narrative: cli.prefer_narrative.then_some(true),
    };
    let config = Config::load(&cli.workspace, &overrides)?;

    if let Command::Seed = cli.command {
        let response = impact_core::seed_workspace(&cli.workspace, &config)?;
        return Ok(serde_json::to_string(&response)?);
    }

    let user = cli
        .user
        .as_deref()
        .ok_or_else(|| Error::Validation("--user is required for this command".to_string()))?;
    let mut session = impact_core::open_session(&cli.workspace, &config, user)?;

    let json = match cli.command {
        Command::Dashboard => serde_json::to_string(&session.dashboard()?)?,
        Command::Users => serde_json::to_string(&session.users()?)?,
        Command::AddUser { email, name, role } => {
            serde_json::to_string(&session.add_user(&email, &name, role.parse()?)?)?
        }
        Command::Repos => serde_json::to_string(&session.repositories()?)?,
        Command::AddRepo {
            name,
            git_url,
            description,
            developers,
            bas,
        } => {
            let draft = RepositoryDraft {
                name,
                description,
                git_url,
                linked_developers: developers,
                linked_bas: bas,
            };
            serde_json::to_string(&session.add_repository(&draft)?)?
        }
        Command::UpdateRepo {
            id,
            name,
            git_url,
            description,
            developers,
            bas,
        } => {
            let draft = RepositoryDraft {
                name,
                description,
                git_url,
                linked_developers: developers,
                linked_bas: bas,
            };
            serde_json::to_string(&session.update_repository(&id, &draft)?)?
        }
        Command::DeleteRepo { id } => serde_json::to_string(&session.delete_repository(&id)?)?,
        Command::Deps { repo } => serde_json::to_string(&session.dependencies(&repo)?)?,
        Command::RegisterSurface { repo, file } => {
            let channels: Vec<AffectedChannel> = validate::parse(&std::fs::read_to_string(&file)?)?;
            serde_json::to_string(&session.register_surface(&repo, &channels)?)?
        }
        Command::Frs { repo } => serde_json::to_string(&session.requirements(repo.as_deref())?)?,
        Command::AddFr {
            repo,
            title,
            description,
            file_url,
        } => {
            let new = NewRequirement {
                repository_id: repo,
                title,
                description,
                file_url,
            };
            serde_json::to_string(&session.create_requirement(&new)?)?
        }
        Command::UpdateFr {
            id,
            title,
            description,
            file_url,
            status,
        } => {
            let status: Option<FrStatus> = status.map(|s| s.parse()).transpose()?;
            let patch = RequirementPatch {
                title,
                description,
                file_url,
                status,
            };
            serde_json::to_string(&session.update_requirement(&id, &patch)?)?
        }
        Command::DeleteFr { id } => serde_json::to_string(&session.delete_requirement(&id)?)?,
        Command::Comment { fr, content } => {
            serde_json::to_string(&session.comment(&fr, &content)?)?
        }
        Command::Analyze { fr } => serde_json::to_string(&session.analyze(&fr)?)?,
        Command::Rerun { analysis } => serde_json::to_string(&session.rerun(&analysis)?)?,
        Command::ShowAnalysis { fr } => serde_json::to_string(&session.impact_analysis(&fr)?)?,
        Command::History { fr } => serde_json::to_string(&session.history(&fr)?)?,
        Command::Report { fr } => session.report(&fr)?,
        Command::AttachNarrative { analysis, file } => {
            let narrative = std::fs::read_to_string(&file)?;
            serde_json::to_string(&session.attach_narrative(&analysis, &narrative)?)?
        }
        Command::Can { .. } | Command::Seed => unreachable!("handled before opening a session"),
    };
    Ok(json)
}

fn main() {
    logging::init_tracing();

    match run() {
        Ok(output) => {
            println!("{output}");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
