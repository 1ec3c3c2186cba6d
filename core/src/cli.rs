use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::source::SourceKind;

#[derive(Parser, Debug)]
#[command(
    name = "impact-core",
    about = "Track functional requirements and the APIs they impact"
)]
pub struct Cli {
    /// Workspace directory holding impact.toml and the .impact/ database
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Data source to use, overriding config and IMPACT_SOURCE
    #[arg(long, global = true, value_enum)]
    pub source: Option<SourceKind>,

    /// Base URL of the rest backend
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Acting user, by email or id ("me" resolves the token owner on rest)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Show attached narratives in place of generated reports
    #[arg(long, global = true)]
    pub prefer_narrative: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summary counts for the acting user
    Dashboard,

    /// List users
    Users,

    /// Create a user
    AddUser {
        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,

        /// admin, developer or ba
        #[arg(long)]
        role: String,
    },

    /// List repositories
    Repos,

    /// Register a repository
    AddRepo {
        #[arg(long)]
        name: String,

        #[arg(long)]
        git_url: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Linked developer user id (repeatable)
        #[arg(long = "developer")]
        developers: Vec<String>,

        /// Linked business analyst user id (repeatable)
        #[arg(long = "ba")]
        bas: Vec<String>,
    },

    /// Replace a repository's details
    UpdateRepo {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        git_url: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long = "developer")]
        developers: Vec<String>,

        #[arg(long = "ba")]
        bas: Vec<String>,
    },

    /// Delete a repository with its requirements and analyses
    DeleteRepo {
        #[arg(long)]
        id: String,
    },

    /// Dependency graph of a repository
    Deps {
        #[arg(long)]
        repo: String,
    },

    /// Register the API surface (JSON channel tree) analyses trace against
    RegisterSurface {
        #[arg(long)]
        repo: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// List functional requirements
    Frs {
        #[arg(long)]
        repo: Option<String>,
    },

    /// Create a functional requirement
    AddFr {
        #[arg(long)]
        repo: String,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Reference to the requirement document
        #[arg(long)]
        file_url: Option<String>,
    },

    /// Edit a functional requirement
    UpdateFr {
        #[arg(long)]
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        file_url: Option<String>,

        /// draft, under-review or completed
        #[arg(long)]
        status: Option<String>,
    },

    /// Delete a functional requirement and its analyses
    DeleteFr {
        #[arg(long)]
        id: String,
    },

    /// Comment on a functional requirement
    Comment {
        #[arg(long)]
        fr: String,

        #[arg(long)]
        content: String,
    },

    /// Run an impact analysis for a functional requirement
    Analyze {
        #[arg(long)]
        fr: String,
    },

    /// Run an existing analysis again
    Rerun {
        #[arg(long)]
        analysis: String,
    },

    /// Current impact analysis of a functional requirement
    ShowAnalysis {
        #[arg(long)]
        fr: String,
    },

    /// All analyses of a functional requirement, newest first
    History {
        #[arg(long)]
        fr: String,
    },

    /// Markdown report of the current analysis
    Report {
        #[arg(long)]
        fr: String,
    },

    /// Attach a narrative report read from a file
    AttachNarrative {
        #[arg(long)]
        analysis: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Check whether a role may perform an action
    Can {
        #[arg(long)]
        role: String,

        #[arg(long)]
        action: String,
    },

    /// Load demo data into an empty workspace database
    Seed,
}
