//! Role-based access policy.
//!
//! A single lookup table decides what each role may do. Call sites query it
//! through [`is_allowed`] or the fail-closed [`authorize`]; nothing derives a
//! permission from anywhere else. Any pair missing from the table is denied.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ViewDashboard,
    ManageRepositories,
    ManageUsers,
    EditRequirement,
    DeleteRequirement,
    TriggerAnalysis,
    ViewAnalysis,
    Comment,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::ViewDashboard,
        Action::ManageRepositories,
        Action::ManageUsers,
        Action::EditRequirement,
        Action::DeleteRequirement,
        Action::TriggerAnalysis,
        Action::ViewAnalysis,
        Action::Comment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::ViewDashboard => "view-dashboard",
            Action::ManageRepositories => "manage-repositories",
            Action::ManageUsers => "manage-users",
            Action::EditRequirement => "edit-requirement",
            Action::DeleteRequirement => "delete-requirement",
            Action::TriggerAnalysis => "trigger-analysis",
            Action::ViewAnalysis => "view-analysis",
            Action::Comment => "comment",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown action '{s}'")))
    }
}

/// (action, admin, developer, ba)
const TABLE: &[(Action, bool, bool, bool)] = &[
    (Action::ViewDashboard, true, true, true),
    (Action::ManageRepositories, true, true, false),
    (Action::ManageUsers, true, false, false),
    (Action::EditRequirement, true, false, true),
    (Action::DeleteRequirement, true, false, true),
    (Action::TriggerAnalysis, false, false, true),
    (Action::ViewAnalysis, true, true, true),
    (Action::Comment, true, true, true),
];

pub fn is_allowed(role: Role, action: Action) -> bool {
    TABLE
        .iter()
        .find(|(a, ..)| *a == action)
        .map(|&(_, admin, developer, ba)| match role {
            Role::Admin => admin,
            Role::Developer => developer,
            Role::Ba => ba,
        })
        .unwrap_or(false)
}

pub fn authorize(role: Role, action: Action) -> Result<()> {
    if is_allowed(role, action) {
        Ok(())
    } else {
        tracing::debug!(role = %role, action = %action, "denied by policy");
        Err(Error::Authorization { role, action })
    }
}
