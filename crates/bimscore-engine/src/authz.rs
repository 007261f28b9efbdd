//! Role guard applied before any I/O.

use bimscore_model::{Result, Role, WorkflowError};
use serde::{Deserialize, Serialize};

/// Who is acting, and in which role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateEvidence,
    UpdateEvidence,
    SubmitEvidence,
    Review,
    Decide,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateEvidence => "create evidence",
            Action::UpdateEvidence => "update evidence",
            Action::SubmitEvidence => "submit evidence",
            Action::Review => "review evidence",
            Action::Decide => "decide on a period",
        }
    }

    pub fn permits(&self, role: Role) -> bool {
        match self {
            Action::CreateEvidence | Action::UpdateEvidence | Action::SubmitEvidence => {
                matches!(role, Role::Coordinator | Role::Admin)
            }
            Action::Review => matches!(role, Role::Reviewer | Role::Admin),
            Action::Decide => matches!(role, Role::Manager | Role::Admin),
        }
    }
}

pub fn authorize(actor: &Actor, action: Action) -> Result<()> {
    if actor.id.trim().is_empty() {
        return Err(WorkflowError::validation("actor id is required"));
    }
    if action.permits(actor.role) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden {
            role: actor.role,
            action: action.as_str(),
        })
    }
}
