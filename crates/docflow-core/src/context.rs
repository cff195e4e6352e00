//! Caller identity and role capabilities.

use crate::circuit::Step;
use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role held by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Administers circuits and may act on any step.
    Admin,
    /// Acts on steps that are unassigned or assigned to this role.
    FullUser,
    /// Read-only participant.
    SimpleUser,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "Admin"),
            Role::FullUser => write!(f, "FullUser"),
            Role::SimpleUser => write!(f, "SimpleUser"),
        }
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Role::Admin),
            "FullUser" => Ok(Role::FullUser),
            "SimpleUser" => Ok(Role::SimpleUser),
            other => Err(WorkflowError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Returns `true` if `role` may act on documents positioned at `step`.
pub fn can_perform_action(role: Role, step: &Step) -> bool {
    match role {
        Role::Admin => true,
        Role::SimpleUser => false,
        Role::FullUser => step.responsible_role.map_or(true, |r| r == role),
    }
}

/// Explicit identity of the caller, passed into every engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Recorded as `processed_by` in history.
    pub user: String,
    pub role: Role,
}

impl CallerContext {
    pub fn new(user: impl Into<String>, role: Role) -> Self {
        Self {
            user: user.into(),
            role,
        }
    }

    /// Shorthand for an administrator.
    pub fn admin(user: impl Into<String>) -> Self {
        Self::new(user, Role::Admin)
    }

    pub fn can_act_on(&self, step: &Step) -> bool {
        can_perform_action(self.role, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{CircuitId, StepId};

    fn step(responsible_role: Option<Role>) -> Step {
        Step {
            id: StepId::new(1),
            key: "CR-0001-ST01".to_string(),
            circuit_id: CircuitId::new(1),
            title: "Review".to_string(),
            description: String::new(),
            order_index: 0,
            responsible_role,
            is_final_step: false,
        }
    }

    #[test]
    fn test_capabilities() {
        assert!(can_perform_action(Role::Admin, &step(Some(Role::FullUser))));
        assert!(can_perform_action(Role::FullUser, &step(None)));
        assert!(can_perform_action(Role::FullUser, &step(Some(Role::FullUser))));
        assert!(!can_perform_action(Role::FullUser, &step(Some(Role::Admin))));
        assert!(!can_perform_action(Role::SimpleUser, &step(None)));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("FullUser".parse::<Role>(), Ok(Role::FullUser));
        assert!(matches!(
            "Guest".parse::<Role>(),
            Err(WorkflowError::Validation(_))
        ));
        assert_eq!(Role::SimpleUser.to_string(), "SimpleUser");
    }
}
