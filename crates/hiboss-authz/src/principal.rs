use hiboss_core::types::{Agent, PermissionLevel};

/// The resolved identity behind a bearer token.
#[derive(Debug, Clone)]
pub enum Principal {
    Boss,
    Agent(Agent),
}

impl Principal {
    /// Boss implicitly has the top level; an agent's effective level is its
    /// configured `permissionLevel`.
    pub fn level(&self) -> PermissionLevel {
        match self {
            Principal::Boss => PermissionLevel::Boss,
            Principal::Agent(agent) => agent.permission_level,
        }
    }

    pub fn is_boss(&self) -> bool {
        matches!(self, Principal::Boss)
    }

    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Principal::Boss => None,
            Principal::Agent(agent) => Some(agent.name.as_str()),
        }
    }

    /// True when this principal may act on `target` — itself (if an agent)
    /// or anything (if boss).
    pub fn may_act_on(&self, target: &str) -> bool {
        match self {
            Principal::Boss => true,
            Principal::Agent(agent) => agent.name == target,
        }
    }
}
