//! Principal resolution and operation-level authorization.

pub mod policy;
pub mod principal;

use hiboss_core::ErrorKind;
use hiboss_store::Store;

pub use policy::PermissionPolicy;
pub use principal::Principal;

/// Resolve the principal behind a bearer token: boss if it matches the
/// stored boss hash, else the agent whose token hash matches, else
/// unauthorized.
pub fn resolve_principal(store: &Store, token: &str) -> hiboss_core::Result<Principal> {
    if store
        .verify_boss_token(token)
        .map_err(hiboss_core::ErrorKind::from)?
    {
        return Ok(Principal::Boss);
    }
    if let Some(agent) = store
        .find_agent_by_token(token)
        .map_err(hiboss_core::ErrorKind::from)?
    {
        return Ok(Principal::Agent(agent));
    }
    Err(ErrorKind::Unauthorized("invalid token".to_string()))
}

/// `assertOperationAllowed`: fail unless the principal's
/// level is at least the operation's required level.
pub fn assert_operation_allowed(
    policy: &PermissionPolicy,
    operation: &str,
    principal: &Principal,
) -> hiboss_core::Result<()> {
    let required = policy.required_level(operation).unwrap_or(hiboss_core::types::PermissionLevel::Boss);
    if principal.level() >= required {
        Ok(())
    } else {
        Err(ErrorKind::Unauthorized(format!(
            "operation '{operation}' requires level >= {required}, principal has {}",
            principal.level()
        )))
    }
}

/// Require the principal to be able to act on `target` — itself (if an
/// agent token) or anything (if boss). Used for e.g. `agent.refresh`,
/// `agent.abort` where an agent may only act on its own name.
pub fn assert_may_act_on(principal: &Principal, target: &str) -> hiboss_core::Result<()> {
    if principal.may_act_on(target) {
        Ok(())
    } else {
        Err(ErrorKind::Unauthorized(format!(
            "principal may not act on resource '{target}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiboss_core::types::PermissionLevel;
    use std::collections::BTreeMap;

    #[test]
    fn boss_bypasses_any_required_level() {
        let policy = PermissionPolicy::compiled_default();
        assert!(assert_operation_allowed(&policy, "agent.delete", &Principal::Boss).is_ok());
    }

    #[test]
    fn restricted_agent_cannot_register_agents() {
        let store = Store::open_in_memory().unwrap();
        let (agent, _) = store
            .register_agent(hiboss_store::RegisterAgentInput {
                name: "nex".to_string(),
                description: None,
                workspace: None,
                provider: hiboss_core::types::Provider::Claude,
                model: None,
                reasoning_effort: None,
                permission_level: PermissionLevel::Restricted,
                session_policy: Default::default(),
                metadata: BTreeMap::new(),
            })
            .unwrap();
        let policy = PermissionPolicy::compiled_default();
        let err = assert_operation_allowed(&policy, "agent.register", &Principal::Agent(agent));
        assert!(err.is_err());
    }
}
