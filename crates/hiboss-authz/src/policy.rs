use std::collections::BTreeMap;

use hiboss_core::types::PermissionLevel;
use hiboss_store::Store;

/// Permission policy v1: operation name -> minimum required level
///. A default table is compiled in; entries in the
/// `permission_policy` config key override it.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    levels: BTreeMap<String, PermissionLevel>,
}

impl PermissionPolicy {
    pub fn compiled_default() -> Self {
        use PermissionLevel::*;
        let mut levels = BTreeMap::new();
        let mut set = |op: &str, level: PermissionLevel| {
            levels.insert(op.to_string(), level);
        };

        set("daemon.ping", Restricted);
        set("daemon.status", Restricted);

        set("envelope.send", Restricted);
        set("envelope.list", Restricted);
        set("envelope.get", Restricted);
        set("reaction.set", Restricted);

        set("agent.self", Restricted);
        set("agent.refresh", Restricted);
        set("agent.abort", Restricted);

        set("agent.status", Standard);
        set("agent.list", Standard);

        set("agent.session-policy.set", Privileged);

        set("cron.create", Privileged);
        set("cron.list", Privileged);
        set("cron.enable", Privileged);
        set("cron.disable", Privileged);
        set("cron.delete", Privileged);

        set("memory.remember", Standard);
        set("memory.recall", Standard);
        set("memory.clear", Standard);

        set("setup.check", Boss);
        set("setup.execute", Boss);
        set("boss.verify", Boss);

        set("agent.register", Boss);
        set("agent.set", Boss);
        set("agent.delete", Boss);
        set("agent.bind", Boss);
        set("agent.unbind", Boss);

        Self { levels }
    }

    /// Apply any override rows found in `config.permission_policy` (a JSON
    /// object of op -> level string) on top of the compiled default.
    pub fn load(store: &Store) -> Self {
        let mut policy = Self::compiled_default();
        if let Ok(Some(raw)) = store.get_config(hiboss_core::config::keys::PERMISSION_POLICY) {
            if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(&raw) {
                for (op, v) in map {
                    if let Some(level_str) = v.as_str() {
                        if let Ok(level) = level_str.parse::<PermissionLevel>() {
                            policy.levels.insert(op, level);
                        }
                    }
                }
            }
        }
        policy
    }

    pub fn required_level(&self, operation: &str) -> Option<PermissionLevel> {
        self.levels.get(operation).copied()
    }
}
