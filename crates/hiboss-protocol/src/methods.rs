// Canonical JSON-RPC method names. Handler tables in
// `hiboss-daemon` are keyed by these constants so a typo in a match arm
// fails to compile rather than silently 404ing at runtime.

pub const DAEMON_PING: &str = "daemon.ping";
pub const DAEMON_STATUS: &str = "daemon.status";

pub const SETUP_CHECK: &str = "setup.check";
pub const SETUP_EXECUTE: &str = "setup.execute";
pub const BOSS_VERIFY: &str = "boss.verify";

pub const AGENT_REGISTER: &str = "agent.register";
pub const AGENT_LIST: &str = "agent.list";
pub const AGENT_STATUS: &str = "agent.status";
pub const AGENT_SET: &str = "agent.set";
pub const AGENT_DELETE: &str = "agent.delete";
pub const AGENT_BIND: &str = "agent.bind";
pub const AGENT_UNBIND: &str = "agent.unbind";
pub const AGENT_REFRESH: &str = "agent.refresh";
pub const AGENT_ABORT: &str = "agent.abort";
pub const AGENT_SELF: &str = "agent.self";
pub const AGENT_SESSION_POLICY_SET: &str = "agent.session-policy.set";

pub const ENVELOPE_SEND: &str = "envelope.send";
pub const ENVELOPE_LIST: &str = "envelope.list";
pub const ENVELOPE_GET: &str = "envelope.get";
pub const REACTION_SET: &str = "reaction.set";

pub const CRON_CREATE: &str = "cron.create";
pub const CRON_LIST: &str = "cron.list";
pub const CRON_ENABLE: &str = "cron.enable";
pub const CRON_DISABLE: &str = "cron.disable";
pub const CRON_DELETE: &str = "cron.delete";

pub const MEMORY_REMEMBER: &str = "memory.remember";
pub const MEMORY_RECALL: &str = "memory.recall";
pub const MEMORY_CLEAR: &str = "memory.clear";

/// All methods that never require a prior `boss.verify`/agent registration
/// ( default policy) — used by the dispatcher to skip the
/// "daemon still in setup" gate.
pub const SETUP_EXEMPT: &[&str] = &[DAEMON_PING, DAEMON_STATUS, SETUP_CHECK, SETUP_EXECUTE];
