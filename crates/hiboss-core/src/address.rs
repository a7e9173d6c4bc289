use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A tagged envelope endpoint: either an agent inbox or a chat channel.
///
/// Canonical string forms:
///   `agent:<name>`
///   `channel:<adapter>:<chat-id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Address {
    Agent(String),
    Channel { adapter: String, chat_id: String },
}

impl Address {
    pub fn agent(name: impl Into<String>) -> Self {
        Address::Agent(name.into())
    }

    pub fn channel(adapter: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Address::Channel {
            adapter: adapter.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Address::Agent(_))
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Address::Channel { .. })
    }

    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Address::Agent(name) => Some(name),
            _ => None,
        }
    }

    pub fn format(&self) -> String {
        match self {
            Address::Agent(name) => format!("agent:{name}"),
            Address::Channel { adapter, chat_id } => format!("channel:{adapter}:{chat_id}"),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ErrorKind> {
        if let Some(name) = s.strip_prefix("agent:") {
            if name.is_empty() {
                return Err(ErrorKind::InvalidParams(format!(
                    "empty agent name in address: {s}"
                )));
            }
            return Ok(Address::Agent(name.to_string()));
        }
        if let Some(rest) = s.strip_prefix("channel:") {
            let (adapter, chat_id) = rest.split_once(':').ok_or_else(|| {
                ErrorKind::InvalidParams(format!("malformed channel address: {s}"))
            })?;
            if adapter.is_empty() || chat_id.is_empty() {
                return Err(ErrorKind::InvalidParams(format!(
                    "malformed channel address: {s}"
                )));
            }
            return Ok(Address::Channel {
                adapter: adapter.to_string(),
                chat_id: chat_id.to_string(),
            });
        }
        Err(ErrorKind::InvalidParams(format!(
            "address must start with 'agent:' or 'channel:': {s}"
        )))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.format()
    }
}

impl TryFrom<String> for Address {
    type Error = ErrorKind;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::parse(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_agent() {
        let a = Address::agent("nex");
        assert_eq!(a.format(), "agent:nex");
        assert_eq!(Address::parse("agent:nex").unwrap(), a);
    }

    #[test]
    fn roundtrip_channel_with_negative_chat_id() {
        let a = Address::channel("telegram", "-100123");
        assert_eq!(a.format(), "channel:telegram:-100123");
        assert_eq!(Address::parse("channel:telegram:-100123").unwrap(), a);
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(Address::parse("user:bob").is_err());
    }

    #[test]
    fn rejects_empty_agent_name() {
        assert!(Address::parse("agent:").is_err());
    }
}
