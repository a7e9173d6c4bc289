use uuid::Uuid;

/// Generate a fresh lowercase-hex UUID (v4), e.g. `f3b1...`.
///
/// Short forms used for id resolution (agent.set, cron.enable, ...) are any
/// prefix of at least 8 hex characters — which the 8-4-4-4-12 UUID layout
/// satisfies naturally at the first hyphen.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// True if `prefix` is a syntactically valid short-id prefix: at least 8
/// lowercase hex characters (hyphens are tolerated and stripped before the
/// length check, matching how a user would copy a truncated id).
pub fn is_valid_id_prefix(prefix: &str) -> bool {
    let stripped: String = prefix.chars().filter(|c| *c != '-').collect();
    stripped.len() >= 8 && stripped.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_prefixes_of_themselves() {
        let id = new_id();
        assert!(is_valid_id_prefix(&id));
        assert!(is_valid_id_prefix(&id[..8]));
    }

    #[test]
    fn short_prefix_rejected() {
        assert!(!is_valid_id_prefix("abc123"));
    }

    #[test]
    fn non_hex_rejected() {
        assert!(!is_valid_id_prefix("zzzzzzzz"));
    }
}
