//! Deny-by-default sender filtering.

/// Return `true` when the sender may talk to the agent.
///
/// `allow_users` entries match either the Telegram username (with or without
/// a leading `@`) or the numeric user id. An empty list allows nobody — a
/// personal agent has no anonymous audience.
pub fn is_allowed(allow_users: &[String], username: &str, user_id: &str) -> bool {
    allow_users.iter().any(|entry| {
        let entry = entry.trim_start_matches('@');
        (!username.is_empty() && entry.eq_ignore_ascii_case(username)) || entry == user_id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_list_denies_everyone() {
        assert!(!is_allowed(&[], "alice", "42"));
    }

    #[test]
    fn username_matches_case_insensitively_with_or_without_at() {
        let list = allow(&["@Alice"]);
        assert!(is_allowed(&list, "alice", "42"));
        assert!(is_allowed(&list, "ALICE", "42"));
        assert!(!is_allowed(&list, "bob", "43"));
    }

    #[test]
    fn numeric_id_matches_exactly() {
        let list = allow(&["42"]);
        assert!(is_allowed(&list, "", "42"));
        assert!(!is_allowed(&list, "", "421"));
    }
}
