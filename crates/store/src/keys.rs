//! Canonical key shapes.
//!
//! Call sites never hand-format store keys; everything per-user goes through
//! these builders so user identifiers are URL-encoded exactly once.

/// Per-user encrypted vault document.
#[must_use]
pub fn vault(user_id: &str) -> String {
    format!("users/{}/vault.json", urlencoding::encode(user_id))
}

/// Per-user saved SSH hosts.
#[must_use]
pub fn ssh_hosts(user_id: &str) -> String {
    format!("users/{}/ssh-hosts.json", urlencoding::encode(user_id))
}

/// Per-user known-host fingerprints.
#[must_use]
pub fn known_hosts(user_id: &str) -> String {
    format!("users/{}/known-hosts.json", urlencoding::encode(user_id))
}

/// Day-partitioned audit log.
#[must_use]
pub fn audit(day: &str) -> String {
    format!("audit/{day}.jsonl")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_are_encoded() {
        assert_eq!(
            vault("alice@example.com"),
            "users/alice%40example.com/vault.json"
        );
        assert_eq!(known_hosts("a/b"), "users/a%2Fb/known-hosts.json");
    }

    #[test]
    fn audit_is_day_partitioned() {
        assert_eq!(audit("2026-08-01"), "audit/2026-08-01.jsonl");
    }
}
