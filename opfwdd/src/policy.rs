// ABOUTME: decides which forwarded command lines may reach the op cli.
// ABOUTME: exact matches and literal prefixes only; an empty whitelist allows nothing.

use std::collections::BTreeSet;

use opfwd_common::Config;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    exact: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

impl Policy {
    /// Blank entries are dropped: an empty prefix would match everything.
    /// Exact entries are trimmed; prefixes are kept byte for byte.
    pub fn new<E, P>(exact: E, prefixes: P) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            exact: exact
                .into_iter()
                .map(|entry| entry.as_ref().trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect(),
            prefixes: prefixes
                .into_iter()
                .map(|entry| entry.as_ref().to_string())
                .filter(|entry| !entry.trim().is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.allowed_commands, &config.allowed_prefixes)
    }

    /// Outer whitespace of `command` is ignored; everything else is compared
    /// byte for byte.
    pub fn is_allowed(&self, command: &str) -> bool {
        let command = command.trim();
        self.exact.contains(command)
            || self
                .prefixes
                .iter()
                .any(|prefix| command.starts_with(prefix.as_str()))
    }

    pub fn exact_commands(&self) -> impl Iterator<Item = &str> {
        self.exact.iter().map(String::as_str)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn policy() -> Policy {
        Policy::new(["read op://Employee/CONFIG/operator"], ["item create"])
    }

    #[rstest]
    #[case("read op://Employee/CONFIG/operator")]
    #[case("item create document --title='Test'")]
    #[case("item create")]
    #[case("item createx")]
    #[case("  read op://Employee/CONFIG/operator\t")]
    #[case("\titem create login  ")]
    fn allows_whitelisted_commands(policy: Policy, #[case] command: &str) {
        assert!(policy.is_allowed(command), "{command:?} should be allowed");
    }

    #[rstest]
    #[case("read op://Personal/SSH/passphrase")]
    #[case("read op://Employee/CONFIG/operator --reveal")]
    #[case("READ op://Employee/CONFIG/operator")]
    #[case("read  op://Employee/CONFIG/operator")]
    #[case("item  create document")]
    #[case("item")]
    #[case("")]
    #[case("   ")]
    fn rejects_everything_else(policy: Policy, #[case] command: &str) {
        assert!(!policy.is_allowed(command), "{command:?} should be rejected");
    }

    #[test]
    fn empty_policy_allows_nothing() {
        let policy = Policy::default();
        assert!(!policy.is_allowed(""));
        assert!(!policy.is_allowed("whoami"));
    }

    #[test]
    fn blank_entries_are_dropped() {
        let policy = Policy::new(["  "], ["", " \t"]);
        assert_eq!(policy, Policy::default());
        assert!(!policy.is_allowed("anything"));
    }

    #[test]
    fn prefix_trailing_space_anchors_a_word_boundary() {
        let policy = Policy::new(Vec::<String>::new(), ["item get --vault Public "]);
        assert_eq!(policy.prefixes().collect::<Vec<_>>(), vec!["item get --vault Public "]);
        assert!(policy.is_allowed("item get --vault Public login"));
        assert!(!policy.is_allowed("item get --vault PublicSecrets"));
        assert!(!policy.is_allowed("item get --vault Public"));
    }

    #[test]
    fn config_prefixes_keep_their_trailing_space() {
        let config = opfwd_common::parse_config(
            "account: acct\nallowed_prefixes: ['item get --vault Public ']\n",
        )
        .unwrap();
        let policy = Policy::from_config(&config);
        assert!(!policy.is_allowed("item get --vault PublicSecrets"));
        assert!(policy.is_allowed("item get --vault Public api-key"));
    }

    #[test]
    fn prefix_order_is_irrelevant() {
        let forward = Policy::new(Vec::<String>::new(), ["item", "item create"]);
        let backward = Policy::new(Vec::<String>::new(), ["item create", "item"]);
        for command in ["item get x", "item create y", "vault list"] {
            assert_eq!(forward.is_allowed(command), backward.is_allowed(command));
        }
    }

    #[test]
    fn from_config_uses_whitelists() {
        let config = opfwd_common::parse_config(
            "account: acct\nallowed_commands: [whoami]\nallowed_prefixes: ['vault list']\n",
        )
        .unwrap();
        let policy = Policy::from_config(&config);
        assert_eq!(policy.exact_commands().collect::<Vec<_>>(), vec!["whoami"]);
        assert_eq!(policy.prefixes().collect::<Vec<_>>(), vec!["vault list"]);
        assert!(policy.is_allowed("vault list --format json"));
    }
}
