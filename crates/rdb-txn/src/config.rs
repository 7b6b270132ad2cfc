use serde::{Deserialize, Serialize};

/// Settings shared by [`crate::LockCoordinator`] and
/// [`crate::BranchTransaction`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Ref that holds committed state and lock sentinels.
    pub base_ref: String,
    /// Names the lock sentinel: `<Container>/<process_name>.lock`.
    pub process_name: String,
    /// Prefix for commit messages and change request titles.
    pub commit_prefix: String,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            base_ref: "main".into(),
            process_name: "rdb".into(),
            commit_prefix: "rdb".into(),
        }
    }
}

impl TxnConfig {
    /// Commit message for `action` on `container`.
    pub fn message(&self, action: &str, container: &str) -> String {
        format!("{}: {action} {container}", self.commit_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = TxnConfig::default();
        assert_eq!(c.base_ref, "main");
        assert_eq!(c.process_name, "rdb");
        assert_eq!(c.message("lock", "Companies"), "rdb: lock Companies");
    }
}
