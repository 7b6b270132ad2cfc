use std::collections::BTreeSet;
use std::time::Duration;

use rdb_types::is_reserved;

/// Who is asking for a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caller {
    /// An ordinary caller, limited by the container's whitelist.
    User(String),
    /// Internal jobs and migrations; bypasses the whitelist.
    System,
}

impl Caller {
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

/// Name of the cross-reference field that points at records of
/// `container`.
pub fn link_field(container: &str) -> String {
    format!("linked_{}", container.to_lowercase())
}

/// Static description of a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSchema {
    pub name: String,
    /// Attributes ordinary callers may modify.
    pub whitelist: BTreeSet<String>,
    /// Cache TTL; `None` uses the repository default.
    pub ttl: Option<Duration>,
    /// Containers whose records carry cross-references to this one.
    pub linked_from: Vec<String>,
}

impl ContainerSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            whitelist: BTreeSet::new(),
            ttl: None,
            linked_from: Vec::new(),
        }
    }

    pub fn with_whitelist<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn linked_from<I, S>(mut self, containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linked_from
            .extend(containers.into_iter().map(Into::into));
        self
    }

    /// Whether `caller` may modify `field`. Reserved fields are never
    /// writable through updates.
    pub fn can_write(&self, field: &str, caller: &Caller) -> bool {
        if is_reserved(field) {
            return false;
        }
        caller.is_system() || self.whitelist.contains(field)
    }

    // -----------------------------------------------------------------------
    // Built-in containers
    // -----------------------------------------------------------------------

    pub fn companies() -> Self {
        Self::new("Companies")
            .with_whitelist(["description", "url", "industry", "country", "status"])
            .linked_from(["Interactions", "Studies"])
    }

    pub fn interactions() -> Self {
        Self::new("Interactions")
            .with_whitelist(["description", "status", "url", "notes"])
            .with_ttl(Duration::from_secs(60))
            .linked_from(["Companies"])
    }

    pub fn studies() -> Self {
        Self::new("Studies")
            .with_whitelist(["description", "status", "url", "summary"])
            .linked_from(["Companies"])
    }
}
