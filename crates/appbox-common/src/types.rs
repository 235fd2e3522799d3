//! Domain primitive types used across the appbox workspace.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque engine identifier of one container.
///
/// Generated ids are 32 lowercase alphanumerics starting with a letter, so
/// they are valid OS user names and never contain the hyphen of a
/// `name-namespace` identity string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("c{}", &uuid[1..]))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container has been created but not yet started.
    Created,
    /// Container is actively running.
    Running,
    /// Container has been stopped.
    Stopped,
    /// Container encountered a fatal error.
    Failed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Role of a plugin inside an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// The primary language/runtime of an application.
    Framework,
    /// An auxiliary dependent service such as a database.
    Service,
}

impl Category {
    /// Returns `true` for the framework category.
    #[must_use]
    pub const fn is_framework(self) -> bool {
        matches!(self, Self::Framework)
    }

    /// Label value of this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Framework => "framework",
            Self::Service => "service",
        }
    }

    /// Parses a label value.
    #[must_use]
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "framework" => Some(Self::Framework),
            "service" => Some(Self::Service),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata a plugin tag resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Tag the metadata was resolved from.
    pub tag: String,
    /// Short plugin name.
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Framework or service.
    pub category: Category,
    /// Installation path of the plugin on the host.
    pub path: String,
    /// Logo location, empty if none.
    #[serde(default)]
    pub logo: String,
    /// Private ports the plugin listens on.
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
}

/// Identity of one replica of one service in one user's application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerIdentity {
    /// Application name.
    pub name: String,
    /// Owner namespace.
    pub namespace: String,
    /// Service name; `None` for the framework container.
    pub service_name: Option<String>,
    /// Tag of the plugin the container runs.
    pub plugin_tag: String,
}

impl ContainerIdentity {
    /// The `name-namespace` shorthand used by routers and CLIs.
    #[must_use]
    pub fn shorthand(&self) -> String {
        format!("{}-{}", self.name, self.namespace)
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service_name {
            Some(service) => write!(f, "{service}.{}-{}", self.name, self.namespace),
            None => write!(f, "{}-{}", self.name, self.namespace),
        }
    }
}

/// Splits a `name-namespace` identity string at its first hyphen.
///
/// Returns `None` when either side would be empty or no hyphen is present.
#[must_use]
pub fn split_identity(s: &str) -> Option<(&str, &str)> {
    let (name, namespace) = s.split_once('-')?;
    if name.is_empty() || namespace.is_empty() {
        return None;
    }
    Some((name, namespace))
}

/// An application owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Application name.
    pub name: String,
    /// Owner namespace.
    pub namespace: String,
    /// Plugin tags; the framework tag comes first.
    pub plugins: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A platform user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login name.
    pub name: String,
    /// SCM namespace; without one the user cannot own containers.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Applications keyed by name.
    #[serde(default)]
    pub applications: BTreeMap<String, Application>,
}

impl User {
    /// Creates a user record without applications.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            applications: BTreeMap::new(),
        }
    }

    /// The namespace, treating an empty string as absent.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

/// Kind of SCM reference a deployment tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BranchKind {
    /// A branch head.
    Branch,
    /// A tag.
    Tag,
}

/// An SCM reference that can be deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Fully qualified reference, e.g. `refs/heads/master`.
    pub id: String,
    /// Short display name, e.g. `master`.
    pub display_id: String,
    /// Branch or tag.
    #[serde(rename = "type")]
    pub kind: BranchKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_no_hyphen() {
        let id = ContainerId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(!id.as_str().contains('-'));
        assert!(id.as_str().starts_with('c'));
    }

    #[test]
    fn identity_splits_at_first_hyphen() {
        assert_eq!(split_identity("blog-acme-corp"), Some(("blog", "acme-corp")));
        assert_eq!(split_identity("blog-acme"), Some(("blog", "acme")));
        assert_eq!(split_identity("blog"), None);
        assert_eq!(split_identity("-acme"), None);
        assert_eq!(split_identity("blog-"), None);
    }

    #[test]
    fn identity_display_prefixes_service() {
        let mut id = ContainerIdentity {
            name: "blog".into(),
            namespace: "acme".into(),
            service_name: None,
            plugin_tag: "php:7".into(),
        };
        assert_eq!(id.to_string(), "blog-acme");
        id.service_name = Some("db".into());
        assert_eq!(id.to_string(), "db.blog-acme");
        assert_eq!(id.shorthand(), "blog-acme");
    }

    #[test]
    fn empty_namespace_counts_as_absent() {
        assert_eq!(User::new("alice", Some(String::new())).namespace(), None);
        assert_eq!(User::new("alice", None).namespace(), None);
        assert_eq!(User::new("alice", Some("acme".into())).namespace(), Some("acme"));
    }

    #[test]
    fn category_label_roundtrip() {
        assert_eq!(Category::from_label("service"), Some(Category::Service));
        assert_eq!(Category::from_label(Category::Framework.as_str()), Some(Category::Framework));
        assert_eq!(Category::from_label("db"), None);
    }

    #[test]
    fn branch_serializes_with_type_field() {
        let branch = Branch {
            id: "refs/heads/master".into(),
            display_id: "master".into(),
            kind: BranchKind::Branch,
        };
        let json = serde_json::to_string(&branch).expect("serialize");
        assert!(json.contains("\"type\":\"BRANCH\""));
    }
}
