//! Plugin hub collaborator and plugin tag syntax.

use std::fmt;

use appbox_common::error::{AppboxError, Result};
use appbox_common::types::PluginInfo;

/// Registry of installable plugins.
pub trait PluginHub: Send + Sync {
    /// Resolves a tag to plugin metadata.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown tag.
    fn get_plugin_info(&self, tag: &str) -> Result<PluginInfo>;

    /// Drops the plugins a namespace published, along with its proxy
    /// registrations.
    ///
    /// # Errors
    ///
    /// Returns the hub's error.
    fn remove_namespace(&self, namespace: &str) -> Result<()>;
}

/// A parsed `[namespace/]name[:version]` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginTag {
    /// Publishing namespace, `None` for system plugins.
    pub namespace: Option<String>,
    /// Plugin name.
    pub name: String,
    /// Version, `None` for the latest.
    pub version: Option<String>,
}

impl PluginTag {
    /// Parses a plugin tag.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] when a component is empty or
    /// the tag has more than one namespace separator.
    pub fn parse(tag: &str) -> Result<Self> {
        let invalid = || AppboxError::invalid(format!("invalid plugin tag: {tag:?}"));
        let (namespace, rest) = match tag.split_once('/') {
            Some((ns, rest)) => (Some(ns), rest),
            None => (None, tag),
        };
        let (name, version) = match rest.split_once(':') {
            Some((name, version)) => (name, Some(version)),
            None => (rest, None),
        };
        if name.is_empty()
            || rest.contains('/')
            || namespace.is_some_and(str::is_empty)
            || version.is_some_and(|v| v.is_empty() || v.contains(':'))
        {
            return Err(invalid());
        }
        Ok(Self {
            namespace: namespace.map(String::from),
            name: name.to_string(),
            version: version.map(String::from),
        })
    }

    /// `name version`, used when the hub cannot describe the plugin.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.version {
            Some(version) => format!("{} {version}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for PluginTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}/")?;
        }
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        let full = PluginTag::parse("acme/php:7.1").unwrap();
        assert_eq!(full.namespace.as_deref(), Some("acme"));
        assert_eq!(full.name, "php");
        assert_eq!(full.version.as_deref(), Some("7.1"));
        assert_eq!(full.to_string(), "acme/php:7.1");
        assert_eq!(full.display_name(), "php 7.1");

        let bare = PluginTag::parse("mysql").unwrap();
        assert_eq!(bare.namespace, None);
        assert_eq!(bare.version, None);
        assert_eq!(bare.display_name(), "mysql");
        assert_eq!(PluginTag::parse("redis:3").unwrap().to_string(), "redis:3");
    }

    #[test]
    fn rejects_empty_components() {
        for tag in ["", "/php", "acme/", "php:", "a/b/c", "php:1:2"] {
            assert!(PluginTag::parse(tag).is_err(), "{tag}");
        }
    }
}
