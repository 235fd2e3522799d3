//! Source-control collaborator.
//!
//! Every user namespace maps to an SCM project and every application to a
//! repository in it. Provider clients implement [`ScmClient`]; the status
//! helpers below give all of them the same error mapping.

use std::io::Read;

use appbox_common::error::{AppboxError, Result};
use appbox_common::types::Branch;
use appbox_runtime::logs::LogSink;
use serde::{Deserialize, Serialize};

/// Schemes a repository may be populated from.
pub const CLONE_SCHEMES: &[&str] = &["http", "https", "git", "ssh"];

/// An SSH key registered for a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    /// Label the provider shows for the key.
    pub label: String,
    /// Public key text.
    pub text: String,
}

/// Client of a source-control provider.
pub trait ScmClient: Send + Sync {
    /// Short name of the repository kind, e.g. `git`.
    fn kind(&self) -> &str;

    /// Creates the project backing a namespace.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the namespace is taken.
    fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Removes a namespace and every repository in it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the namespace does not exist.
    fn remove_namespace(&self, namespace: &str) -> Result<()>;

    /// Creates an application repository. With `purge`, a leftover
    /// repository of the same name is deleted and creation retried once.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown namespace and `AlreadyExists` for
    /// a taken repository name.
    fn create_repo(&self, namespace: &str, name: &str, purge: bool) -> Result<()>;

    /// Deletes an application repository.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the repository does not exist.
    fn remove_repo(&self, namespace: &str, name: &str) -> Result<()>;

    /// Fills an empty repository from a tar stream of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    fn populate(&self, namespace: &str, name: &str, payload: &mut dyn Read, size: u64) -> Result<()>;

    /// Fills an empty repository by cloning `url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a scheme outside [`CLONE_SCHEMES`], or
    /// the provider's error.
    fn populate_url(&self, namespace: &str, name: &str, url: &str) -> Result<()>;

    /// Runs the deployment hook of a repository for `branch`, writing its
    /// output to `log`.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    fn deploy(&self, namespace: &str, name: &str, branch: &str, log: &dyn LogSink) -> Result<()>;

    /// The reference currently deployed.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    fn deployment_branch(&self, namespace: &str, name: &str) -> Result<Branch>;

    /// Every reference that can be deployed.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    fn deployment_branches(&self, namespace: &str, name: &str) -> Result<Vec<Branch>>;

    /// Grants an SSH key write access to a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidKey`] for a malformed key.
    fn add_key(&self, namespace: &str, key: &str) -> Result<()>;

    /// Revokes an SSH key; unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    fn remove_key(&self, namespace: &str, key: &str) -> Result<()>;

    /// Keys with access to a namespace.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    fn list_keys(&self, namespace: &str) -> Result<Vec<SshKey>>;
}

/// Maps a provider response about a namespace to a result.
///
/// # Errors
///
/// 404 and 409 become the namespace `NotFound` and `AlreadyExists` errors;
/// any other non-success status is a provider failure.
pub fn namespace_status(namespace: &str, status: u16) -> Result<()> {
    match status {
        404 => Err(AppboxError::namespace_not_found(namespace)),
        409 => Err(AppboxError::namespace_exists(namespace)),
        _ => success(status),
    }
}

/// Maps a provider response about a repository to a result.
///
/// # Errors
///
/// 404 and 409 become the repository `NotFound` and `AlreadyExists`
/// errors; any other non-success status is a provider failure.
pub fn repo_status(name: &str, status: u16) -> Result<()> {
    match status {
        404 => Err(AppboxError::repo_not_found(name)),
        409 => Err(AppboxError::repo_exists(name)),
        _ => success(status),
    }
}

/// Maps a provider response to a key upload.
///
/// # Errors
///
/// 400 is an invalid key; otherwise as [`namespace_status`].
pub fn key_status(namespace: &str, status: u16) -> Result<()> {
    if status == 400 {
        return Err(AppboxError::InvalidKey);
    }
    namespace_status(namespace, status)
}

fn success(status: u16) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(AppboxError::Command {
            command: "scm".into(),
            message: format!("unexpected response status {status}"),
        })
    }
}

/// Checks that a repository can be populated from `url`.
///
/// # Errors
///
/// Returns [`AppboxError::InvalidInput`] when the URL has no scheme or one
/// outside [`CLONE_SCHEMES`].
pub fn check_clone_url(url: &str) -> Result<()> {
    let scheme = url.split_once("://").map_or("", |(scheme, _)| scheme);
    if scheme.is_empty() || !CLONE_SCHEMES.contains(&scheme) {
        return Err(AppboxError::invalid(format!("unsupported clone scheme: {scheme:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_per_resource() {
        assert!(namespace_status("acme", 201).is_ok());
        assert!(namespace_status("acme", 404).unwrap_err().is_not_found());
        assert!(namespace_status("acme", 409).unwrap_err().is_already_exists());
        assert!(repo_status("blog", 404).unwrap_err().is_not_found());
        assert!(repo_status("blog", 409).unwrap_err().is_already_exists());
        assert_eq!(repo_status("blog", 409).unwrap_err().to_string(), AppboxError::repo_exists("blog").to_string());
        assert!(matches!(repo_status("blog", 500), Err(AppboxError::Command { .. })));
    }

    #[test]
    fn bad_keys_are_reported_as_such() {
        assert!(matches!(key_status("acme", 400), Err(AppboxError::InvalidKey)));
        assert!(key_status("acme", 404).unwrap_err().is_not_found());
        assert!(key_status("acme", 204).is_ok());
    }

    #[test]
    fn only_known_clone_schemes_pass() {
        for ok in ["https://example.com/a.git", "git://host/a", "ssh://git@host/a", "http://h/a"] {
            assert!(check_clone_url(ok).is_ok(), "{ok}");
        }
        for bad in ["file:///etc", "ftp://h/a", "host:path", ""] {
            assert!(matches!(check_clone_url(bad), Err(AppboxError::InvalidInput { .. })), "{bad}");
        }
    }
}
