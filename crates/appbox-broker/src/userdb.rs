//! User database collaborator.

use appbox_common::error::Result;
use appbox_common::types::{Application, User};

/// Persistent store of user records and their applications.
///
/// Lookups of unknown users fail with `NotFound`.
pub trait UserDatabase: Send + Sync {
    /// Stores a new user.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the name is taken.
    fn create(&self, user: &User, password: &str) -> Result<()>;

    /// Loads a user record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    fn find(&self, name: &str) -> Result<User>;

    /// Deletes a user record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    fn remove(&self, name: &str) -> Result<()>;

    /// Replaces a password after checking the current one.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when `old` does not match.
    fn change_password(&self, name: &str, old: &str, new: &str) -> Result<()>;

    /// Records a new application for a user.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the user has an application of that
    /// name.
    fn add_application(&self, username: &str, app: &Application) -> Result<()>;

    /// Forgets an application of a user.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    fn remove_application(&self, username: &str, name: &str) -> Result<()>;

    /// Replaces the record of an existing application.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user or application.
    fn update_application(&self, username: &str, app: &Application) -> Result<()>;
}
