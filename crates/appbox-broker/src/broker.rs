//! The broker: one entry point coordinating the user database, the SCM,
//! the plugin hub, and the container engine.
//!
//! Operations touching several of them validate first, undo the earlier
//! step when a later one fails during creation, and attempt every step
//! during teardown, reporting all failures together.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use appbox_common::error::{AppboxError, Errors, Result};
use appbox_common::types::{Branch, Category, ContainerId, ContainerState, User};
use appbox_runtime::container::Container;
use appbox_runtime::engine::Engine;
use appbox_runtime::logs::LogSink;
use appbox_runtime::metrics::MetricsSnapshot;
use serde::Serialize;

use crate::application::UserBroker;
use crate::hub::{PluginHub, PluginTag};
use crate::scm::ScmClient;
use crate::userdb::UserDatabase;

/// Runtime status of one container of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    /// Engine id.
    pub id: ContainerId,
    /// Service name, or the plugin name for the framework container.
    pub name: String,
    /// Human-readable plugin name.
    pub display_name: String,
    /// Framework or service.
    pub category: Category,
    /// Address of the container.
    pub ip: Option<Ipv4Addr>,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Private ports of the plugin.
    pub ports: Vec<u16>,
    /// Seconds since start, absent unless running.
    pub uptime_secs: Option<u64>,
}

/// Deployment state of an application repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployments {
    /// Reference currently deployed.
    pub current: Branch,
    /// References that can be deployed.
    pub branches: Vec<Branch>,
}

/// Coordinates users, repositories, plugins, and containers.
pub struct Broker {
    engine: Engine,
    scm: Arc<dyn ScmClient>,
    hub: Arc<dyn PluginHub>,
    users: Arc<dyn UserDatabase>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("engine", &self.engine)
            .field("scm", &self.scm.kind())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Assembles a broker from its collaborators.
    #[must_use]
    pub fn new(
        engine: Engine,
        scm: Arc<dyn ScmClient>,
        hub: Arc<dyn PluginHub>,
        users: Arc<dyn UserDatabase>,
    ) -> Self {
        Self {
            engine,
            scm,
            hub,
            users,
        }
    }

    /// The container engine.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The source-control client.
    #[must_use]
    pub fn scm(&self) -> &dyn ScmClient {
        self.scm.as_ref()
    }

    /// The plugin hub.
    #[must_use]
    pub fn hub(&self) -> &dyn PluginHub {
        self.hub.as_ref()
    }

    /// The user database.
    #[must_use]
    pub fn users(&self) -> &dyn UserDatabase {
        self.users.as_ref()
    }

    /// Stores a user and creates the SCM namespace it owns, if any.
    ///
    /// # Errors
    ///
    /// Returns the database's error, or the SCM's error after the user
    /// record has been removed again.
    pub fn create_user(&self, user: &User, password: &str) -> Result<()> {
        self.users.create(user, password)?;
        if let Some(namespace) = user.namespace() {
            if let Err(e) = self.scm.create_namespace(namespace) {
                if let Err(cleanup) = self.users.remove(&user.name) {
                    tracing::warn!(user = %user.name, error = %cleanup, "failed to drop user record after SCM failure");
                }
                return Err(e);
            }
        }
        tracing::info!(user = %user.name, namespace = user.namespace().unwrap_or(""), "user created");
        Ok(())
    }

    /// Removes a user with every container, repository, and plugin its
    /// namespace owns.
    ///
    /// Every step is attempted even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user, otherwise an aggregate of
    /// every step that failed.
    pub fn remove_user(&self, username: &str) -> Result<()> {
        let user = self.users.find(username)?;
        let mut errors = Errors::new();

        if let Some(namespace) = user.namespace() {
            match self.engine.registry().find_in_namespace(namespace) {
                Ok(containers) => {
                    for c in &containers {
                        errors.add(c.destroy());
                    }
                }
                Err(e) => errors.push(e),
            }
            errors.add(self.scm.remove_namespace(namespace));
            if let Err(e) = self.hub.remove_namespace(namespace) {
                tracing::warn!(namespace, error = %e, "plugin hub cleanup failed");
                errors.push(e);
            }
        }
        errors.add(self.users.remove(&user.name));

        if errors.is_empty() {
            tracing::info!(user = %user.name, "user removed");
        } else {
            tracing::warn!(user = %user.name, failures = errors.len(), "user removed with failures");
        }
        errors.into_result()
    }

    /// Loads a user record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub fn get_user(&self, username: &str) -> Result<User> {
        self.users.find(username)
    }

    /// Scopes application operations to one user.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub fn user_broker(&self, username: &str) -> Result<UserBroker<'_>> {
        Ok(UserBroker::new(self, self.get_user(username)?))
    }

    /// Runs the deployment hook of an application repository. Containers
    /// are not restarted.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] for an empty name or
    /// namespace, or the SCM's error.
    pub fn deploy(&self, name: &str, namespace: &str, branch: &str, log: &dyn LogSink) -> Result<()> {
        if name.is_empty() || namespace.is_empty() {
            return Err(AppboxError::invalid("application name and namespace must not be empty"));
        }
        self.scm.deploy(namespace, name, branch, log)?;
        tracing::info!(app = name, namespace, branch, "application deployed");
        Ok(())
    }

    /// The deployed reference and every deployable one.
    ///
    /// # Errors
    ///
    /// Returns the SCM's error.
    pub fn deployments(&self, name: &str, namespace: &str) -> Result<Deployments> {
        Ok(Deployments {
            current: self.scm.deployment_branch(namespace, name)?,
            branches: self.scm.deployment_branches(namespace, name)?,
        })
    }

    /// Status of every container of an application by container id,
    /// gathered in parallel. Containers that vanish while being queried
    /// are left out.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the application has no containers, or the
    /// registry's error.
    pub fn status(&self, name: &str, namespace: &str) -> Result<BTreeMap<ContainerId, ContainerStatus>> {
        let containers = self.engine.registry().find_all(name, namespace)?;
        if containers.is_empty() {
            return Err(AppboxError::application_not_found(name));
        }
        Ok(fan_out(&containers, |c| {
            let mut c = c.clone();
            c.refresh()?;
            Ok(self.container_status(&c))
        }))
    }

    /// Resource usage of every container of an application by container
    /// id, gathered in parallel. Failing containers are left out.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the application has no containers, or the
    /// registry's error.
    pub fn stats(&self, name: &str, namespace: &str) -> Result<BTreeMap<ContainerId, MetricsSnapshot>> {
        let containers = self.engine.registry().find_all(name, namespace)?;
        if containers.is_empty() {
            return Err(AppboxError::application_not_found(name));
        }
        Ok(fan_out(&containers, Container::stats))
    }

    /// Status of several applications, one thread per application.
    /// Applications whose status cannot be read are left out.
    pub fn all_status<'n>(
        &self,
        names: impl IntoIterator<Item = &'n str>,
        namespace: &str,
    ) -> BTreeMap<String, BTreeMap<ContainerId, ContainerStatus>> {
        let found = Mutex::new(BTreeMap::new());
        thread::scope(|s| {
            for name in names {
                let found = &found;
                let _ = s.spawn(move || match self.status(name, namespace) {
                    Ok(status) => {
                        let _ = found
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(name.to_string(), status);
                    }
                    Err(e) => tracing::debug!(app = name, namespace, error = %e, "status omitted"),
                });
            }
        });
        found.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn container_status(&self, c: &Container) -> ContainerStatus {
        let tag = c.plugin_tag();
        let (mut name, display_name, ports) = match self.hub.get_plugin_info(tag) {
            Ok(plugin) => (plugin.name, plugin.display_name, plugin.exposed_ports),
            Err(_) => match PluginTag::parse(tag) {
                Ok(parsed) => (parsed.name.clone(), parsed.display_name(), Vec::new()),
                Err(_) => (tag.to_string(), tag.to_string(), Vec::new()),
            },
        };
        if let Some(service) = c.service_name() {
            name = service.to_string();
        }
        ContainerStatus {
            id: c.id().clone(),
            name,
            display_name,
            category: c.category(),
            ip: c.ip(),
            state: c.state(),
            ports,
            uptime_secs: c.uptime().map(|d| d.as_secs()),
        }
    }
}

/// Runs `query` on every container in its own thread and keeps the
/// successful results by container id.
fn fan_out<T, F>(containers: &[Container], query: F) -> BTreeMap<ContainerId, T>
where
    T: Send,
    F: Fn(&Container) -> Result<T> + Sync,
{
    let found = Mutex::new(BTreeMap::new());
    thread::scope(|s| {
        for c in containers {
            let (found, query) = (&found, &query);
            let _ = s.spawn(move || match query(c) {
                Ok(value) => {
                    let _ = found
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(c.id().clone(), value);
                }
                Err(e) => tracing::debug!(id = %c.id(), error = %e, "container omitted"),
            });
        }
    });
    found.into_inner().unwrap_or_else(PoisonError::into_inner)
}
