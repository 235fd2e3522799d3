//! Application operations on behalf of one user.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

use appbox_common::constants::DEPLOYMENT_DIR;
use appbox_common::error::{AppboxError, Errors, Result};
use appbox_common::types::{Application, Category, ContainerId, ContainerState, PluginInfo, User};
use appbox_runtime::container::Container;
use appbox_runtime::engine::CreateOptions;
use appbox_runtime::exec::SharedBuffer;
use appbox_runtime::logs::LogSink;
use appbox_runtime::metrics::MetricsSnapshot;

use crate::archive;
use crate::broker::{Broker, ContainerStatus, Deployments};
use crate::scm::{self, SshKey};

/// Returns whether `name` is a valid application or service name:
/// a lowercase letter followed by lowercase letters, digits, or
/// underscores.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(AppboxError::invalid(format!(
            "{kind} name {name:?} may only contain lower case letters, digits or underscores, starting with a letter"
        )))
    }
}

/// What a new application is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationOptions {
    /// Application name.
    pub name: String,
    /// Tag of the framework plugin.
    pub framework: String,
    /// Service requests, see [`ServiceRequest`].
    pub services: Vec<String>,
    /// Remote repository to populate the application repository from.
    pub repo: Option<String>,
    /// Number of framework replicas.
    pub scaling: i32,
}

impl ApplicationOptions {
    /// A single-replica application without services.
    pub fn new(name: impl Into<String>, framework: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            framework: framework.into(),
            services: Vec::new(),
            repo: None,
            scaling: 1,
        }
    }
}

/// A service to add, written `tag` or `name=tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Explicit service name; defaults to the plugin name.
    pub name: Option<String>,
    /// Plugin tag.
    pub tag: String,
}

impl FromStr for ServiceRequest {
    type Err = AppboxError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, tag) = match s.split_once('=') {
            Some((name, tag)) => {
                check_name("service", name)?;
                (Some(name.to_string()), tag)
            }
            None => (None, s),
        };
        if tag.is_empty() {
            return Err(AppboxError::invalid(format!("service request {s:?} names no plugin")));
        }
        Ok(Self {
            name,
            tag: tag.to_string(),
        })
    }
}

/// Requested replica count of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    /// Exactly this many replicas.
    To(i32),
    /// This many more than now.
    Up(i32),
    /// This many fewer than now. The engine never shrinks a group, so a
    /// positive count is refused; use [`UserBroker::remove_replicas`].
    Down(i32),
}

impl Scaling {
    fn target(self, current: i32) -> i32 {
        match self {
            Self::To(n) => n,
            Self::Up(n) => current.saturating_add(n),
            Self::Down(n) => current.saturating_sub(n),
        }
    }
}

impl FromStr for Scaling {
    type Err = AppboxError;

    /// Parses `N`, `+N`, or `-N`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |digits: &str| {
            digits
                .parse::<i32>()
                .map_err(|e| AppboxError::invalid(format!("invalid scaling value {s:?}: {e}")))
        };
        if let Some(rest) = s.strip_prefix('+') {
            parse(rest).map(Self::Up)
        } else if let Some(rest) = s.strip_prefix('-') {
            parse(rest).map(Self::Down)
        } else {
            parse(s).map(Self::To)
        }
    }
}

/// Broker operations scoped to one user and its namespace.
#[derive(Debug)]
pub struct UserBroker<'a> {
    broker: &'a Broker,
    user: User,
}

impl<'a> UserBroker<'a> {
    pub(crate) const fn new(broker: &'a Broker, user: User) -> Self {
        Self { broker, user }
    }

    /// The user as last loaded.
    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    /// Applications of the user by name.
    #[must_use]
    pub const fn applications(&self) -> &BTreeMap<String, Application> {
        &self.user.applications
    }

    /// Reloads the user record.
    ///
    /// # Errors
    ///
    /// Returns the database's error.
    pub fn refresh(&mut self) -> Result<()> {
        self.user = self.broker.users().find(&self.user.name)?;
        Ok(())
    }

    fn namespace(&self) -> Result<&str> {
        self.user
            .namespace()
            .ok_or_else(|| AppboxError::invalid(format!("user {} has no namespace", self.user.name)))
    }

    fn application(&self, name: &str) -> Result<&Application> {
        self.user
            .applications
            .get(name)
            .ok_or_else(|| AppboxError::application_not_found(name))
    }

    fn resolve(&self, tag: &str, category: Category) -> Result<PluginInfo> {
        let plugin = self.broker.hub().get_plugin_info(tag)?;
        if plugin.category != category {
            return Err(AppboxError::invalid(format!("plugin {tag} is a {}, not a {category}", plugin.category)));
        }
        Ok(plugin)
    }

    /// Resolves service requests, refusing two that would share a
    /// service name.
    fn resolve_services<S: AsRef<str>>(&self, requests: &[S]) -> Result<Vec<(Option<String>, PluginInfo)>> {
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            let request: ServiceRequest = request.as_ref().parse()?;
            let plugin = self.resolve(&request.tag, Category::Service)?;
            let effective = request.name.clone().unwrap_or_else(|| plugin.name.clone());
            if !seen.insert(effective.clone()) {
                return Err(AppboxError::invalid(format!("service {effective} requested twice")));
            }
            resolved.push((request.name, plugin));
        }
        Ok(resolved)
    }

    fn create_containers(&self, options: &CreateOptions, created: &mut Vec<Container>) -> Result<()> {
        created.extend(self.broker.engine().create(options)?);
        Ok(())
    }

    fn discard(containers: &[Container]) {
        for c in containers {
            if let Err(e) = c.destroy() {
                tracing::warn!(id = %c.id(), error = %e, "failed to discard container");
            }
        }
    }

    /// Creates an application: its repository, its framework replicas,
    /// and its services. Containers are created but not started.
    ///
    /// Everything is validated before anything is created; when a later
    /// step fails, the containers and repository created so far are
    /// removed again.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] for an invalid name, an empty
    /// framework tag, a non-positive scaling, a plugin of the wrong
    /// category, or a duplicated service; `AlreadyExists` when the user
    /// has an application of that name; or the first collaborator error.
    pub fn create_application(&mut self, options: &ApplicationOptions) -> Result<(Application, Vec<Container>)> {
        check_name("application", &options.name)?;
        if options.framework.is_empty() {
            return Err(AppboxError::invalid("the application framework cannot be empty"));
        }
        if options.scaling <= 0 {
            return Err(AppboxError::invalid(format!("invalid scaling value: {}", options.scaling)));
        }
        if let Some(repo) = &options.repo {
            scm::check_clone_url(repo)?;
        }
        let namespace = self.namespace()?.to_string();
        let name = options.name.as_str();
        if self.user.applications.contains_key(name) {
            return Err(AppboxError::AlreadyExists {
                kind: "application",
                id: name.to_string(),
            });
        }
        let framework = self.resolve(&options.framework, Category::Framework)?;
        let services = self.resolve_services(&options.services)?;

        self.broker.scm().create_repo(&namespace, name, true)?;
        let mut created = Vec::new();
        let built = self.build_application(options, &namespace, framework, services, &mut created);
        let app = match built {
            Ok(app) => app,
            Err(e) => {
                Self::discard(&created);
                if let Err(cleanup) = self.broker.scm().remove_repo(&namespace, name) {
                    tracing::warn!(app = name, namespace = %namespace, error = %cleanup, "failed to remove repository");
                }
                return Err(e);
            }
        };

        let _ = self.user.applications.insert(app.name.clone(), app.clone());
        tracing::info!(app = name, namespace = %namespace, containers = created.len(), "application created");
        Ok((app, created))
    }

    fn build_application(
        &self,
        options: &ApplicationOptions,
        namespace: &str,
        framework: PluginInfo,
        services: Vec<(Option<String>, PluginInfo)>,
        created: &mut Vec<Container>,
    ) -> Result<Application> {
        if let Some(repo) = &options.repo {
            self.broker.scm().populate_url(namespace, &options.name, repo)?;
        }

        let mut plugins = vec![framework.tag.clone()];
        let base = CreateOptions {
            name: options.name.clone(),
            namespace: namespace.to_string(),
            ..CreateOptions::default()
        };
        self.create_containers(
            &CreateOptions {
                plugin: Some(framework),
                scaling: options.scaling,
                ..base.clone()
            },
            created,
        )?;
        for (service_name, plugin) in services {
            if !plugins.contains(&plugin.tag) {
                plugins.push(plugin.tag.clone());
            }
            self.create_containers(
                &CreateOptions {
                    service_name,
                    plugin: Some(plugin),
                    scaling: 1,
                    ..base.clone()
                },
                created,
            )?;
        }

        let app = Application {
            name: options.name.clone(),
            namespace: namespace.to_string(),
            plugins,
            created_at: chrono::Utc::now(),
        };
        self.broker.users().add_application(&self.user.name, &app)?;
        Ok(app)
    }

    /// Adds services to an existing application. Requests are written
    /// `tag` or `name=tag`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown application,
    /// [`AppboxError::InvalidInput`] for a malformed or duplicated request,
    /// `AlreadyExists` when the application already has such a service, or
    /// the first collaborator error. Services created by this call are
    /// removed again on failure.
    pub fn create_services<S: AsRef<str>>(&mut self, name: &str, requests: &[S]) -> Result<Vec<Container>> {
        let namespace = self.namespace()?.to_string();
        let mut app = self.application(name)?.clone();
        let services = self.resolve_services(requests)?;

        let mut created = Vec::new();
        let result = services.into_iter().try_for_each(|(service_name, plugin)| {
            if !app.plugins.contains(&plugin.tag) {
                app.plugins.push(plugin.tag.clone());
            }
            self.create_containers(
                &CreateOptions {
                    name: name.to_string(),
                    namespace: namespace.clone(),
                    service_name,
                    plugin: Some(plugin),
                    scaling: 1,
                    ..CreateOptions::default()
                },
                &mut created,
            )
        });
        if let Err(e) = result.and_then(|()| self.broker.users().update_application(&self.user.name, &app)) {
            Self::discard(&created);
            return Err(e);
        }

        let _ = self.user.applications.insert(app.name.clone(), app);
        tracing::info!(app = name, namespace = %namespace, added = created.len(), "services created");
        Ok(created)
    }

    /// Adds framework replicas. Returns the new replicas, not started.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown application, `AlreadyExists` when
    /// the application already runs that many replicas,
    /// [`AppboxError::InvalidInput`] when the target is below the current
    /// count (see [`UserBroker::remove_replicas`]), or the engine's error.
    pub fn scale_application(&self, name: &str, scaling: Scaling) -> Result<Vec<Container>> {
        let namespace = self.namespace()?;
        let app = self.application(name)?;
        let tag = app
            .plugins
            .first()
            .ok_or_else(|| AppboxError::invalid(format!("application {name} has no framework")))?;
        let plugin = self.resolve(tag, Category::Framework)?;

        let current = self.broker.engine().registry().find_applications(name, namespace)?.len();
        let current = i32::try_from(current).unwrap_or(i32::MAX);
        let target = scaling.target(current);
        if target < current {
            return Err(AppboxError::invalid(format!(
                "{name} has {current} replicas; remove replicas by id to scale down"
            )));
        }
        self.broker.engine().create(&CreateOptions {
            name: name.to_string(),
            namespace: namespace.to_string(),
            plugin: Some(plugin),
            scaling: target,
            ..CreateOptions::default()
        })
    }

    /// Destroys the chosen framework replicas. At least one replica must
    /// remain.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown application or an id that is not
    /// one of its replicas, [`AppboxError::InvalidInput`] when every
    /// replica would go, or the aggregate of failed destroys.
    pub fn remove_replicas(&self, name: &str, ids: &[ContainerId]) -> Result<()> {
        let namespace = self.namespace()?;
        let replicas = self.broker.engine().registry().find_applications(name, namespace)?;
        if replicas.is_empty() {
            return Err(AppboxError::application_not_found(name));
        }
        let chosen: BTreeSet<&ContainerId> = ids.iter().collect();
        if let Some(stray) = chosen.iter().find(|id| !replicas.iter().any(|c| c.id() == **id)) {
            return Err(AppboxError::NotFound {
                kind: "replica",
                id: stray.to_string(),
            });
        }
        if chosen.len() >= replicas.len() {
            return Err(AppboxError::invalid(format!("cannot remove every replica of {name}")));
        }

        let mut errors = Errors::new();
        for c in replicas.iter().filter(|c| chosen.contains(c.id())) {
            errors.add(c.destroy());
        }
        tracing::info!(app = name, namespace, removed = chosen.len(), "replicas removed");
        errors.into_result()
    }

    /// Removes an application with all its containers and its repository.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown application, otherwise the
    /// aggregate of every failed step.
    pub fn remove_application(&mut self, name: &str) -> Result<()> {
        let namespace = self.namespace()?.to_string();
        let _ = self.application(name)?;

        let mut errors = Errors::new();
        match self.broker.engine().registry().find_all(name, &namespace) {
            Ok(containers) => {
                for c in &containers {
                    errors.add(c.destroy());
                }
            }
            Err(e) => errors.push(e),
        }
        match self.broker.scm().remove_repo(&namespace, name) {
            Err(e) if !e.is_not_found() => errors.push(e),
            _ => {}
        }
        errors.add(self.broker.users().remove_application(&self.user.name, name));
        let _ = self.user.applications.remove(name);

        tracing::info!(app = name, namespace = %namespace, "application removed");
        errors.into_result()
    }

    /// Removes one named service from an application.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown application or service, otherwise
    /// the aggregate of every failed step.
    pub fn remove_service(&mut self, name: &str, service: &str) -> Result<()> {
        let namespace = self.namespace()?.to_string();
        let mut app = self.application(name)?.clone();
        let registry = self.broker.engine().registry();
        let containers = registry.find_service(name, &namespace, service)?;
        let Some(first) = containers.first() else {
            return Err(AppboxError::NotFound {
                kind: "service",
                id: format!("{service}.{name}-{namespace}"),
            });
        };
        let tag = first.plugin_tag().to_string();

        let mut errors = Errors::new();
        for c in &containers {
            errors.add(c.destroy());
        }
        let still_used = registry
            .find_all(name, &namespace)
            .map(|rest| rest.iter().any(|c| c.plugin_tag() == tag))
            .unwrap_or(true);
        if !still_used {
            app.plugins.retain(|t| *t != tag);
            match self.broker.users().update_application(&self.user.name, &app) {
                Ok(()) => {
                    let _ = self.user.applications.insert(app.name.clone(), app);
                }
                Err(e) => errors.push(e),
            }
        }
        tracing::info!(app = name, namespace = %namespace, service, "service removed");
        errors.into_result()
    }

    fn containers(&self, name: &str) -> Result<Vec<Container>> {
        let containers = self
            .broker
            .engine()
            .registry()
            .find_all(name, self.namespace()?)?;
        if containers.is_empty() {
            return Err(AppboxError::application_not_found(name));
        }
        Ok(containers)
    }

    /// Starts containers one by one, reporting each to `log`.
    ///
    /// # Errors
    ///
    /// Returns the aggregate of the containers that failed to start.
    pub fn start_containers(&self, containers: &[Container], log: &dyn LogSink) -> Result<()> {
        let (mut out, mut err) = (log.stdout(), log.stderr());
        let mut errors = Errors::new();
        for c in containers {
            match c.start() {
                Ok(()) => {
                    let _ = writeln!(out, "Started {}", c.identity());
                }
                Err(e) => {
                    let _ = writeln!(err, "Failed to start {}: {e}", c.identity());
                    errors.push(e);
                }
            }
        }
        errors.into_result()
    }

    /// Starts every container of an application.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an application without containers, or the
    /// aggregate of start failures.
    pub fn start_application(&self, name: &str, log: &dyn LogSink) -> Result<()> {
        self.start_containers(&self.containers(name)?, log)
    }

    /// Stops every container of an application.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an application without containers, or the
    /// aggregate of stop failures.
    pub fn stop_application(&self, name: &str) -> Result<()> {
        let mut errors = Errors::new();
        for c in &self.containers(name)? {
            errors.add(c.stop());
        }
        errors.into_result()
    }

    /// Restarts every container of an application, reporting each to
    /// `log`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an application without containers, or the
    /// aggregate of restart failures.
    pub fn restart_application(&self, name: &str, log: &dyn LogSink) -> Result<()> {
        let mut out = log.stdout();
        let mut errors = Errors::new();
        for c in &self.containers(name)? {
            match c.restart() {
                Ok(()) => {
                    let _ = writeln!(out, "Restarted {}", c.identity());
                }
                Err(e) => errors.push(e),
            }
        }
        errors.into_result()
    }

    /// Status of every container of an application.
    ///
    /// # Errors
    ///
    /// See [`Broker::status`].
    pub fn status(&self, name: &str) -> Result<BTreeMap<ContainerId, ContainerStatus>> {
        self.broker.status(name, self.namespace()?)
    }

    /// Status of every application of the user; unreadable applications
    /// are left out.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] when the user has no
    /// namespace.
    pub fn all_status(&self) -> Result<BTreeMap<String, BTreeMap<ContainerId, ContainerStatus>>> {
        let namespace = self.namespace()?;
        Ok(self
            .broker
            .all_status(self.user.applications.keys().map(String::as_str), namespace))
    }

    /// Resource usage of every container of an application.
    ///
    /// # Errors
    ///
    /// See [`Broker::stats`].
    pub fn stats(&self, name: &str) -> Result<BTreeMap<ContainerId, MetricsSnapshot>> {
        self.broker.stats(name, self.namespace()?)
    }

    /// Deploys `branch` of an application.
    ///
    /// # Errors
    ///
    /// See [`Broker::deploy`].
    pub fn deploy(&self, name: &str, branch: &str, log: &dyn LogSink) -> Result<()> {
        let _ = self.application(name)?;
        self.broker.deploy(name, self.namespace()?, branch, log)
    }

    /// Uploads a gzipped tar archive into an application.
    ///
    /// A source archive populates the application repository and deploys
    /// the current deployment branch. A binary archive is unpacked into
    /// the deployment directory of every framework replica, and running
    /// replicas are restarted; each replica is reported to `log`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown application,
    /// [`AppboxError::InvalidInput`] for an unreadable or unsafe archive,
    /// the SCM's error for a source upload, or the aggregate of replicas
    /// that failed for a binary upload.
    pub fn upload(&self, name: &str, payload: &mut dyn Read, binary: bool, log: &dyn LogSink) -> Result<()> {
        let namespace = self.namespace()?;
        let _ = self.application(name)?;
        let mut gzipped = Vec::new();
        let _ = payload
            .read_to_end(&mut gzipped)
            .map_err(|e| AppboxError::invalid(format!("failed to read upload: {e}")))?;
        let tarball = archive::decompress(&gzipped)?;

        if !binary {
            let size = u64::try_from(gzipped.len()).unwrap_or(u64::MAX);
            self.broker.scm().populate(namespace, name, &mut gzipped.as_slice(), size)?;
            let branch = self.broker.scm().deployment_branch(namespace, name)?;
            return self.broker.deploy(name, namespace, &branch.display_id, log);
        }

        let replicas = self.broker.engine().registry().find_applications(name, namespace)?;
        if replicas.is_empty() {
            return Err(AppboxError::application_not_found(name));
        }
        let unpack = format!("mkdir -p {DEPLOYMENT_DIR} && tar -xf - -C {DEPLOYMENT_DIR}");
        let (mut out, mut err) = (log.stdout(), log.stderr());
        let mut errors = Errors::new();
        for c in &replicas {
            let stdin: Box<dyn Read + Send> = Box::new(Cursor::new(tarball.clone()));
            let unpacked = c.exec_e(None, Some(stdin), None, &["sh", "-c", unpack.as_str()]);
            let deployed = unpacked.and_then(|()| {
                if c.state() == ContainerState::Running {
                    c.restart()
                } else {
                    Ok(())
                }
            });
            match deployed {
                Ok(()) => {
                    let _ = writeln!(out, "Deployed {}", c.identity());
                }
                Err(e) => {
                    let _ = writeln!(err, "Failed to deploy {}: {e}", c.identity());
                    errors.push(e);
                }
            }
        }
        tracing::info!(app = name, namespace, replicas = replicas.len(), "binary uploaded");
        errors.into_result()
    }

    /// Writes the deployment directory of an application's first
    /// framework replica to `out` as a gzipped tar archive.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown application or one without
    /// framework replicas, or the error of the archiving command.
    pub fn download(&self, name: &str, out: &mut dyn Write) -> Result<()> {
        let namespace = self.namespace()?;
        let _ = self.application(name)?;
        let replicas = self.broker.engine().registry().find_applications(name, namespace)?;
        let Some(first) = replicas.first() else {
            return Err(AppboxError::application_not_found(name));
        };

        let tarball = SharedBuffer::new();
        let pack = format!("mkdir -p {DEPLOYMENT_DIR} && tar -cf - -C {DEPLOYMENT_DIR} .");
        first.exec_e(None, None, Some(Box::new(tarball.clone())), &["sh", "-c", pack.as_str()])?;
        archive::compress(&tarball.bytes(), out).map_err(|e| AppboxError::io(format!("{name}.tar.gz"), e))
    }

    /// Deployment state of an application.
    ///
    /// # Errors
    ///
    /// See [`Broker::deployments`].
    pub fn deployments(&self, name: &str) -> Result<Deployments> {
        let _ = self.application(name)?;
        self.broker.deployments(name, self.namespace()?)
    }

    /// Grants an SSH key access to the user's repositories.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidKey`] for a malformed key, or the
    /// SCM's error.
    pub fn add_key(&self, key: &str) -> Result<()> {
        self.broker.scm().add_key(self.namespace()?, key)
    }

    /// Revokes an SSH key.
    ///
    /// # Errors
    ///
    /// Returns the SCM's error.
    pub fn remove_key(&self, key: &str) -> Result<()> {
        self.broker.scm().remove_key(self.namespace()?, key)
    }

    /// Keys with access to the user's repositories.
    ///
    /// # Errors
    ///
    /// Returns the SCM's error.
    pub fn list_keys(&self) -> Result<Vec<SshKey>> {
        self.broker.scm().list_keys(self.namespace()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_pattern() {
        for ok in ["blog", "a", "my_app2"] {
            assert!(is_valid_name(ok), "{ok}");
        }
        for bad in ["", "Blog", "2blog", "_blog", "my-app", "blög"] {
            assert!(!is_valid_name(bad), "{bad}");
        }
    }

    #[test]
    fn service_requests_parse() {
        let plain: ServiceRequest = "mysql:5.7".parse().unwrap();
        assert_eq!(plain.name, None);
        assert_eq!(plain.tag, "mysql:5.7");

        let named: ServiceRequest = "db2=mysql".parse().unwrap();
        assert_eq!(named.name.as_deref(), Some("db2"));
        assert_eq!(named.tag, "mysql");

        assert!("Bad=mysql".parse::<ServiceRequest>().is_err());
        assert!("db=".parse::<ServiceRequest>().is_err());
    }

    #[test]
    fn scaling_parses_and_targets() {
        assert_eq!("3".parse::<Scaling>().unwrap(), Scaling::To(3));
        assert_eq!("+2".parse::<Scaling>().unwrap(), Scaling::Up(2));
        assert_eq!("-1".parse::<Scaling>().unwrap(), Scaling::Down(1));
        assert!("x".parse::<Scaling>().is_err());

        assert_eq!(Scaling::Up(2).target(1), 3);
        assert_eq!(Scaling::Down(1).target(3), 2);
        assert_eq!(Scaling::To(5).target(1), 5);
    }
}
