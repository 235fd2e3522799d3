//! Runtime engine that materializes application containers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use appbox_common::config::AppboxConfig;
use appbox_common::constants::{
    ENV_PREFIX, LABEL_APP_NAME, LABEL_APP_NAMESPACE, LABEL_CATEGORY, LABEL_PLUGIN_TAG, LABEL_REPLICA,
    LABEL_SERVICE_NAME,
};
use appbox_common::error::{AppboxError, Result};
use appbox_common::types::{ContainerIdentity, PluginInfo};

use crate::backend::{self, ContainerBackend, ContainerSpec};
use crate::container::Container;
use crate::registry::Registry;

/// What [`Engine::create`] should bring into existence.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Application name.
    pub name: String,
    /// Owner namespace.
    pub namespace: String,
    /// Service name; defaults to the plugin name for service plugins and
    /// is ignored for framework plugins.
    pub service_name: Option<String>,
    /// Plugin to run; leaving it unset is a programming error.
    pub plugin: Option<PluginInfo>,
    /// Number of replicas that should exist afterwards.
    pub scaling: i32,
    /// Extra environment of the new containers.
    pub env: Vec<(String, String)>,
}

/// The runtime engine that coordinates all container operations.
pub struct Engine {
    backend: Arc<dyn ContainerBackend>,
    registry: Registry,
    command: Vec<String>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend.name())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine over an existing backend.
    #[must_use]
    pub fn new(backend: Arc<dyn ContainerBackend>, config: &AppboxConfig) -> Self {
        let stop_timeout = Duration::from_secs(config.container.stop_timeout_secs);
        Self {
            registry: Registry::new(Arc::clone(&backend), stop_timeout),
            backend,
            command: config.container.command.clone(),
        }
    }

    /// Creates an engine with the backend the configuration selects.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be initialized.
    pub fn from_config(config: &AppboxConfig) -> Result<Self> {
        Ok(Self::new(backend::detect_backend(config)?, config))
    }

    /// Lookup of existing containers.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The backend containers are created in.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ContainerBackend> {
        &self.backend
    }

    /// Returns whether the backend is operational on this platform.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// Brings the scaling group described by `options` up to
    /// `options.scaling` replicas and returns the new containers.
    ///
    /// New replicas take the lowest free indices. If one of them cannot be
    /// created, the ones created by this call are destroyed again.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] for an empty name or
    /// namespace, a non-positive scaling, a scaled service, or a scaling
    /// below the current replica count; [`AppboxError::AlreadyExists`] when
    /// the group already has exactly that many replicas; or the backend's
    /// error.
    ///
    /// # Panics
    ///
    /// Panics when `options.plugin` is `None`.
    pub fn create(&self, options: &CreateOptions) -> Result<Vec<Container>> {
        if options.name.is_empty() {
            return Err(AppboxError::invalid("container name must not be empty"));
        }
        if options.namespace.is_empty() {
            return Err(AppboxError::invalid("container namespace must not be empty"));
        }
        #[allow(clippy::panic)]
        let Some(plugin) = options.plugin.as_ref() else {
            panic!("container create options for {}-{} carry no plugin", options.name, options.namespace);
        };
        let Ok(scaling) = usize::try_from(options.scaling) else {
            return Err(AppboxError::invalid(format!("invalid scaling value: {}", options.scaling)));
        };
        if scaling == 0 {
            return Err(AppboxError::invalid("invalid scaling value: 0"));
        }

        let service_name = if plugin.category.is_framework() {
            None
        } else {
            Some(
                options
                    .service_name
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| plugin.name.clone()),
            )
        };
        if service_name.is_some() && scaling > 1 {
            return Err(AppboxError::invalid(format!("service {} cannot be scaled", plugin.name)));
        }
        let identity = ContainerIdentity {
            name: options.name.clone(),
            namespace: options.namespace.clone(),
            service_name,
            plugin_tag: plugin.tag.clone(),
        };

        let existing = match &identity.service_name {
            None => self.registry.find_applications(&identity.name, &identity.namespace)?,
            Some(service) => self
                .registry
                .find_service(&identity.name, &identity.namespace, service)?,
        };
        if existing.len() == scaling {
            return Err(AppboxError::AlreadyExists {
                kind: "container",
                id: identity.to_string(),
            });
        }
        if existing.len() > scaling {
            return Err(AppboxError::invalid(format!(
                "{identity} has {} replicas; scaling down to {scaling} is done by removing replicas",
                existing.len()
            )));
        }

        let taken: BTreeSet<u32> = existing.iter().map(Container::replica).collect();
        let free = (0..).filter(|i| !taken.contains(i)).take(scaling - existing.len());

        let mut created: Vec<Container> = Vec::new();
        for replica in free {
            let spec = self.spec(&identity, plugin, replica, &options.env);
            match self.backend.create(&spec) {
                Ok(info) => created.push(self.registry.wrap(info)),
                Err(e) => {
                    for container in &created {
                        if let Err(cleanup) = container.destroy() {
                            tracing::warn!(id = %container.id(), error = %cleanup, "rollback of new replica failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        tracing::info!(identity = %identity, added = created.len(), total = scaling, "containers created");
        Ok(created)
    }

    fn spec(&self, identity: &ContainerIdentity, plugin: &PluginInfo, replica: u32, env: &[(String, String)]) -> ContainerSpec {
        let mut labels = BTreeMap::from([
            (LABEL_APP_NAME.to_string(), identity.name.clone()),
            (LABEL_APP_NAMESPACE.to_string(), identity.namespace.clone()),
            (LABEL_PLUGIN_TAG.to_string(), plugin.tag.clone()),
            (LABEL_CATEGORY.to_string(), plugin.category.as_str().to_string()),
            (LABEL_REPLICA.to_string(), replica.to_string()),
        ]);
        let mut vars = vec![
            (format!("{ENV_PREFIX}APP_NAME"), identity.name.clone()),
            (format!("{ENV_PREFIX}APP_NAMESPACE"), identity.namespace.clone()),
            (format!("{ENV_PREFIX}PLUGIN"), plugin.name.clone()),
        ];
        if let Some(service) = &identity.service_name {
            let _ = labels.insert(LABEL_SERVICE_NAME.to_string(), service.clone());
            vars.push((format!("{ENV_PREFIX}SERVICE_NAME"), service.clone()));
        }
        vars.extend(env.iter().cloned());

        let name = if replica == 0 {
            identity.to_string()
        } else {
            format!("{identity}.{replica}")
        };
        ContainerSpec {
            name,
            labels,
            env: vars,
            command: self.command.clone(),
            limits: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use appbox_common::config::BackendKind;
    use appbox_common::types::Category;

    use super::*;

    fn plugin(name: &str, category: Category) -> PluginInfo {
        PluginInfo {
            tag: format!("{name}:1.0"),
            name: name.to_string(),
            display_name: name.to_uppercase(),
            category,
            path: format!("/plugins/{name}"),
            logo: String::new(),
            exposed_ports: vec![8080],
        }
    }

    fn engine(dir: &std::path::Path) -> Engine {
        let config = AppboxConfig {
            data_dir: dir.to_path_buf(),
            backend: BackendKind::Memory,
            ..AppboxConfig::default()
        };
        Engine::from_config(&config).unwrap()
    }

    fn options(scaling: i32) -> CreateOptions {
        CreateOptions {
            name: "blog".into(),
            namespace: "acme".into(),
            plugin: Some(plugin("php", Category::Framework)),
            scaling,
            ..CreateOptions::default()
        }
    }

    #[test]
    fn replicas_take_lowest_free_indices() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let first = engine.create(&options(3)).unwrap();
        assert_eq!(first.iter().map(Container::replica).collect::<Vec<_>>(), vec![0, 1, 2]);

        first[1].destroy().unwrap();
        let refill = engine.create(&options(3)).unwrap();
        assert_eq!(refill.len(), 1);
        assert_eq!(refill[0].replica(), 1);
        assert_eq!(refill[0].info().name, "blog-acme.1");
    }

    #[test]
    fn labels_and_env_describe_the_identity() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut opts = options(1);
        opts.plugin = Some(plugin("mysql", Category::Service));
        let created = engine.create(&opts).unwrap();
        let c = &created[0];
        assert_eq!(c.service_name(), Some("mysql"));
        assert_eq!(c.category(), Category::Service);
        assert_eq!(c.plugin_tag(), "mysql:1.0");
        assert_eq!(c.info().name, "mysql.blog-acme");
        assert_eq!(c.subst(None, None, &["sh", "-c", "echo $APPBOX_SERVICE_NAME"]).unwrap(), "mysql");
    }

    #[test]
    fn services_cannot_scale() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut opts = options(2);
        opts.plugin = Some(plugin("mysql", Category::Service));
        assert!(matches!(engine.create(&opts), Err(AppboxError::InvalidInput { .. })));
    }

    #[test]
    fn failed_replica_rolls_back_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(backend::memory::MemoryBackend::new(dir.path()));
        backend.fail_create_after(2);
        let engine = Engine::new(backend, &AppboxConfig::default());

        assert!(engine.create(&options(3)).is_err());
        assert!(engine.registry().find_all("blog", "acme").unwrap().is_empty());
    }
}
