//! Lookup of containers by identity.
//!
//! Every query is answered from the live backend; nothing is cached.

use std::sync::Arc;
use std::time::Duration;

use appbox_common::constants::{LABEL_APP_NAME, LABEL_APP_NAMESPACE, LABEL_SERVICE_NAME};
use appbox_common::error::{AppboxError, Result};
use appbox_common::types::{ContainerId, split_identity};

use crate::backend::{ContainerBackend, LabelFilter};
use crate::container::Container;

/// Read path over the containers of one backend.
#[derive(Clone)]
pub struct Registry {
    backend: Arc<dyn ContainerBackend>,
    stop_timeout: Duration,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("backend", &self.backend.name())
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

impl Registry {
    /// Creates a registry; handles it returns stop with `stop_timeout`.
    #[must_use]
    pub fn new(backend: Arc<dyn ContainerBackend>, stop_timeout: Duration) -> Self {
        Self { backend, stop_timeout }
    }

    /// Resolves a `name-namespace` identity to the framework replicas of
    /// that application, a `service.name-namespace` identity to the
    /// replicas of that service, or a string without a hyphen to the
    /// container with that id.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] for a malformed identity, or
    /// the backend's error.
    pub fn find(&self, identity: &str) -> Result<Vec<Container>> {
        if identity.contains('-') {
            let malformed = || AppboxError::invalid(format!("malformed container identity: {identity:?}"));
            let (name, namespace) = split_identity(identity).ok_or_else(malformed)?;
            return match name.split_once('.') {
                Some((service, name)) if !service.is_empty() && !name.is_empty() => {
                    self.find_service(name, namespace, service)
                }
                Some(_) => Err(malformed()),
                None => self.find_applications(name, namespace),
            };
        }
        if identity.is_empty() {
            return Err(AppboxError::invalid("empty container identity"));
        }
        match self.backend.inspect(&ContainerId::new(identity)) {
            Ok(info) => Ok(vec![self.wrap(info)]),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Every container of an application.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] for an empty name or
    /// namespace, or the backend's error.
    pub fn find_all(&self, name: &str, namespace: &str) -> Result<Vec<Container>> {
        self.query(app_filter(name, namespace)?)
    }

    /// Framework replicas of an application.
    ///
    /// # Errors
    ///
    /// Same as [`Registry::find_all`].
    pub fn find_applications(&self, name: &str, namespace: &str) -> Result<Vec<Container>> {
        self.query(app_filter(name, namespace)?.without(LABEL_SERVICE_NAME))
    }

    /// Replicas of one named service of an application.
    ///
    /// # Errors
    ///
    /// Same as [`Registry::find_all`], and an empty service name is
    /// invalid too.
    pub fn find_service(&self, name: &str, namespace: &str, service: &str) -> Result<Vec<Container>> {
        if service.is_empty() {
            return Err(AppboxError::invalid("service name must not be empty"));
        }
        self.query(app_filter(name, namespace)?.with(LABEL_SERVICE_NAME, service))
    }

    /// Every container of a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] for an empty namespace, or the
    /// backend's error.
    pub fn find_in_namespace(&self, namespace: &str) -> Result<Vec<Container>> {
        if namespace.is_empty() {
            return Err(AppboxError::invalid("namespace must not be empty"));
        }
        self.query(LabelFilter::new().with(LABEL_APP_NAMESPACE, namespace))
    }

    /// Every container appbox manages.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn list(&self) -> Result<Vec<Container>> {
        self.query(LabelFilter::new())
    }

    /// Wraps backend information into a handle.
    #[must_use]
    pub fn wrap(&self, info: crate::backend::ContainerInfo) -> Container {
        Container::new(Arc::clone(&self.backend), info, self.stop_timeout)
    }

    fn query(&self, filter: LabelFilter) -> Result<Vec<Container>> {
        let mut found: Vec<Container> = self
            .backend
            .list(&filter)?
            .into_iter()
            .filter(|info| info.label(LABEL_APP_NAME).is_some())
            .map(|info| self.wrap(info))
            .collect();
        found.sort_by(|a, b| {
            (a.namespace(), a.name(), a.service_name(), a.replica()).cmp(&(
                b.namespace(),
                b.name(),
                b.service_name(),
                b.replica(),
            ))
        });
        Ok(found)
    }
}

fn app_filter(name: &str, namespace: &str) -> Result<LabelFilter> {
    if name.is_empty() || namespace.is_empty() {
        return Err(AppboxError::invalid("application name and namespace must not be empty"));
    }
    Ok(LabelFilter::new()
        .with(LABEL_APP_NAME, name)
        .with(LABEL_APP_NAMESPACE, namespace))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use appbox_common::constants::{LABEL_CATEGORY, LABEL_REPLICA};
    use appbox_common::types::Category;

    use super::*;
    use crate::backend::ContainerSpec;
    use crate::backend::memory::MemoryBackend;

    fn add(backend: &MemoryBackend, name: &str, ns: &str, service: Option<&str>, replica: u32) -> ContainerId {
        let mut labels = BTreeMap::from([
            (LABEL_APP_NAME.to_string(), name.to_string()),
            (LABEL_APP_NAMESPACE.to_string(), ns.to_string()),
            (LABEL_REPLICA.to_string(), replica.to_string()),
        ]);
        let category = match service {
            Some(service) => {
                let _ = labels.insert(LABEL_SERVICE_NAME.to_string(), service.to_string());
                Category::Service
            }
            None => Category::Framework,
        };
        let _ = labels.insert(LABEL_CATEGORY.to_string(), category.as_str().to_string());
        let spec = ContainerSpec {
            name: format!("{name}-{ns}-{}-{replica}", service.unwrap_or("app")),
            labels,
            ..ContainerSpec::default()
        };
        backend.create(&spec).unwrap().id
    }

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new(dir.path()));
        let _ = add(&backend, "blog", "acme", None, 1);
        let _ = add(&backend, "blog", "acme", None, 0);
        let _ = add(&backend, "blog", "acme", Some("mysql"), 0);
        let _ = add(&backend, "wiki", "acme", None, 0);
        let _ = add(&backend, "blog", "other", None, 0);
        (dir, Registry::new(backend, Duration::from_secs(1)))
    }

    #[test]
    fn finds_framework_replicas_in_order() {
        let (_dir, registry) = registry();
        let found = registry.find("blog-acme").unwrap();
        assert_eq!(found.iter().map(Container::replica).collect::<Vec<_>>(), vec![0, 1]);
        assert!(found.iter().all(|c| c.service_name().is_none()));
    }

    #[test]
    fn finds_services_by_display_identity() {
        let (_dir, registry) = registry();
        let found = registry.find("mysql.blog-acme").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_name(), Some("mysql"));
        assert_eq!(found[0].identity().to_string(), "mysql.blog-acme");
        assert!(registry.find("redis.blog-acme").unwrap().is_empty());
    }

    #[test]
    fn finds_by_scope() {
        let (_dir, registry) = registry();
        assert_eq!(registry.find_all("blog", "acme").unwrap().len(), 3);
        assert_eq!(registry.find_service("blog", "acme", "mysql").unwrap().len(), 1);
        assert_eq!(registry.find_in_namespace("acme").unwrap().len(), 4);
        assert_eq!(registry.list().unwrap().len(), 5);
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let (_dir, registry) = registry();
        assert!(registry.find("ghost-acme").unwrap().is_empty());
        assert!(registry.find("cdeadbeef").unwrap().is_empty());
        assert!(registry.find_service("blog", "acme", "redis").unwrap().is_empty());
    }

    #[test]
    fn finds_by_engine_id() {
        let (_dir, registry) = registry();
        let any = registry.find_all("wiki", "acme").unwrap().remove(0);
        let found = registry.find(any.id().as_str()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "wiki");
    }

    #[test]
    fn malformed_queries_are_rejected() {
        let (_dir, registry) = registry();
        assert!(matches!(registry.find("-acme"), Err(AppboxError::InvalidInput { .. })));
        assert!(matches!(registry.find(""), Err(AppboxError::InvalidInput { .. })));
        assert!(matches!(registry.find(".blog-acme"), Err(AppboxError::InvalidInput { .. })));
        assert!(matches!(registry.find("mysql.-acme"), Err(AppboxError::InvalidInput { .. })));
        assert!(matches!(registry.find_all("", "acme"), Err(AppboxError::InvalidInput { .. })));
        assert!(matches!(registry.find_in_namespace(""), Err(AppboxError::InvalidInput { .. })));
    }
}
