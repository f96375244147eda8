//! Backend registry.
//!
//! Binds each configured backend to a name and an identifier prefix, and
//! dispatches identifiers to the single backend whose prefix contains them.
//! Built once at startup and shared immutably behind an `Arc`.

use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::config::GatewayConfig;
use crate::identifier::Identifier;
use crate::metrics::{GatewayMetrics, InstrumentedBackend};
use crate::storage::{create_backend, StorageBackend};
use crate::{Error, Result};

/// One registered backend.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub prefix: Identifier,
    pub backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("prefix", &self.prefix.to_string())
            .field("kind", &self.backend.kind())
            .finish()
    }
}

/// Outcome of a dispatch: the serving backend and the relative key.
#[derive(Debug, Clone)]
pub struct Dispatched<'a> {
    pub registration: &'a Registration,
    /// Relative key, `"/"` for the backend root
    pub key: String,
}

impl Dispatched<'_> {
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.registration.backend
    }
}

/// Immutable set of registered backends.
#[derive(Debug, Default)]
pub struct Registry {
    registrations: Vec<Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every backend named in `config`, wrapping each with metrics
    /// instrumentation when `metrics` is given.
    pub fn from_config(config: &GatewayConfig, metrics: Option<Arc<GatewayMetrics>>) -> Result<Self> {
        let mut registry = Self::new();
        for backend_config in &config.backends {
            let prefix = Identifier::resolve(&backend_config.prefix).map_err(|e| {
                Error::Configuration(format!(
                    "backend '{}' has an invalid prefix: {}",
                    backend_config.name, e
                ))
            })?;
            let backend = create_backend(&backend_config.storage, config.server.part_size)?;
            let backend: Arc<dyn StorageBackend> = match &metrics {
                Some(metrics) => Arc::new(InstrumentedBackend::new(
                    backend,
                    backend_config.name.clone(),
                    metrics.clone(),
                )),
                None => backend,
            };
            registry.register(&backend_config.name, prefix, backend)?;
        }
        Ok(registry)
    }

    /// Register a backend under `name` for every identifier under `prefix`.
    ///
    /// Names must be unique and prefixes must not contain one another.
    pub fn register(
        &mut self,
        name: &str,
        prefix: Identifier,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Configuration("backend name is empty".to_string()));
        }
        for existing in &self.registrations {
            if existing.name == name {
                return Err(Error::Configuration(format!(
                    "backend '{}' is registered twice",
                    name
                )));
            }
            if prefix.relative_key(&existing.prefix).is_some()
                || existing.prefix.relative_key(&prefix).is_some()
            {
                return Err(Error::Configuration(format!(
                    "prefix {} of backend '{}' overlaps prefix {} of backend '{}'",
                    prefix, name, existing.prefix, existing.name
                )));
            }
        }

        info!(
            "Registered {} backend '{}' at {}",
            backend.kind(),
            name,
            prefix
        );
        self.registrations.push(Registration {
            name: name.to_string(),
            prefix,
            backend,
        });
        Ok(())
    }

    /// Find the backend serving `identifier` and the key relative to it.
    pub fn dispatch(&self, identifier: &Identifier) -> Result<Dispatched<'_>> {
        self.registrations
            .iter()
            .find_map(|registration| {
                identifier
                    .relative_key(&registration.prefix)
                    .map(|key| Dispatched { registration, key })
            })
            .ok_or_else(|| Error::NotHandled(identifier.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.name == name)
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
