//! Checker kind registry
//!
//! Maps a kind name (`http_2xx`, `dns_lookup`, ...) to a constructor that
//! builds a [`Checker`] from an opaque JSON spec. The registry is populated
//! once at process initialization and is read-only afterwards; readers may
//! proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::{CheckError, Checker};

/// Constructor invoked with the raw JSON spec for the checker.
pub type Constructor =
    Arc<dyn Fn(serde_json::Value) -> crate::Result<Box<dyn Checker>> + Send + Sync>;

/// Errors produced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A constructor for this kind is already present; the first binding is
    /// preserved.
    #[error("checker with kind `{0}` already registered")]
    AlreadyRegistered(String),

    /// No constructor is registered under this kind.
    #[error("checker with kind `{0}` is not registered")]
    UnknownKind(String),

    /// The constructor rejected the spec.
    #[error("constructing checker `{kind}`: {source}")]
    Construction {
        kind: String,
        #[source]
        source: CheckError,
    },

    #[error("registry lock poisoned")]
    Poisoned,
}

/// Thread-safe registry of checker constructors.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: Arc<RwLock<HashMap<String, Constructor>>>,
}

impl CheckerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in probe kind registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins: &[(&str, fn(serde_json::Value) -> crate::Result<Box<dyn Checker>>)] = &[
            ("assigned_address", crate::assigned_address::from_spec),
            ("dns_lookup", crate::dns_lookup::from_spec),
            ("http_2xx", crate::http_2xx::from_spec),
            ("icmp_ping", crate::icmp_ping::from_spec),
            ("ntpq", crate::ntpq::from_spec),
            ("tftp_rrq", crate::tftp_rrq::from_spec),
            ("tls_certificate", crate::tls_certificate::from_spec),
        ];
        for (kind, ctor) in builtins {
            // A fresh registry cannot hold duplicates.
            let _ = registry.register(*kind, *ctor);
        }
        registry
    }

    /// Registers a constructor under `kind`.
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if the kind is taken; the
    /// existing binding is preserved.
    pub fn register<F>(&self, kind: impl Into<String>, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn(serde_json::Value) -> crate::Result<Box<dyn Checker>> + Send + Sync + 'static,
    {
        let kind = kind.into();
        let mut checkers = self.checkers.write().map_err(|_| RegistryError::Poisoned)?;

        if checkers.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }

        checkers.insert(kind, Arc::new(constructor));
        Ok(())
    }

    /// Builds a checker of the given kind from its raw spec.
    pub fn new_by_kind(
        &self,
        kind: &str,
        spec: serde_json::Value,
    ) -> Result<Box<dyn Checker>, RegistryError> {
        let constructor = {
            let checkers = self.checkers.read().map_err(|_| RegistryError::Poisoned)?;
            checkers
                .get(kind)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))?
        };

        constructor(spec).map_err(|source| RegistryError::Construction {
            kind: kind.to_string(),
            source,
        })
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Result<Vec<String>, RegistryError> {
        let checkers = self.checkers.read().map_err(|_| RegistryError::Poisoned)?;
        let mut kinds: Vec<String> = checkers.keys().cloned().collect();
        kinds.sort();
        Ok(kinds)
    }
}
