//! Blueprint registry
//!
//! Validated blueprints keyed by bundle type, with a secondary index by
//! fingerprint so structurally identical schemas resolve to one entry.

use dashmap::DashMap;
use nirva_core::{standard_bundledef, Blueprint, Bundledef, Error, Result, STANDARD_BUNDLE_TYPES};
use std::sync::Arc;
use tracing::debug;

/// Registered blueprints
#[derive(Debug, Default)]
pub struct BlueprintRegistry {
    by_type: DashMap<String, Arc<Blueprint>>,
    by_fingerprint: DashMap<u64, Arc<Blueprint>>,
}

impl BlueprintRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every standard bundle type
    ///
    /// # Errors
    ///
    /// `Schema` if a standard bundledef fails to validate.
    pub fn standard() -> Result<Self> {
        let registry = Self::new();
        for bundle_type in STANDARD_BUNDLE_TYPES {
            let def = standard_bundledef(bundle_type)
                .ok_or_else(|| Error::internal(format!("no bundledef for {}", bundle_type)))?;
            registry.register(bundle_type, def)?;
        }
        Ok(registry)
    }

    /// Validate a bundledef and register it under `bundle_type`
    ///
    /// Registering the same schema twice returns the existing blueprint.
    ///
    /// # Errors
    ///
    /// `Schema` if validation fails or the type is already registered with
    /// a different schema. Nothing is registered on error.
    pub fn register(&self, bundle_type: &str, def: &Bundledef) -> Result<Arc<Blueprint>> {
        let blueprint = def.validate(bundle_type)?;
        self.register_blueprint(blueprint)
    }

    /// Register an already validated blueprint
    pub fn register_blueprint(&self, blueprint: Blueprint) -> Result<Arc<Blueprint>> {
        let fingerprint = blueprint.fingerprint();
        let bundle_type = blueprint.bundle_type().to_string();
        let entry = self
            .by_type
            .entry(bundle_type.clone())
            .or_insert_with(|| Arc::new(blueprint.clone()));
        let registered = Arc::clone(entry.value());
        drop(entry);
        if registered.fingerprint() != fingerprint {
            return Err(Error::schema(format!(
                "bundle type {} is already registered with a different schema",
                bundle_type
            )));
        }
        self.by_fingerprint
            .entry(fingerprint)
            .or_insert_with(|| Arc::clone(&registered));
        debug!(target: "nirva::blueprint", bundle_type = %bundle_type, fingerprint = %format!("{:016x}", fingerprint), "registered blueprint");
        Ok(registered)
    }

    /// Blueprint for a bundle type
    pub fn get(&self, bundle_type: &str) -> Option<Arc<Blueprint>> {
        self.by_type.get(bundle_type).map(|e| Arc::clone(e.value()))
    }

    /// First blueprint registered with this fingerprint
    pub fn by_fingerprint(&self, fingerprint: u64) -> Option<Arc<Blueprint>> {
        self.by_fingerprint
            .get(&fingerprint)
            .map(|e| Arc::clone(e.value()))
    }

    /// Registered bundle types, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_type.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Number of registered bundle types
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
