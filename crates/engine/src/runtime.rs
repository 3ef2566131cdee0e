//! Runtime context
//!
//! Everything that would otherwise be process-wide lives on a [`Runtime`]:
//! the blueprint registry, the bundle store (and with it the structure
//! root), the thread pool and the global hook stacks. Creating a runtime
//! registers the standard blueprints and starts the pool; shutting it down
//! (or dropping it) fires RESETTING and stops the pool after it drains.

use crate::config::{RuntimeConfig, CONFIG_FILE_NAME};
use crate::error::{TxError, TxOutcome};
use crate::registry::BlueprintRegistry;
use crate::store::BundleStore;
use nirva_concurrency::ThreadPool;
use nirva_core::{HookId, Uid};
use nirva_hooks::{HookDispatcher, HookEvent};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime context passed to every entry point
pub struct Runtime {
    uid: Uid,
    config: RuntimeConfig,
    registry: Arc<BlueprintRegistry>,
    store: Arc<BundleStore>,
    pool: Arc<ThreadPool>,
    hooks: Arc<HookDispatcher>,
    open: AtomicBool,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("uid", &self.uid)
            .field("config", &self.config)
            .field("blueprints", &self.registry.len())
            .field("bundles", &self.store.len())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Runtime {
    /// Runtime with the default configuration
    pub fn new() -> TxOutcome<Arc<Self>> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Runtime configured from `nirva.toml` in `dir`
    ///
    /// A default file is written first if there is none.
    pub fn open(dir: impl AsRef<Path>) -> TxOutcome<Arc<Self>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(nirva_core::Error::from)?;
        let path = dir.join(CONFIG_FILE_NAME);
        RuntimeConfig::write_default_if_missing(&path)?;
        Self::with_config(RuntimeConfig::from_file(&path)?)
    }

    /// Runtime with an explicit configuration
    ///
    /// # Errors
    ///
    /// Invalid configuration, a standard blueprint failing validation, or
    /// the pool failing to start.
    pub fn with_config(config: RuntimeConfig) -> TxOutcome<Arc<Self>> {
        config.validate()?;
        let registry = Arc::new(BlueprintRegistry::standard()?);
        let store = Arc::new(BundleStore::with_options(
            Arc::clone(&registry),
            config.strict_ownership,
            config.retry_policy(),
        ));
        let pool = Arc::new(ThreadPool::new(config.pool_config()).map_err(TxError::from)?);
        let uid = Uid::new();
        info!(
            target: "nirva::config",
            uid = %uid,
            blueprints = registry.len(),
            min_threads = config.pool_min_threads,
            "runtime started"
        );
        Ok(Arc::new(Self {
            uid,
            hooks: Arc::new(HookDispatcher::with_retry(uid, config.retry_policy())),
            config,
            registry,
            store,
            pool,
            open: AtomicBool::new(true),
        }))
    }

    /// Uid of the runtime
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Configuration in force
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Bundle store
    pub fn store(&self) -> &Arc<BundleStore> {
        &self.store
    }

    /// Blueprint registry
    pub fn blueprints(&self) -> &Arc<BlueprintRegistry> {
        &self.registry
    }

    /// Thread pool running transforms and proc threads
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Global hook stacks (FATAL, RESETTING, THREAD_EXIT and friends)
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.hooks
    }

    /// True until shut down
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Fire RESETTING, wait for queued work and stop the pool
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.hooks
            .trigger_spontaneous(&HookEvent::new(HookId::RESETTING, self.uid));
        self.pool.drain();
        self.pool.shutdown();
        self.hooks.clear_all();
        debug!(target: "nirva::config", uid = %self.uid, "runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirva_hooks::Callback;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn small() -> RuntimeConfig {
        RuntimeConfig {
            pool_min_threads: 1,
            pool_max_threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_standard_blueprints_registered() {
        let rt = Runtime::with_config(small()).unwrap();
        assert!(rt.blueprints().get("VALUE").is_some());
        let id = rt.store().create("VALUE").unwrap();
        assert!(rt.store().contains(id));
    }

    #[test]
    fn test_shutdown_fires_resetting_once() {
        let rt = Runtime::with_config(small()).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        rt.hooks()
            .add(
                HookId::RESETTING,
                Callback::check("count", move |_| {
                    f.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            )
            .unwrap();
        rt.shutdown();
        rt.shutdown();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!rt.is_open());
        assert!(rt.pool().is_shut_down());
    }

    #[test]
    fn test_open_writes_default_config() {
        let dir = TempDir::new().unwrap();
        let rt = Runtime::open(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(rt.config(), &RuntimeConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = RuntimeConfig {
            pool_min_threads: 0,
            ..Default::default()
        };
        assert!(Runtime::with_config(cfg).is_err());
    }
}
