//! Runtime handle: the single lock in front of the script engine
//!
//! The engine is only reachable through a [`RuntimeGuard`], so holding the
//! lock is a precondition the compiler checks for every marshalling,
//! loading and invocation path. Dropping the guard releases the lock on
//! every exit path, including early returns and `?`.

use crate::config::RuntimeConfig;
use crate::runtime::loader::{LoadedModules, ModuleLoader};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rhai::module_resolvers::{FileModuleResolver, ModuleResolversCollection};
use rhai::Engine;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

static SHARED: OnceLock<Arc<RuntimeHandle>> = OnceLock::new();

/// The embedded engine and its module loader
///
/// Only reachable while the runtime lock is held.
pub struct Interpreter {
    pub(crate) engine: Engine,
    pub(crate) loader: ModuleLoader,
    pub(crate) modules: LoadedModules,
}

impl Interpreter {
    /// The underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The module loader
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }
}

/// Process-wide mutual exclusion around the script engine
///
/// At most one thread executes script code at any instant. The lock is
/// reentrant: a thread that already holds it can acquire it again without
/// deadlocking.
pub struct RuntimeHandle {
    inner: ReentrantMutex<Interpreter>,
    config: RuntimeConfig,
}

impl RuntimeHandle {
    /// Create a runtime from configuration
    pub fn new(config: RuntimeConfig) -> Self {
        RuntimeHandleBuilder::new().config(config).build()
    }

    /// Create a builder
    pub fn builder() -> RuntimeHandleBuilder {
        RuntimeHandleBuilder::new()
    }

    /// The lazily created process-wide runtime (default configuration)
    pub fn shared() -> Arc<RuntimeHandle> {
        SHARED
            .get_or_init(|| Arc::new(RuntimeHandle::new(RuntimeConfig::default())))
            .clone()
    }

    /// Block until the lock is available and take it
    pub fn acquire(&self) -> RuntimeGuard<'_> {
        RuntimeGuard {
            guard: self.inner.lock(),
        }
    }

    /// Take the lock if no other thread holds it
    pub fn try_acquire(&self) -> Option<RuntimeGuard<'_>> {
        self.inner.try_lock().map(|guard| RuntimeGuard { guard })
    }

    /// Whether any thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("config", &self.config)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Scoped ownership of the runtime lock
pub struct RuntimeGuard<'a> {
    guard: ReentrantMutexGuard<'a, Interpreter>,
}

impl Deref for RuntimeGuard<'_> {
    type Target = Interpreter;

    fn deref(&self) -> &Interpreter {
        &self.guard
    }
}

type EngineHook = Box<dyn FnOnce(&mut Engine)>;

/// Builder for [`RuntimeHandle`]
pub struct RuntimeHandleBuilder {
    config: RuntimeConfig,
    search_paths: Vec<PathBuf>,
    hooks: Vec<EngineHook>,
}

impl RuntimeHandleBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            search_paths: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Replace the configuration
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a module search path
    ///
    /// Paths added here replace the configured defaults; they are searched
    /// in the order they were added.
    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Limit the number of operations per engine entry
    pub fn max_operations(mut self, operations: u64) -> Self {
        self.config.max_operations = Some(operations);
        self
    }

    /// Limit function call nesting
    pub fn max_call_levels(mut self, levels: usize) -> Self {
        self.config.max_call_levels = Some(levels);
        self
    }

    /// Adjust the engine before it is sealed behind the lock
    ///
    /// Hosts register native functions and types here.
    pub fn configure(mut self, hook: impl FnOnce(&mut Engine) + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Build the runtime
    pub fn build(mut self) -> RuntimeHandle {
        if !self.search_paths.is_empty() {
            self.config.search_paths = std::mem::take(&mut self.search_paths);
        }
        let config = self.config;

        let mut engine = Engine::new();

        let modules = LoadedModules::default();
        let mut resolvers = ModuleResolversCollection::new();
        resolvers.push(modules.clone());
        for path in &config.search_paths {
            resolvers.push(FileModuleResolver::new_with_path_and_extension(
                path.clone(),
                config.extension.as_str(),
            ));
        }
        engine.set_module_resolver(resolvers);

        engine.on_print(|text| {
            info!(target: "rivven_script::script", "{}", text);
        });
        engine.on_debug(|text, source, pos| {
            debug!(
                target: "rivven_script::script",
                source = source.unwrap_or_default(),
                position = %pos,
                "{}",
                text
            );
        });

        if let Some(operations) = config.max_operations {
            engine.set_max_operations(operations);
        }
        if let Some(levels) = config.max_call_levels {
            engine.set_max_call_levels(levels);
        }
        if let Some(depth) = config.max_expr_depth {
            engine.set_max_expr_depths(depth, depth);
        }

        for hook in self.hooks {
            hook(&mut engine);
        }

        debug!(
            search_paths = ?config.search_paths,
            extension = %config.extension,
            "Created script runtime"
        );

        let loader = ModuleLoader::new(config.search_paths.clone(), config.extension.clone());

        RuntimeHandle {
            inner: ReentrantMutex::new(Interpreter {
                engine,
                loader,
                modules,
            }),
            config,
        }
    }
}

impl Default for RuntimeHandleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_acquire_release() {
        let runtime = RuntimeHandle::new(RuntimeConfig::default());
        assert!(!runtime.is_locked());
        {
            let _guard = runtime.acquire();
            assert!(runtime.is_locked());
        }
        assert!(!runtime.is_locked());
    }

    #[test]
    fn test_reentrant_on_same_thread() {
        let runtime = RuntimeHandle::new(RuntimeConfig::default());
        let outer = runtime.acquire();
        let inner = runtime.acquire();
        drop(inner);
        assert!(runtime.is_locked());
        drop(outer);
        assert!(!runtime.is_locked());
    }

    #[test]
    fn test_excludes_other_threads() {
        let runtime = Arc::new(RuntimeHandle::new(RuntimeConfig::default()));
        let guard = runtime.acquire();

        let other = runtime.clone();
        let acquired = thread::spawn(move || other.try_acquire().is_some())
            .join()
            .unwrap();
        assert!(!acquired);

        drop(guard);
        let other = runtime.clone();
        let acquired = thread::spawn(move || other.try_acquire().is_some())
            .join()
            .unwrap();
        assert!(acquired);
    }

    #[test]
    fn test_shared_is_singleton() {
        let a = RuntimeHandle::shared();
        let b = RuntimeHandle::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_builder_search_paths_and_hooks() {
        let configured = Arc::new(AtomicBool::new(false));
        let flag = configured.clone();

        let runtime = RuntimeHandle::builder()
            .search_path("/opt/scripts")
            .search_path("./scripts")
            .max_operations(10_000)
            .configure(move |engine| {
                engine.register_fn("answer", || 42_i64);
                flag.store(true, Ordering::SeqCst);
            })
            .build();

        assert!(configured.load(Ordering::SeqCst));
        assert_eq!(
            runtime.config().search_paths,
            vec![PathBuf::from("/opt/scripts"), PathBuf::from("./scripts")]
        );
        assert_eq!(runtime.config().max_operations, Some(10_000));

        let guard = runtime.acquire();
        let answer: i64 = guard.engine().eval("answer()").unwrap();
        assert_eq!(answer, 42);
    }
}
