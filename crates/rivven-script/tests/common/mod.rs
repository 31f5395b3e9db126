//! Shared helpers for rivven-script integration tests

#![allow(dead_code)]

use rivven_script::prelude::*;
use rivven_script::rhai::Engine;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Route log output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rivven_script=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A throwaway directory of script modules
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: TempDir::new().expect("failed to create script dir"),
        }
    }

    /// Write `<name>.rhai`; dots in `name` become directories
    pub fn module(self, name: &str, body: &str) -> Self {
        let path = self
            .dir
            .path()
            .join(format!("{}.rhai", name.replace('.', "/")));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create module dir");
        }
        fs::write(path, body).expect("failed to write module");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh runtime searching this directory
    pub fn runtime(&self) -> Arc<RuntimeHandle> {
        self.runtime_with(|_| {})
    }

    /// A fresh runtime searching this directory, with extra engine setup
    pub fn runtime_with(&self, configure: impl FnOnce(&mut Engine) + 'static) -> Arc<RuntimeHandle> {
        Arc::new(
            RuntimeHandle::builder()
                .search_path(self.path())
                .configure(configure)
                .build(),
        )
    }
}

/// Build a bridge on `runtime` reporting into a fresh observer
pub fn bridge(
    config: BridgeConfig,
    runtime: Arc<RuntimeHandle>,
) -> (ScriptBridge, Arc<CollectingObserver>) {
    let observer = Arc::new(CollectingObserver::new());
    let bridge = ScriptBridge::builder(config)
        .runtime(runtime)
        .observer(observer.clone())
        .build();
    (bridge, observer)
}
