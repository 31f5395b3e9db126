//! Module loading and lifecycle symbol resolution
//!
//! A module body runs exactly once, at load time, and is captured as a
//! [`rhai::Module`]: its public functions keep the body's top-level
//! `import` aliases and constants, and its exported variables become the
//! module's attributes. The evaluated module is registered with the
//! engine's resolver under a private key, and callables are entered through
//! a qualified call (`key::queue(record)`) so that environment is in effect.

use crate::diagnostics::{describe_exception, UNKNOWN_CALLABLE};
use crate::error::{Result, ScriptError};
use crate::runtime::handle::Interpreter;
use parking_lot::RwLock;
use rhai::{
    Dynamic, Engine, EvalAltResult, FnAccess, FnPtr, Module, ModuleResolver, Position, Scope,
    Shared, AST,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolver key prefix of loaded modules
const LOADED_PREFIX: &str = "@script/";

/// Alias a loaded module is imported under by entry scripts
const ENTRY_ALIAS: &str = "__module";

/// Variable holding the marshalled record in entry scripts
pub(crate) const RECORD_VAR: &str = "__record";

/// Locates script modules on the search paths
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    search_paths: Vec<PathBuf>,
    extension: String,
}

impl ModuleLoader {
    /// Create a loader
    pub fn new(search_paths: Vec<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            search_paths,
            extension: extension.into(),
        }
    }

    /// Configured search paths
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Resolve a module name to a script file
    ///
    /// A name carrying the script extension is treated as a path (used as
    /// is, then relative to each search path). Any other name is a dotted
    /// module name: `handlers.audit` → `handlers/audit.rhai`.
    pub fn locate(&self, name: &str) -> Result<PathBuf> {
        let mut candidates = Vec::with_capacity(self.search_paths.len() + 1);

        let as_path = Path::new(name);
        if as_path
            .extension()
            .is_some_and(|ext| ext == self.extension.as_str())
        {
            candidates.push(as_path.to_path_buf());
            if as_path.is_relative() {
                candidates.extend(self.search_paths.iter().map(|dir| dir.join(as_path)));
            }
        } else {
            let relative = format!("{}.{}", name.replace('.', "/"), self.extension);
            candidates.extend(self.search_paths.iter().map(|dir| dir.join(&relative)));
        }

        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(ScriptError::ModuleNotFound {
                module: name.to_string(),
                searched: candidates,
            }),
        }
    }
}

/// Evaluated modules reachable through the engine's `import` statement
///
/// Installed as the first resolver of the engine. Keys are handed out by
/// [`Interpreter::load_module`] and released when the [`ModuleRef`] drops.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadedModules {
    modules: Arc<RwLock<HashMap<String, Shared<Module>>>>,
    next_id: Arc<AtomicU64>,
}

impl LoadedModules {
    fn register(&self, module: Shared<Module>) -> String {
        let key = format!(
            "{}{}",
            LOADED_PREFIX,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        self.modules.write().insert(key.clone(), module);
        key
    }

    fn unregister(&self, key: &str) {
        self.modules.write().remove(key);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.modules.read().len()
    }
}

impl ModuleResolver for LoadedModules {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> std::result::Result<Shared<Module>, Box<EvalAltResult>> {
        self.modules
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| EvalAltResult::ErrorModuleNotFound(path.to_string(), pos).into())
    }
}

/// A loaded script module
///
/// The module stays importable by its entry scripts for as long as this
/// value is alive.
pub struct ModuleRef {
    name: String,
    path: PathBuf,
    ast: AST,
    module: Shared<Module>,
    key: String,
    registry: LoadedModules,
}

impl ModuleRef {
    /// Name the module was loaded by
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved script file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compiled script
    pub fn ast(&self) -> &AST {
        &self.ast
    }

    /// Value of an exported module variable
    pub fn variable(&self, name: &str) -> Option<Dynamic> {
        self.module.get_var(name)
    }

    /// Names of the script functions the module defines
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ast
            .iter_functions()
            .map(|f| f.name.to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRef")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("key", &self.key)
            .finish()
    }
}

impl Drop for ModuleRef {
    fn drop(&mut self) {
        self.registry.unregister(&self.key);
    }
}

/// Precompiled calls into a module function
#[derive(Debug, Clone)]
pub struct EntryPoints {
    nullary: AST,
    unary: AST,
}

impl EntryPoints {
    /// Entry script for a call with or without the record argument
    pub(crate) fn script(&self, with_record: bool) -> &AST {
        if with_record {
            &self.unary
        } else {
            &self.nullary
        }
    }
}

/// A resolved script callable
#[derive(Debug, Clone)]
pub enum Callable {
    /// A public script function, possibly overloaded by arity
    Function {
        name: String,
        arities: Vec<usize>,
        entry: EntryPoints,
    },
    /// An exported module variable holding a function pointer or closure
    Pointer(FnPtr),
}

impl Callable {
    /// Best-effort readable name
    pub fn name(&self) -> &str {
        match self {
            Self::Function { name, .. } => name,
            Self::Pointer(ptr) if ptr.is_anonymous() => UNKNOWN_CALLABLE,
            Self::Pointer(ptr) => ptr.fn_name(),
        }
    }

    /// Whether a call with `argc` arguments can match
    ///
    /// Function pointers may curry arguments, so they always match.
    pub fn accepts(&self, argc: usize) -> bool {
        match self {
            Self::Function { arities, .. } => arities.contains(&argc),
            Self::Pointer(_) => true,
        }
    }
}

impl Interpreter {
    /// Import a module through the engine's own `import` statement
    ///
    /// The engine's resolvers cache the evaluated module, so later `import`
    /// statements in user scripts reuse it.
    pub fn import(&self, name: &str) -> std::result::Result<(), Box<EvalAltResult>> {
        let mut scope = Scope::new();
        scope.push_constant("module_path", name.replace('.', "/"));
        self.engine.run_with_scope(&mut scope, "import module_path;")
    }

    /// Locate, compile and evaluate a module
    pub fn load_module(&self, name: &str) -> Result<ModuleRef> {
        let path = self.loader.locate(name)?;

        let mut ast = self
            .engine
            .compile_file(path.clone())
            .map_err(|e| ScriptError::module_load(name, describe_exception(&e)))?;
        ast.set_source(name);

        let module = Module::eval_ast_as_new(Scope::new(), &ast, &self.engine)
            .map_err(|e| ScriptError::module_load(name, describe_exception(&e)))?;
        let module = Shared::new(module);
        let key = self.modules.register(module.clone());

        debug!(module = %name, path = %path.display(), key = %key, "Loaded script module");

        Ok(ModuleRef {
            name: name.to_string(),
            path,
            ast,
            module,
            key,
            registry: self.modules.clone(),
        })
    }

    /// Look up a callable attribute of a module
    ///
    /// Public script functions take precedence over exported variables.
    /// Absent, blank, private or non-callable attributes resolve to `None`.
    pub fn resolve(&self, module: &ModuleRef, attr: Option<&str>) -> Option<Callable> {
        let attr = attr.map(str::trim).filter(|a| !a.is_empty())?;

        let arities: Vec<usize> = module
            .ast
            .iter_functions()
            .filter(|f| f.name == attr && f.access == FnAccess::Public)
            .map(|f| f.params.len())
            .collect();
        if !arities.is_empty() {
            return match self.entry_points(&module.key, attr) {
                Ok(entry) => Some(Callable::Function {
                    name: attr.to_string(),
                    arities,
                    entry,
                }),
                Err(err) => {
                    warn!(
                        module = %module.name,
                        function = %attr,
                        error = %describe_exception(&err),
                        "Failed to prepare script function entry"
                    );
                    None
                }
            };
        }

        let value = module.variable(attr)?;
        let type_name = value.type_name();
        match value.try_cast::<FnPtr>() {
            Some(ptr) => Some(Callable::Pointer(ptr)),
            None => {
                debug!(
                    module = %module.name,
                    attribute = %attr,
                    type_name = %type_name,
                    "Module attribute is not callable"
                );
                None
            }
        }
    }

    fn entry_points(
        &self,
        key: &str,
        function: &str,
    ) -> std::result::Result<EntryPoints, Box<EvalAltResult>> {
        let call = |args: &str| {
            self.engine
                .compile(format!(
                    "import \"{key}\" as {ENTRY_ALIAS}; {ENTRY_ALIAS}::{function}({args});"
                ))
                .map_err(Box::<EvalAltResult>::from)
        };
        Ok(EntryPoints {
            nullary: call("")?,
            unary: call(RECORD_VAR)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeHandle;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, body: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_locate_dotted_name() {
        let dir = TempDir::new().unwrap();
        write(&dir, "handlers/audit.rhai", "fn queue(r) {}");

        let loader = ModuleLoader::new(vec![dir.path().to_path_buf()], "rhai");
        let found = loader.locate("handlers.audit").unwrap();
        assert_eq!(found, dir.path().join("handlers/audit.rhai"));
    }

    #[test]
    fn test_locate_search_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(&first, "dest.rhai", "");
        write(&second, "dest.rhai", "");

        let loader = ModuleLoader::new(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            "rhai",
        );
        assert_eq!(loader.locate("dest").unwrap(), first.path().join("dest.rhai"));
    }

    #[test]
    fn test_locate_explicit_path() {
        let dir = TempDir::new().unwrap();
        write(&dir, "scripts/dest.rhai", "");
        let absolute = dir.path().join("scripts/dest.rhai");

        let loader = ModuleLoader::new(vec![dir.path().to_path_buf()], "rhai");
        assert_eq!(loader.locate(absolute.to_str().unwrap()).unwrap(), absolute);
        assert_eq!(loader.locate("scripts/dest.rhai").unwrap(), absolute);
    }

    #[test]
    fn test_locate_missing_lists_candidates() {
        let dir = TempDir::new().unwrap();
        let loader = ModuleLoader::new(vec![dir.path().to_path_buf()], "rhai");

        match loader.locate("missing") {
            Err(ScriptError::ModuleNotFound { module, searched }) => {
                assert_eq!(module, "missing");
                assert_eq!(searched, vec![dir.path().join("missing.rhai")]);
            }
            other => panic!("expected ModuleNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_and_resolve() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "dest.rhai",
            r#"
export const limit = 10;
export const handler = |r| r;
export const named = Fn("queue");
let hidden = |r| r;

fn init() {}
fn queue(r) { r }
fn queue(r, extra) { r }
private fn helper() {}
"#,
        );

        let runtime = RuntimeHandle::builder().search_path(dir.path()).build();
        let rt = runtime.acquire();
        let module = rt.load_module("dest").unwrap();

        assert_eq!(module.name(), "dest");
        assert!(module.function_names().contains(&"queue".to_string()));
        assert_eq!(module.variable("limit").unwrap().as_int().unwrap(), 10);

        match rt.resolve(&module, Some("queue")) {
            Some(Callable::Function {
                name, mut arities, ..
            }) => {
                arities.sort();
                assert_eq!(name, "queue");
                assert_eq!(arities, vec![1, 2]);
            }
            other => panic!("expected script function, got {:?}", other),
        }

        let init = rt.resolve(&module, Some("init")).unwrap();
        assert!(init.accepts(0));
        assert!(!init.accepts(1));

        let handler = rt.resolve(&module, Some("handler")).unwrap();
        assert_eq!(handler.name(), UNKNOWN_CALLABLE);
        assert!(handler.accepts(1));

        let named = rt.resolve(&module, Some("named")).unwrap();
        assert_eq!(named.name(), "queue");

        assert!(rt.resolve(&module, Some("limit")).is_none());
        assert!(rt.resolve(&module, Some("hidden")).is_none());
        assert!(rt.resolve(&module, Some("helper")).is_none());
        assert!(rt.resolve(&module, Some("deinit")).is_none());
        assert!(rt.resolve(&module, Some("  ")).is_none());
        assert!(rt.resolve(&module, None).is_none());
    }

    #[test]
    fn test_module_registration_follows_module_ref() {
        let dir = TempDir::new().unwrap();
        write(&dir, "dest.rhai", "fn queue(r) {}");

        let runtime = RuntimeHandle::builder().search_path(dir.path()).build();
        let rt = runtime.acquire();
        assert_eq!(rt.modules.len(), 0);

        let first = rt.load_module("dest").unwrap();
        let second = rt.load_module("dest").unwrap();
        assert_eq!(rt.modules.len(), 2);

        drop(first);
        assert_eq!(rt.modules.len(), 1);
        drop(second);
        assert_eq!(rt.modules.len(), 0);
    }

    #[test]
    fn test_load_syntax_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.rhai", "fn queue(r) { let = ; }");

        let runtime = RuntimeHandle::builder().search_path(dir.path()).build();
        let rt = runtime.acquire();
        match rt.load_module("broken") {
            Err(ScriptError::ModuleLoad { module, message }) => {
                assert_eq!(module, "broken");
                assert!(message.starts_with("ParseError: "), "{}", message);
            }
            other => panic!("expected ModuleLoad, got {:?}", other),
        }
    }

    #[test]
    fn test_load_body_raises() {
        let dir = TempDir::new().unwrap();
        write(&dir, "raises.rhai", r#"throw "bad module";"#);

        let runtime = RuntimeHandle::builder().search_path(dir.path()).build();
        let rt = runtime.acquire();
        let err = rt.load_module("raises").unwrap_err();
        assert!(err.to_string().contains("RuntimeError: bad module"));
    }

    #[test]
    fn test_import_uses_engine_resolver() {
        let dir = TempDir::new().unwrap();
        write(&dir, "helpers.rhai", "fn shout(s) { s.to_upper() }");

        let runtime = RuntimeHandle::builder().search_path(dir.path()).build();
        let rt = runtime.acquire();

        assert!(rt.import("helpers").is_ok());
        assert!(rt.import("does_not_exist").is_err());
    }

    #[test]
    fn test_top_level_import_and_constant_reach_functions() {
        let dir = TempDir::new().unwrap();
        write(&dir, "helpers.rhai", "fn shout(s) { s.to_upper() }");
        write(
            &dir,
            "dest.rhai",
            r#"
import "helpers" as h;
const SUFFIX = "!";

fn queue(r) {
    if h::shout(r) + global::SUFFIX != "HI!" { throw "unexpected"; }
}
"#,
        );

        let runtime = RuntimeHandle::builder().search_path(dir.path()).build();
        let rt = runtime.acquire();
        let module = rt.load_module("dest").unwrap();
        let queue = rt.resolve(&module, Some("queue")).unwrap();

        assert!(rt.call(&module, &queue, Some(Dynamic::from("hi".to_string()))).is_ok());
    }
}
