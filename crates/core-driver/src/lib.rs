//! Top-module-driven traversal and the script execution seam.
//!
//! The driver is the only component with a view of the whole run: it locates
//! module files, pushes each through preprocess → lex → parse, memoizes
//! parsed modules in a dictionary, recursively resolves instantiated
//! modules, and hands each module's embedded scripts to the [`ScriptHost`].
//! Everything is strictly sequential: one module is fully parsed and its
//! scripts fully run before the next is touched, and every stage feeds the
//! single shared edit plan the rewrite executor later consumes.
//!
//! The scripting language itself is not this crate's business. A host
//! implements [`ScriptHost`] and receives each script source together with a
//! [`ScriptApi`] capability surface; [`NoopScriptHost`] stands in when no
//! host is wired up.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use core_ast::Module;
use core_edit::{EditPlan, SharedEditPlan};
use core_lex::lex;
use core_parse::parse;
use core_preproc::{preprocess_root, PreprocState};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("could not find module {name} in module path ({searched})")]
    ModuleNotFound { name: String, searched: String },
    #[error("{file} does not declare module {name}")]
    ModuleNotInFile { name: String, file: String },
    #[error(transparent)]
    Preproc(#[from] core_preproc::PreprocError),
    #[error(transparent)]
    Lex(#[from] core_lex::LexError),
    #[error(transparent)]
    Parse(#[from] core_parse::ParseError),
    #[error(transparent)]
    Ast(#[from] core_ast::AstError),
    #[error(transparent)]
    Edit(#[from] core_edit::EditError),
    #[error("script failed in module {module}: {error:#}")]
    Script { module: String, error: anyhow::Error },
}

/// Parsed modules of one run, keyed by module name. Shared ownership with
/// interior mutability: scripts mutate modules through the dictionary while
/// instantiation nodes refer to other modules by name only.
pub type ModuleDict = HashMap<String, Rc<RefCell<Module>>>;

/// The capability surface a script sees (the module under mutation, module
/// lookup, and the include path list). The `ast` factory of the surface is
/// [`core_ast::Module::builder`] on the module itself.
pub struct ScriptApi<'a> {
    pub module: Rc<RefCell<Module>>,
    modules: &'a ModuleDict,
    pub includes: &'a [PathBuf],
}

impl ScriptApi<'_> {
    /// Resolve another module of this run by name. `None` when it has not
    /// been parsed (scripts must tolerate unavailable modules).
    pub fn get_module(&self, name: &str) -> Option<Rc<RefCell<Module>>> {
        self.modules.get(name).cloned()
    }
}

/// Host abstraction executing one embedded script in the context of a
/// module. Implementations own the script language; the driver only routes
/// sources and surfaces errors verbatim.
pub trait ScriptHost {
    /// Stable human-readable host identifier (for logs / diagnostics).
    fn name(&self) -> &'static str;
    /// Execute one script source against the given capability surface.
    fn run(&mut self, source: &str, api: &mut ScriptApi<'_>) -> anyhow::Result<()>;
}

/// No-op host used when no script language is wired up: scripts are
/// accepted and ignored.
#[derive(Default)]
pub struct NoopScriptHost;

impl ScriptHost for NoopScriptHost {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn run(&mut self, _source: &str, _api: &mut ScriptApi<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Driver {
    modpath: Vec<PathBuf>,
    incpath: Vec<PathBuf>,
    modules: ModuleDict,
    plan: SharedEditPlan,
}

impl Driver {
    pub fn new(modpath: Vec<PathBuf>, incpath: Vec<PathBuf>) -> Self {
        Self {
            modpath,
            incpath,
            modules: ModuleDict::new(),
            plan: EditPlan::shared(),
        }
    }

    pub fn edit_plan(&self) -> &SharedEditPlan {
        &self.plan
    }

    pub fn modules(&self) -> &ModuleDict {
        &self.modules
    }

    /// Locate a module source file: append `.v` unless the name already has
    /// an extension dot, then take the first hit across the module path.
    pub fn find_module(&self, name: &str) -> Result<PathBuf, DriverError> {
        let filename = if name.contains('.') {
            name.to_string()
        } else {
            format!("{name}.v")
        };
        for dir in &self.modpath {
            let candidate = dir.join(&filename);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(DriverError::ModuleNotFound {
            name: name.to_string(),
            searched: self
                .modpath
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Parse `top` (memoized), recursively resolve every module it
    /// instantiates, then run its embedded scripts through `host`.
    pub fn process(
        &mut self,
        top: &str,
        host: &mut dyn ScriptHost,
    ) -> Result<Rc<RefCell<Module>>, DriverError> {
        if let Some(module) = self.modules.get(top) {
            debug!(target: "driver", module = top, "already parsed");
            return Ok(module.clone());
        }

        let path = self.find_module(top)?;
        info!(target: "driver", module = top, file = %path.display(), "processing");
        let mut state = PreprocState::new(self.incpath.clone());
        let (annotated, edits) = preprocess_root(&path, &mut state)?;
        self.plan.borrow_mut().append(edits);

        let lexed = lex(&annotated)?;
        let parsed = parse(&lexed, &self.plan)?;

        let mut top_module = None;
        for module in parsed {
            let name = module.name().to_string();
            let module = Rc::new(RefCell::new(module));
            if name == top {
                top_module = Some(module.clone());
            }
            self.modules.insert(name, module);
        }
        let Some(module) = top_module else {
            return Err(DriverError::ModuleNotInFile {
                name: top.to_string(),
                file: path.display().to_string(),
            });
        };

        // Resolve the modules this one instantiates before its scripts run,
        // so get_module can see them.
        let instantiated: Vec<String> = module.borrow().insts().keys().cloned().collect();
        for name in instantiated {
            if self.modules.contains_key(&name) {
                continue;
            }
            self.process(&name, host)?;
        }

        self.run_scripts(&module, host)?;
        Ok(module)
    }

    fn run_scripts(
        &self,
        module: &Rc<RefCell<Module>>,
        host: &mut dyn ScriptHost,
    ) -> Result<(), DriverError> {
        let scripts = module.borrow().metav.clone();
        for script in scripts {
            let Some(source) = module
                .borrow()
                .script_source(script)
                .map(str::to_string)
            else {
                continue;
            };
            let name = module.borrow().name().to_string();
            debug!(target: "driver", module = %name, host = host.name(), "running script");
            let mut api = ScriptApi {
                module: module.clone(),
                modules: &self.modules,
                includes: &self.incpath,
            };
            host.run(&source, &mut api)
                .map_err(|error| DriverError::Script {
                    module: name,
                    error,
                })?;
        }
        Ok(())
    }

    /// Execute the accumulated edit plan, producing `<path>.out` files.
    /// Callers skip this on `--noop` and on any earlier error.
    pub fn rewrite(&self) -> Result<Vec<PathBuf>, DriverError> {
        Ok(core_edit::execute(&self.plan.borrow())?)
    }
}
