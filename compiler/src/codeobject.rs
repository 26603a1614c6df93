// codeobject.rs — Backend selection and compiled code objects
//
// `Compiler` binds a registry (and optionally a native toolchain) and turns
// an equation set into a `CodeObject` for one backend. Both variants expose
// the same `execute(snapshot) -> outputs` contract.
//
// Preconditions: the registry outlives the compiler; code objects own their
//                resolved namespace and do not borrow it.
// Postconditions: a returned `CodeObject` has passed name resolution and unit
//                 checking. Native capability gaps surface at execution.
// Failure modes: `CompileError` during `compile`; `ExecError` during `execute`.
// Side effects: native execution spawns the toolchain and the built kernel.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::EquationSet;
use crate::codegen;
use crate::error::{CompileError, ExecError};
use crate::interp::InterpretedCode;
use crate::native::{NativeCode, NativeToolchain};
use crate::registry::Registry;
use crate::resolve::{self, Constants, Namespace, ResolvedSet};

// ── Backend tag ─────────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Closures over the canonical implementations.
    #[default]
    Interpreted,
    /// Generated C++ compiled by the host toolchain.
    Native,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Interpreted, Backend::Native];

    pub fn tag(self) -> &'static str {
        match self {
            Backend::Interpreted => "interpreted",
            Backend::Native => "native",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::ALL
            .into_iter()
            .find(|b| b.tag() == s)
            .ok_or_else(|| format!("unknown backend `{s}`"))
    }
}

// ── Snapshots ───────────────────────────────────────────────────────────────

/// Values written by one execution, keyed by update target.
pub type Outputs = BTreeMap<String, Vec<f64>>;

/// Input to one execution: the state arrays plus the current clock values.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub len: usize,
    pub t: f64,
    pub dt: f64,
    pub values: &'a BTreeMap<String, Vec<f64>>,
}

impl<'a> Snapshot<'a> {
    pub fn new(len: usize, values: &'a BTreeMap<String, Vec<f64>>) -> Self {
        Snapshot {
            len,
            t: 0.0,
            dt: 0.0,
            values,
        }
    }

    pub fn at(self, t: f64, dt: f64) -> Self {
        Snapshot { t, dt, ..self }
    }
}

/// Collect one array per namespace slot. Update targets absent from the
/// snapshot start at zero; free variables must be present.
pub(crate) fn gather_slots(
    namespace: &Namespace,
    snapshot: &Snapshot<'_>,
) -> Result<Vec<Vec<f64>>, ExecError> {
    namespace
        .variables()
        .iter()
        .map(|var| match snapshot.values.get(&var.name) {
            Some(values) if values.len() == snapshot.len => Ok(values.clone()),
            Some(values) => Err(ExecError::LengthMismatch {
                name: var.name.clone(),
                expected: snapshot.len,
                found: values.len(),
            }),
            None if var.is_target() => Ok(vec![0.0; snapshot.len]),
            None => Err(ExecError::MissingVariable {
                name: var.name.clone(),
            }),
        })
        .collect()
}

// ── Code objects ────────────────────────────────────────────────────────────

/// A compiled equation set bound to one backend. Immutable after creation
/// apart from the native backend's build cache.
#[derive(Debug)]
pub enum CodeObject {
    Interpreted(InterpretedCode),
    Native(NativeCode),
}

impl CodeObject {
    pub fn backend(&self) -> Backend {
        match self {
            CodeObject::Interpreted(_) => Backend::Interpreted,
            CodeObject::Native(_) => Backend::Native,
        }
    }

    pub fn resolved(&self) -> &ResolvedSet {
        match self {
            CodeObject::Interpreted(code) => code.resolved(),
            CodeObject::Native(code) => code.resolved(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.resolved().namespace
    }

    /// Names of the variables written on each execution.
    pub fn targets(&self) -> Vec<&str> {
        self.resolved().target_names()
    }

    /// One-time work before the first execution. The native backend checks
    /// capabilities and builds its kernel here; the interpreted one has none.
    pub fn prepare(&self) -> Result<(), ExecError> {
        match self {
            CodeObject::Interpreted(_) => Ok(()),
            CodeObject::Native(code) => code.prepare(),
        }
    }

    pub fn execute(&self, snapshot: &Snapshot<'_>) -> Result<Outputs, ExecError> {
        match self {
            CodeObject::Interpreted(code) => code.execute(snapshot),
            CodeObject::Native(code) => code.execute(snapshot),
        }
    }
}

// ── Compiler ────────────────────────────────────────────────────────────────

/// Expression compiler for one session: a registry plus the backends the
/// host can run.
pub struct Compiler<'r> {
    registry: &'r Registry,
    toolchain: Option<NativeToolchain>,
}

impl<'r> Compiler<'r> {
    /// A compiler limited to the interpreted backend.
    pub fn new(registry: &'r Registry) -> Self {
        Compiler {
            registry,
            toolchain: None,
        }
    }

    /// Enable the native backend with `toolchain` (if one was found).
    pub fn with_toolchain(mut self, toolchain: Option<NativeToolchain>) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn available_backends(&self) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|b| *b == Backend::Interpreted || self.toolchain.is_some())
            .collect()
    }

    pub fn compile(
        &self,
        set: &EquationSet,
        constants: &Constants,
        backend: Backend,
    ) -> Result<CodeObject, CompileError> {
        let resolved = resolve::resolve(set, self.registry, constants)?;
        debug!(
            %backend,
            equations = set.equations.len(),
            updates = resolved.updates.len(),
            "compiling equation set"
        );
        match backend {
            Backend::Interpreted => Ok(CodeObject::Interpreted(InterpretedCode::new(resolved))),
            Backend::Native => {
                let toolchain = self
                    .toolchain
                    .clone()
                    .ok_or(CompileError::BackendUnavailable { backend })?;
                let source = codegen::generate(&resolved);
                Ok(CodeObject::Native(NativeCode::new(
                    resolved, source, toolchain,
                )))
            }
        }
    }

    /// Parse and compile equation text.
    pub fn compile_source(
        &self,
        source: &str,
        constants: &Constants,
        backend: Backend,
    ) -> Result<CodeObject, CompileError> {
        let parsed = crate::parser::parse(source);
        if !parsed.errors.is_empty() {
            let message = parsed
                .errors
                .iter()
                .map(|e| format!("{}..{}: {}", e.span().start, e.span().end, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CompileError::Parse(message));
        }
        let set = parsed
            .equations
            .ok_or_else(|| CompileError::Parse("no equations produced".to_string()))?;
        self.compile(&set, constants, backend)
    }
}
