// registry.rs — Function registry
//
// Catalog of functions callable from equations. Each entry pairs one
// canonical implementation (used by the interpreted backend) with optional
// per-backend code fragments (support code + hash-define code) consumed by
// native code generation. Built-in math functions are seeded on construction.
//
// Preconditions: none.
// Postconditions: every registered `FunctionSpec` has passed its unit check.
// Failure modes: `RegistryError` for incompatible duplicates, unknown names,
//                and unit-inconsistent declarations. Declared units other
//                than dimensionless need a unit rule or a unit-aware
//                implementation to be checked against.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::codeobject::Backend;
use crate::units::{self, Dimension, Quantity, UnitError, UnitFn, UnitRule};

// ── Data types ──────────────────────────────────────────────────────────────

/// Canonical scalar kernel: receives one value per declared argument.
pub type CanonicalFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Backend-specific code attached to a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeFragment {
    /// Definitions emitted once before the generated kernel.
    pub support_code: String,
    /// Preprocessor lines emitted after the standard includes.
    pub hashdefine_code: String,
}

impl CodeFragment {
    pub fn new(support_code: impl Into<String>, hashdefine_code: impl Into<String>) -> Self {
        CodeFragment {
            support_code: support_code.into(),
            hashdefine_code: hashdefine_code.into(),
        }
    }
}

/// Declared argument and result units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSignature {
    pub inputs: Vec<Dimension>,
    pub output: Dimension,
}

/// An immutable, unit-checked function description.
#[derive(Clone)]
pub struct FunctionSpec {
    name: String,
    signature: UnitSignature,
    implementation: CanonicalFn,
    unit_rule: Option<UnitRule>,
    fragments: BTreeMap<Backend, CodeFragment>,
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("fragments", &self.fragments.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FunctionSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.signature.inputs.len()
    }

    pub fn signature(&self) -> &UnitSignature {
        &self.signature
    }

    pub fn implementation(&self) -> &CanonicalFn {
        &self.implementation
    }

    pub fn fragment(&self, backend: Backend) -> Option<&CodeFragment> {
        self.fragments.get(&backend)
    }

    /// The interpreted backend runs the canonical implementation directly;
    /// every other backend needs an explicit fragment.
    pub fn supports(&self, backend: Backend) -> bool {
        backend == Backend::Interpreted || self.fragments.contains_key(&backend)
    }

    /// Result dimension for a call with the given argument dimensions.
    pub fn result_unit(&self, args: &[Dimension]) -> Result<Dimension, UnitError> {
        if args.len() != self.arity() {
            return Err(UnitError::ArityMismatch {
                expected: self.arity(),
                found: args.len(),
            });
        }
        if let Some(rule) = self.unit_rule {
            return rule(args);
        }
        for (i, (found, expected)) in args.iter().zip(&self.signature.inputs).enumerate() {
            if found != expected {
                return Err(UnitError::DimensionMismatch {
                    context: format!("argument {} of `{}`", i + 1, self.name),
                    expected: *expected,
                    found: *found,
                });
            }
        }
        Ok(self.signature.output)
    }

    /// Call the raw implementation.
    pub fn call(&self, args: &[f64]) -> Result<f64, UnitError> {
        if args.len() != self.arity() {
            return Err(UnitError::ArityMismatch {
                expected: self.arity(),
                found: args.len(),
            });
        }
        Ok((self.implementation)(args))
    }

    /// Call with unit-bearing arguments. Dimensions are checked first; the
    /// value is exactly what `call` would return.
    pub fn call_with_units(&self, args: &[Quantity]) -> Result<Quantity, UnitError> {
        let dims: Vec<Dimension> = args.iter().map(|q| q.dim).collect();
        let dim = self.result_unit(&dims)?;
        let values: Vec<f64> = args.iter().map(|q| q.value).collect();
        Ok(Quantity::new(self.call(&values)?, dim))
    }

    /// Same name, arity, and declared units.
    pub fn is_compatible(&self, other: &FunctionSpec) -> bool {
        self.name == other.name && self.signature == other.signature
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Assembles a `FunctionSpec` from a canonical implementation plus optional
/// unit declarations and backend fragments. `build` runs the unit check.
pub struct FunctionBuilder {
    name: String,
    arity: usize,
    implementation: CanonicalFn,
    units: Option<UnitSignature>,
    unit_rule: Option<UnitRule>,
    unit_impl: Option<UnitFn>,
    fragments: BTreeMap<Backend, CodeFragment>,
}

impl FunctionBuilder {
    pub fn new(
        name: impl Into<String>,
        arity: usize,
        implementation: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        FunctionBuilder {
            name: name.into(),
            arity,
            implementation: Arc::new(implementation),
            units: None,
            unit_rule: None,
            unit_impl: None,
            fragments: BTreeMap::new(),
        }
    }

    /// Single-argument function from a plain `f64 -> f64`.
    pub fn unary(name: impl Into<String>, f: fn(f64) -> f64) -> Self {
        Self::new(name, 1, move |args: &[f64]| f(args[0]))
    }

    /// Declare argument and result units. Defaults to all dimensionless.
    pub fn units(mut self, inputs: &[Dimension], output: Dimension) -> Self {
        self.units = Some(UnitSignature {
            inputs: inputs.to_vec(),
            output,
        });
        self
    }

    /// How the implementation transforms units. Checked against the
    /// declared signature at build time and used for inference afterwards.
    pub fn unit_rule(mut self, rule: UnitRule) -> Self {
        self.unit_rule = Some(rule);
        self
    }

    /// The implementation over unit-bearing values. `build` calls it once
    /// with dummy operands in the declared input units and compares the
    /// result unit with the declared output.
    pub fn unit_impl(
        mut self,
        f: impl Fn(&[Quantity]) -> Result<Quantity, UnitError> + Send + Sync + 'static,
    ) -> Self {
        self.unit_impl = Some(Arc::new(f));
        self
    }

    pub fn code(mut self, backend: Backend, fragment: CodeFragment) -> Self {
        self.fragments.insert(backend, fragment);
        self
    }

    /// Shorthand for a native-backend fragment.
    pub fn native(self, support_code: &str, hashdefine_code: &str) -> Self {
        self.code(Backend::Native, CodeFragment::new(support_code, hashdefine_code))
    }

    pub fn build(self) -> Result<FunctionSpec, UnitError> {
        let signature = self.units.unwrap_or_else(|| UnitSignature {
            inputs: vec![Dimension::DIMENSIONLESS; self.arity],
            output: Dimension::DIMENSIONLESS,
        });
        if signature.inputs.len() != self.arity {
            return Err(UnitError::ArityMismatch {
                expected: self.arity,
                found: signature.inputs.len(),
            });
        }
        if let Some(rule) = self.unit_rule {
            units::check(&self.name, rule, &signature.inputs, signature.output)?;
        }
        if let Some(f) = &self.unit_impl {
            units::check_operands(&self.name, f, &signature.inputs, signature.output)?;
        }
        // A plain f64 kernel maps dimensionless values to dimensionless
        // values; anything else has nothing to check against.
        let dimensionless = signature.output.is_dimensionless()
            && signature.inputs.iter().all(Dimension::is_dimensionless);
        if self.unit_rule.is_none() && self.unit_impl.is_none() && !dimensionless {
            return Err(UnitError::Unchecked { name: self.name });
        }
        Ok(FunctionSpec {
            name: self.name,
            signature,
            implementation: self.implementation,
            unit_rule: self.unit_rule,
            fragments: self.fragments,
        })
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("function `{name}` is already registered with a different signature")]
    DuplicateName { name: String },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error(transparent)]
    Units(#[from] UnitError),
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Function catalog scoped to one compilation session.
#[derive(Debug, Clone)]
pub struct Registry {
    functions: BTreeMap<String, FunctionSpec>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry seeded with the built-in math functions.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        let specs = builtins();
        debug_assert!(specs.is_ok(), "built-in function table failed its unit check");
        match specs {
            Ok(specs) => {
                for spec in specs {
                    registry.functions.insert(spec.name.clone(), spec);
                }
            }
            Err(e) => error!(error = %e, "built-in function table failed its unit check"),
        }
        registry
    }

    pub fn empty() -> Self {
        Registry {
            functions: BTreeMap::new(),
        }
    }

    /// Add a function. Re-registering a name with a compatible signature
    /// replaces the previous entry.
    pub fn register(&mut self, spec: FunctionSpec) -> Result<(), RegistryError> {
        if let Some(existing) = self.functions.get(&spec.name) {
            if !existing.is_compatible(&spec) {
                return Err(RegistryError::DuplicateName { name: spec.name });
            }
            debug!(name = %spec.name, "replacing registered function");
        }
        self.functions.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&FunctionSpec, RegistryError> {
        self.functions
            .get(name)
            .ok_or_else(|| RegistryError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionSpec> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Deterministic compact JSON listing of the catalog.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            name: &'a str,
            inputs: Vec<String>,
            output: String,
            backends: Vec<Backend>,
        }

        let entries: Vec<Entry<'_>> = self
            .functions
            .values()
            .map(|spec| Entry {
                name: &spec.name,
                inputs: spec.signature.inputs.iter().map(|d| d.to_string()).collect(),
                output: spec.signature.output.to_string(),
                backends: Backend::ALL
                    .iter()
                    .copied()
                    .filter(|b| spec.supports(*b))
                    .collect(),
            })
            .collect();
        serde_json::to_string(&entries)
    }
}

// ── Built-ins ───────────────────────────────────────────────────────────────

fn builtins() -> Result<Vec<FunctionSpec>, UnitError> {
    // (name, implementation, unit rule, native hash-define)
    let table: [(&str, fn(f64) -> f64, UnitRule, &str); 16] = [
        ("sin", f64::sin, units::dimensionless_rule, ""),
        ("cos", f64::cos, units::dimensionless_rule, ""),
        ("tan", f64::tan, units::dimensionless_rule, ""),
        ("sinh", f64::sinh, units::dimensionless_rule, ""),
        ("cosh", f64::cosh, units::dimensionless_rule, ""),
        ("tanh", f64::tanh, units::dimensionless_rule, ""),
        ("arcsin", f64::asin, units::dimensionless_rule, "#define arcsin asin"),
        ("arccos", f64::acos, units::dimensionless_rule, "#define arccos acos"),
        ("arctan", f64::atan, units::dimensionless_rule, "#define arctan atan"),
        ("exp", f64::exp, units::dimensionless_rule, ""),
        ("log", f64::ln, units::dimensionless_rule, ""),
        ("log10", f64::log10, units::dimensionless_rule, ""),
        ("sqrt", f64::sqrt, units::sqrt_rule, ""),
        ("ceil", f64::ceil, units::preserve_rule, ""),
        ("floor", f64::floor, units::preserve_rule, ""),
        ("abs", f64::abs, units::preserve_rule, "#define abs fabs"),
    ];

    table
        .into_iter()
        .map(|(name, f, rule, hashdefine)| {
            FunctionBuilder::unary(name, f)
                .unit_rule(rule)
                .native("", hashdefine)
                .build()
        })
        .collect()
}
