// resolve.rs — Name resolution and unit inference for equation sets
//
// Builds the `Namespace` for one equation set (state variables, caller
// constants, clock variables, referenced functions), then lowers each update
// equation into a backend-neutral `Node` tree while inferring its unit.
//
// Preconditions: `set` is a well-formed AST from the parser.
// Postconditions: every identifier in the returned `ResolvedSet` is bound, and
//                 each update's inferred unit equals its declared unit.
// Failure modes: `CompileError` on the first unresolved name, arity error, or
//                dimension mismatch. Resolution stops there.
// Side effects: none.

use std::collections::BTreeMap;

use tracing::trace;

use crate::ast::*;
use crate::error::CompileError;
use crate::id::SlotId;
use crate::registry::{FunctionSpec, Registry};
use crate::units::{self, Dimension, Quantity, UnitError};

// ── Caller constants ────────────────────────────────────────────────────────

/// External scalar constants visible to an equation set (`scalar = 3`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constants {
    values: BTreeMap<String, Quantity>,
}

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimensionless constant.
    pub fn with(self, name: impl Into<String>, value: f64) -> Self {
        self.with_unit(name, value, Dimension::DIMENSIONLESS)
    }

    pub fn with_unit(mut self, name: impl Into<String>, value: f64, dim: Dimension) -> Self {
        self.values.insert(name.into(), Quantity::new(value, dim));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, quantity: Quantity) {
        self.values.insert(name.into(), quantity);
    }

    pub fn get(&self, name: &str) -> Option<&Quantity> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Quantity)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ── Namespace ───────────────────────────────────────────────────────────────

/// Time values supplied by the scheduler on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockVar {
    /// `t`
    Time,
    /// `dt`
    Step,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub unit: Dimension,
    /// Index of the update equation that writes this variable, if any.
    pub defined_by: Option<usize>,
}

impl Variable {
    pub fn is_target(&self) -> bool {
        self.defined_by.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum Binding {
    State(SlotId),
    Constant(Quantity),
    Clock(ClockVar),
    Function(FunctionSpec),
}

/// Resolved bindings for one equation set. Read-only once built.
#[derive(Debug, Clone)]
pub struct Namespace {
    variables: Vec<Variable>,
    bindings: BTreeMap<String, Binding>,
}

impl Namespace {
    /// State variables in slot order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, slot: SlotId) -> &Variable {
        &self.variables[slot.index()]
    }

    pub fn slot(&self, name: &str) -> Option<SlotId> {
        match self.bindings.get(name) {
            Some(Binding::State(slot)) => Some(*slot),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Functions referenced by the equation set, in name order.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionSpec> {
        self.bindings.values().filter_map(|b| match b {
            Binding::Function(spec) => Some(spec),
            _ => None,
        })
    }

    fn build(
        set: &EquationSet,
        registry: &Registry,
        constants: &Constants,
    ) -> Result<Namespace, CompileError> {
        let mut variables: Vec<Variable> = Vec::new();
        let mut bindings = BTreeMap::new();

        let mut update_index = 0;
        for eq in &set.equations {
            let name = &eq.target.name;
            if bindings.contains_key(name) {
                return Err(CompileError::DuplicateTarget { name: name.clone() });
            }
            let unit = units::eval_unit_expr(&eq.unit).map_err(|source| {
                CompileError::InvalidUnit {
                    target: name.clone(),
                    source,
                }
            })?;
            let defined_by = eq.rhs.as_ref().map(|_| {
                update_index += 1;
                update_index - 1
            });
            let slot = SlotId(variables.len() as u32);
            variables.push(Variable {
                name: name.clone(),
                unit,
                defined_by,
            });
            bindings.insert(name.clone(), Binding::State(slot));
        }

        for (name, quantity) in constants.iter() {
            bindings
                .entry(name.to_string())
                .or_insert(Binding::Constant(*quantity));
        }
        bindings
            .entry("t".to_string())
            .or_insert(Binding::Clock(ClockVar::Time));
        bindings
            .entry("dt".to_string())
            .or_insert(Binding::Clock(ClockVar::Step));

        let mut called = Vec::new();
        let mut referenced = Vec::new();
        for eq in set.updates() {
            if let Some(rhs) = &eq.rhs {
                collect_names(rhs, &mut called, &mut referenced);
            }
        }
        for name in called {
            if bindings.contains_key(name) {
                continue;
            }
            let spec = registry
                .resolve(name)
                .map_err(|_| CompileError::UnknownFunction {
                    name: name.to_string(),
                })?;
            bindings.insert(name.to_string(), Binding::Function(spec.clone()));
        }
        // Bare references to registered functions are bound as well;
        // `lower` rejects them with `NotAValue`.
        for name in referenced {
            if bindings.contains_key(name) {
                continue;
            }
            if let Some(spec) = registry.lookup(name) {
                bindings.insert(name.to_string(), Binding::Function(spec.clone()));
            }
        }

        Ok(Namespace {
            variables,
            bindings,
        })
    }
}

fn collect_names<'a>(expr: &'a Expr, calls: &mut Vec<&'a str>, idents: &mut Vec<&'a str>) {
    match &expr.kind {
        ExprKind::Number(_) => {}
        ExprKind::Ident(id) => idents.push(&id.name),
        ExprKind::Unary { operand, .. } => collect_names(operand, calls, idents),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_names(lhs, calls, idents);
            collect_names(rhs, calls, idents);
        }
        ExprKind::Call { name, args } => {
            calls.push(&name.name);
            for arg in args {
                collect_names(arg, calls, idents);
            }
        }
    }
}

// ── Lowered form ────────────────────────────────────────────────────────────

/// Backend-neutral expression tree with every name resolved.
#[derive(Debug, Clone)]
pub enum Node {
    Const(f64),
    Var(SlotId),
    Clock(ClockVar),
    Neg(Box<Node>),
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Call {
        function: FunctionSpec,
        args: Vec<Node>,
    },
}

impl Node {
    fn constant_value(&self) -> Option<f64> {
        match self {
            Node::Const(v) => Some(*v),
            Node::Neg(inner) => inner.constant_value().map(|v| -v),
            _ => None,
        }
    }

    /// Append every state slot the expression reads, in visit order.
    pub fn collect_slots(&self, out: &mut Vec<SlotId>) {
        match self {
            Node::Var(slot) => out.push(*slot),
            Node::Const(_) | Node::Clock(_) => {}
            Node::Neg(inner) => inner.collect_slots(out),
            Node::Binary { lhs, rhs, .. } => {
                lhs.collect_slots(out);
                rhs.collect_slots(out);
            }
            Node::Call { args, .. } => {
                for arg in args {
                    arg.collect_slots(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Update {
    pub target: SlotId,
    pub expr: Node,
}

/// An equation set bound to its namespace, ready for code generation.
#[derive(Debug, Clone)]
pub struct ResolvedSet {
    pub namespace: Namespace,
    pub updates: Vec<Update>,
}

impl ResolvedSet {
    pub fn target_names(&self) -> Vec<&str> {
        self.updates
            .iter()
            .map(|u| self.namespace.variable(u.target).name.as_str())
            .collect()
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Resolve every identifier in `set` and check units equation by equation.
pub fn resolve(
    set: &EquationSet,
    registry: &Registry,
    constants: &Constants,
) -> Result<ResolvedSet, CompileError> {
    let namespace = Namespace::build(set, registry, constants)?;
    let mut updates = Vec::new();

    for eq in set.equations.iter() {
        let Some(rhs) = &eq.rhs else { continue };
        let target = namespace
            .slot(&eq.target.name)
            .ok_or_else(|| CompileError::UndefinedIdentifier {
                name: eq.target.name.clone(),
            })?;
        let (expr, found) = lower(rhs, &namespace)?;
        let declared = namespace.variable(target).unit;
        if found != declared {
            return Err(CompileError::DimensionMismatch {
                context: format!("equation for `{}`", eq.target.name),
                expected: declared,
                found,
            });
        }
        trace!(target = %eq.target.name, unit = %declared, "equation resolved");
        updates.push(Update { target, expr });
    }

    Ok(ResolvedSet { namespace, updates })
}

fn lower(expr: &Expr, ns: &Namespace) -> Result<(Node, Dimension), CompileError> {
    match &expr.kind {
        ExprKind::Number(n) => Ok((Node::Const(*n), Dimension::DIMENSIONLESS)),

        ExprKind::Ident(id) => match ns.get(&id.name) {
            Some(Binding::State(slot)) => Ok((Node::Var(*slot), ns.variable(*slot).unit)),
            Some(Binding::Constant(q)) => Ok((Node::Const(q.value), q.dim)),
            Some(Binding::Clock(var)) => Ok((Node::Clock(*var), Dimension::second())),
            Some(Binding::Function(_)) => Err(CompileError::NotAValue {
                name: id.name.clone(),
            }),
            None => Err(CompileError::UndefinedIdentifier {
                name: id.name.clone(),
            }),
        },

        ExprKind::Unary { op, operand } => {
            let (node, dim) = lower(operand, ns)?;
            match op {
                UnaryOp::Neg => Ok((Node::Neg(Box::new(node)), dim)),
                UnaryOp::Plus => Ok((node, dim)),
            }
        }

        ExprKind::Binary { op, lhs, rhs } => {
            let (l, ldim) = lower(lhs, ns)?;
            let (r, rdim) = lower(rhs, ns)?;
            let dim = match op {
                BinaryOp::Add | BinaryOp::Sub => {
                    if ldim != rdim {
                        return Err(CompileError::DimensionMismatch {
                            context: format!("operands of `{op}` in `{expr}`"),
                            expected: ldim,
                            found: rdim,
                        });
                    }
                    ldim
                }
                BinaryOp::Mul => ldim.mul(rdim),
                BinaryOp::Div => ldim.div(rdim),
                BinaryOp::Pow => {
                    if !rdim.is_dimensionless() {
                        return Err(CompileError::DimensionMismatch {
                            context: format!("exponent in `{expr}`"),
                            expected: Dimension::DIMENSIONLESS,
                            found: rdim,
                        });
                    }
                    if ldim.is_dimensionless() {
                        ldim
                    } else {
                        let k = r
                            .constant_value()
                            .ok_or(CompileError::NonConstantExponent { base: ldim })?;
                        ldim.powf(k).map_err(|source| CompileError::Units {
                            context: format!("`{expr}`"),
                            source,
                        })?
                    }
                }
            };
            Ok((
                Node::Binary {
                    op: *op,
                    lhs: Box::new(l),
                    rhs: Box::new(r),
                },
                dim,
            ))
        }

        ExprKind::Call { name, args } => {
            let function = match ns.get(&name.name) {
                Some(Binding::Function(spec)) => spec.clone(),
                Some(_) => {
                    return Err(CompileError::NotCallable {
                        name: name.name.clone(),
                    })
                }
                None => {
                    return Err(CompileError::UnknownFunction {
                        name: name.name.clone(),
                    })
                }
            };
            if args.len() != function.arity() {
                return Err(CompileError::ArityMismatch {
                    name: name.name.clone(),
                    expected: function.arity(),
                    found: args.len(),
                });
            }
            let mut nodes = Vec::with_capacity(args.len());
            let mut dims = Vec::with_capacity(args.len());
            for arg in args {
                let (node, dim) = lower(arg, ns)?;
                nodes.push(node);
                dims.push(dim);
            }
            let dim = function.result_unit(&dims).map_err(|e| match e {
                UnitError::DimensionMismatch {
                    context,
                    expected,
                    found,
                } => CompileError::DimensionMismatch {
                    context: format!("{context} of `{}`", name.name),
                    expected,
                    found,
                },
                source => CompileError::Units {
                    context: format!("call to `{}`", name.name),
                    source,
                },
            })?;
            Ok((
                Node::Call {
                    function,
                    args: nodes,
                },
                dim,
            ))
        }
    }
}
