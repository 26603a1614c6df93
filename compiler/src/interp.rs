// interp.rs — Interpreted backend
//
// Compiles each resolved update into a tree of boxed closures that evaluate
// element-wise over whole arrays, calling the canonical implementation of
// every referenced function.
//
// Preconditions: `ResolvedSet` produced by `resolve::resolve`.
// Postconditions: `execute` returns one array per update target, each of the
//                 snapshot length.
// Failure modes: missing or wrongly sized input arrays.
// Side effects: none.

use crate::ast::BinaryOp;
use crate::codeobject::{gather_slots, Outputs, Snapshot};
use crate::error::ExecError;
use crate::id::SlotId;
use crate::resolve::{ClockVar, Namespace, Node, ResolvedSet};

/// Read-only view of the current state while one update is evaluated.
pub struct Frame<'a> {
    pub len: usize,
    pub slots: &'a [Vec<f64>],
    pub t: f64,
    pub dt: f64,
}

/// Compiled expression: evaluates to an array of `frame.len` values.
pub type Kernel = Box<dyn Fn(&Frame<'_>) -> Vec<f64> + Send + Sync>;

pub struct InterpretedCode {
    resolved: ResolvedSet,
    kernels: Vec<(SlotId, Kernel)>,
}

impl std::fmt::Debug for InterpretedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpretedCode")
            .field("targets", &self.resolved.target_names())
            .finish_non_exhaustive()
    }
}

impl InterpretedCode {
    pub fn new(resolved: ResolvedSet) -> Self {
        let kernels = resolved
            .updates
            .iter()
            .map(|u| (u.target, compile_node(&u.expr)))
            .collect();
        InterpretedCode { resolved, kernels }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.resolved.namespace
    }

    pub fn resolved(&self) -> &ResolvedSet {
        &self.resolved
    }

    /// Run every update in declaration order. Later updates see the values
    /// written by earlier ones.
    pub fn execute(&self, snapshot: &Snapshot<'_>) -> Result<Outputs, ExecError> {
        let mut slots = gather_slots(&self.resolved.namespace, snapshot)?;
        for (target, kernel) in &self.kernels {
            let values = {
                let frame = Frame {
                    len: snapshot.len,
                    slots: &slots,
                    t: snapshot.t,
                    dt: snapshot.dt,
                };
                kernel(&frame)
            };
            slots[target.index()] = values;
        }

        let mut outputs = Outputs::new();
        for (target, _) in &self.kernels {
            let name = &self.resolved.namespace.variable(*target).name;
            outputs.insert(name.clone(), slots[target.index()].clone());
        }
        Ok(outputs)
    }
}

fn binary_fn(op: BinaryOp) -> fn(f64, f64) -> f64 {
    match op {
        BinaryOp::Add => |a, b| a + b,
        BinaryOp::Sub => |a, b| a - b,
        BinaryOp::Mul => |a, b| a * b,
        BinaryOp::Div => |a, b| a / b,
        BinaryOp::Pow => f64::powf,
    }
}

fn compile_node(node: &Node) -> Kernel {
    match node {
        Node::Const(c) => {
            let c = *c;
            Box::new(move |f: &Frame<'_>| vec![c; f.len])
        }
        Node::Var(slot) => {
            let i = slot.index();
            Box::new(move |f: &Frame<'_>| f.slots[i].clone())
        }
        Node::Clock(ClockVar::Time) => Box::new(|f: &Frame<'_>| vec![f.t; f.len]),
        Node::Clock(ClockVar::Step) => Box::new(|f: &Frame<'_>| vec![f.dt; f.len]),
        Node::Neg(inner) => {
            let inner = compile_node(inner);
            Box::new(move |f: &Frame<'_>| {
                let mut values = inner(f);
                for v in values.iter_mut() {
                    *v = -*v;
                }
                values
            })
        }
        Node::Binary { op, lhs, rhs } => {
            let apply = binary_fn(*op);
            let lhs = compile_node(lhs);
            let rhs = compile_node(rhs);
            Box::new(move |f: &Frame<'_>| {
                let a = lhs(f);
                let b = rhs(f);
                a.iter().zip(&b).map(|(x, y)| apply(*x, *y)).collect()
            })
        }
        Node::Call { function, args } => {
            let implementation = function.implementation().clone();
            let args: Vec<Kernel> = args.iter().map(compile_node).collect();
            Box::new(move |f: &Frame<'_>| {
                let columns: Vec<Vec<f64>> = args.iter().map(|k| k(f)).collect();
                let mut row = vec![0.0; columns.len()];
                (0..f.len)
                    .map(|i| {
                        for (slot, column) in row.iter_mut().zip(&columns) {
                            *slot = column[i];
                        }
                        implementation(&row)
                    })
                    .collect()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::resolve::{resolve, Constants};
    use std::collections::BTreeMap;

    fn compile(source: &str, constants: &Constants) -> InterpretedCode {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let resolved = resolve(&parsed.equations.unwrap(), &Registry::new(), constants).unwrap();
        InterpretedCode::new(resolved)
    }

    fn state(pairs: &[(&str, &[f64])]) -> BTreeMap<String, Vec<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn sine_over_test_array() {
        let code = compile("func = sin(variable) : 1\nvariable : 1", &Constants::new());
        let input = [-1.0, -0.5, 0.0, 0.5, 1.0];
        let values = state(&[("variable", &input)]);
        let out = code.execute(&Snapshot::new(5, &values)).unwrap();
        let expected: Vec<f64> = input.iter().map(|x| x.sin()).collect();
        assert_eq!(out["func"], expected);
    }

    #[test]
    fn power_with_constant_exponent() {
        let code = compile(
            "func = variable ** scalar : 1\nvariable : 1",
            &Constants::new().with("scalar", 3.0),
        );
        let values = state(&[("variable", &[-1.0, -0.5, 0.0, 0.5, 1.0])]);
        let out = code.execute(&Snapshot::new(5, &values)).unwrap();
        assert_eq!(out["func"], vec![-1.0, -0.125, 0.0, 0.125, 1.0]);
    }

    #[test]
    fn updates_run_in_order() {
        let code = compile(
            "a = x + 1 : 1\nb = a * 2 : 1\nx : 1",
            &Constants::new(),
        );
        let values = state(&[("x", &[1.0, 2.0])]);
        let out = code.execute(&Snapshot::new(2, &values)).unwrap();
        assert_eq!(out["a"], vec![2.0, 3.0]);
        assert_eq!(out["b"], vec![4.0, 6.0]);
    }

    #[test]
    fn clock_values_broadcast() {
        let code = compile("elapsed = t + dt : second", &Constants::new());
        let values = BTreeMap::new();
        let out = code
            .execute(&Snapshot::new(3, &values).at(0.5, 0.25))
            .unwrap();
        assert_eq!(out["elapsed"], vec![0.75; 3]);
    }

    #[test]
    fn out_of_domain_yields_nan() {
        let code = compile("y = arccos(x) : 1\nx : 1", &Constants::new());
        let values = state(&[("x", &[2.0, 0.0])]);
        let out = code.execute(&Snapshot::new(2, &values)).unwrap();
        assert!(out["y"][0].is_nan());
        assert_eq!(out["y"][1], 0.0f64.acos());
    }

    #[test]
    fn missing_free_variable() {
        let code = compile("y = x : 1\nx : 1", &Constants::new());
        let values = BTreeMap::new();
        let err = code.execute(&Snapshot::new(2, &values)).unwrap_err();
        assert!(matches!(err, ExecError::MissingVariable { name } if name == "x"));
    }

    #[test]
    fn wrong_length() {
        let code = compile("y = x : 1\nx : 1", &Constants::new());
        let values = state(&[("x", &[1.0])]);
        let err = code.execute(&Snapshot::new(2, &values)).unwrap_err();
        assert!(matches!(err, ExecError::LengthMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn empty_arrays() {
        let code = compile("y = sin(x) : 1\nx : 1", &Constants::new());
        let values = state(&[("x", &[])]);
        let out = code.execute(&Snapshot::new(0, &values)).unwrap();
        assert!(out["y"].is_empty());
    }
}
