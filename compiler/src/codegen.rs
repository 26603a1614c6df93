// codegen.rs — C++ code generation for resolved equation sets
//
// Transforms a `ResolvedSet` into a standalone C++ program. The program reads
// the element count, the clock values and every state array from stdin as
// hex-encoded IEEE-754 bit patterns, runs each update as an element-wise loop,
// and writes the update targets back in the same encoding.
//
// Preconditions: `resolve::resolve` completed without errors.
// Postconditions: returns `NativeSource`; `missing` lists every referenced
//                 function without native code, in first-use order.
// Failure modes: none. Missing native code is reported, not rejected.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::ast::BinaryOp;
use crate::codeobject::Backend;
use crate::registry::FunctionSpec;
use crate::resolve::{ClockVar, Node, ResolvedSet};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NativeSource {
    /// Complete translation unit.
    pub source: String,
    /// Per-element statements, one per update, in execution order.
    pub statements: Vec<String>,
    /// Slot names in the order the kernel reads them.
    pub inputs: Vec<String>,
    /// Target names in the order the kernel writes them.
    pub outputs: Vec<String>,
    /// Referenced functions with no native code fragment.
    pub missing: Vec<String>,
}

// ── Generator ───────────────────────────────────────────────────────────────

const PRELUDE: &str = "\
#include <cmath>
#include <cstdint>
#include <cstdio>
#include <cstring>
#include <vector>
";

const IO_HELPERS: &str = "\
static double _from_bits(unsigned long long b) {
    double d;
    std::memcpy(&d, &b, sizeof d);
    return d;
}

static unsigned long long _to_bits(double d) {
    unsigned long long b;
    std::memcpy(&b, &d, sizeof b);
    return b;
}

static bool _read_array(std::vector<double>& v, size_t n) {
    v.resize(n);
    for (size_t i = 0; i < n; ++i) {
        unsigned long long b;
        if (std::scanf(\"%llx\", &b) != 1) return false;
        v[i] = _from_bits(b);
    }
    return true;
}

static void _write_array(const std::vector<double>& v) {
    for (double d : v) std::printf(\"%016llx\\n\", _to_bits(d));
}
";

struct CodegenCtx<'a> {
    resolved: &'a ResolvedSet,
    /// Functions in first-use order, deduplicated by name.
    used: Vec<&'a FunctionSpec>,
    seen: BTreeSet<&'a str>,
}

impl<'a> CodegenCtx<'a> {
    fn new(resolved: &'a ResolvedSet) -> Self {
        CodegenCtx {
            resolved,
            used: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    fn collect_functions(&mut self, node: &'a Node) {
        match node {
            Node::Const(_) | Node::Var(_) | Node::Clock(_) => {}
            Node::Neg(inner) => self.collect_functions(inner),
            Node::Binary { lhs, rhs, .. } => {
                self.collect_functions(lhs);
                self.collect_functions(rhs);
            }
            Node::Call { function, args } => {
                if self.seen.insert(function.name()) {
                    self.used.push(function);
                }
                for arg in args {
                    self.collect_functions(arg);
                }
            }
        }
    }

    fn emit_expr(&self, node: &Node, out: &mut String) {
        match node {
            Node::Const(v) => out.push_str(&literal(*v)),
            Node::Var(slot) => {
                let _ = write!(out, "_var_{}[_i]", self.resolved.namespace.variable(*slot).name);
            }
            Node::Clock(ClockVar::Time) => out.push_str("_clock_t"),
            Node::Clock(ClockVar::Step) => out.push_str("_clock_dt"),
            Node::Neg(inner) => {
                out.push_str("(-");
                self.emit_expr(inner, out);
                out.push(')');
            }
            Node::Binary {
                op: BinaryOp::Pow,
                lhs,
                rhs,
            } => {
                out.push_str("pow(");
                self.emit_expr(lhs, out);
                out.push_str(", ");
                self.emit_expr(rhs, out);
                out.push(')');
            }
            Node::Binary { op, lhs, rhs } => {
                out.push('(');
                self.emit_expr(lhs, out);
                let _ = write!(out, " {op} ");
                self.emit_expr(rhs, out);
                out.push(')');
            }
            Node::Call { function, args } => {
                out.push_str(function.name());
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.emit_expr(arg, out);
                }
                out.push(')');
            }
        }
    }
}

/// C++ literal for a double with a round-trip exact decimal representation.
fn literal(v: f64) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string()
    } else if v.is_sign_negative() {
        format!("({v:?})")
    } else {
        format!("{v:?}")
    }
}

/// Generate the native kernel for `resolved`.
pub fn generate(resolved: &ResolvedSet) -> NativeSource {
    let mut ctx = CodegenCtx::new(resolved);
    for update in &resolved.updates {
        ctx.collect_functions(&update.expr);
    }

    let missing: Vec<String> = ctx
        .used
        .iter()
        .filter(|f| !f.supports(Backend::Native))
        .map(|f| f.name().to_string())
        .collect();

    let statements: Vec<String> = resolved
        .updates
        .iter()
        .map(|u| {
            let mut stmt = format!(
                "_var_{}[_i] = ",
                resolved.namespace.variable(u.target).name
            );
            ctx.emit_expr(&u.expr, &mut stmt);
            stmt.push(';');
            stmt
        })
        .collect();

    let inputs: Vec<String> = resolved
        .namespace
        .variables()
        .iter()
        .map(|v| v.name.clone())
        .collect();
    let outputs: Vec<String> = resolved
        .target_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut src = String::new();
    src.push_str("// Generated by eqsim. Do not edit.\n");
    src.push_str(PRELUDE);
    src.push('\n');

    // Function fragments: hash-defines first, then support code.
    let fragments: Vec<_> = ctx
        .used
        .iter()
        .filter_map(|f| f.fragment(Backend::Native))
        .collect();
    for frag in &fragments {
        if !frag.hashdefine_code.is_empty() {
            let _ = writeln!(src, "{}", frag.hashdefine_code.trim_end());
        }
    }
    for frag in &fragments {
        if !frag.support_code.is_empty() {
            let _ = writeln!(src, "{}", frag.support_code.trim_end());
        }
    }
    src.push('\n');
    src.push_str(IO_HELPERS);
    src.push('\n');

    src.push_str("int main() {\n");
    src.push_str("    unsigned long long _n_in, _t_bits, _dt_bits;\n");
    src.push_str("    if (std::scanf(\"%llu %llx %llx\", &_n_in, &_t_bits, &_dt_bits) != 3) return 2;\n");
    src.push_str("    const size_t _n = (size_t)_n_in;\n");
    src.push_str("    const double _clock_t = _from_bits(_t_bits);\n");
    src.push_str("    const double _clock_dt = _from_bits(_dt_bits);\n");
    src.push_str("    (void)_clock_t;\n");
    src.push_str("    (void)_clock_dt;\n");
    for name in &inputs {
        let _ = writeln!(src, "    std::vector<double> _var_{name};");
        let _ = writeln!(src, "    if (!_read_array(_var_{name}, _n)) return 2;");
    }
    for stmt in &statements {
        src.push_str("    for (size_t _i = 0; _i < _n; ++_i) {\n");
        let _ = writeln!(src, "        {stmt}");
        src.push_str("    }\n");
    }
    for name in &outputs {
        let _ = writeln!(src, "    _write_array(_var_{name});");
    }
    src.push_str("    return 0;\n");
    src.push_str("}\n");

    NativeSource {
        source: src,
        statements,
        inputs,
        outputs,
        missing,
    }
}
