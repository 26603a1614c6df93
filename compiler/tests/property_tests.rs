// Property-based tests for compiler and scheduler invariants.
//
// Four categories:
// 1. Parser: printing an expression and parsing it back is a fixed point
// 2. Units: dimension algebra is a group under mul/div
// 3. Interpreted backend: element-wise evaluation preserves length and order
// 4. Scheduler: monitor size and step counts follow the clock
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::BTreeMap;

use eqsim::clock::Clock;
use eqsim::network::{Group, Network};
use eqsim::{Backend, Compiler, Constants, Dimension, Registry, Snapshot};
use proptest::prelude::*;

// ── Expression generator ────────────────────────────────────────────────────

/// Source text for a random expression over `x` and `y`, built from numbers,
/// every operator, and unary calls to dimensionless built-ins.
fn arb_expr() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        Just("x".to_string()),
        Just("y".to_string()),
        (0.0f64..100.0).prop_map(|v| format!("{v}")),
        (0u32..10).prop_map(|v| v.to_string()),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), prop_oneof![Just("+"), Just("-"), Just("*"), Just("/")], inner.clone())
                .prop_map(|(a, op, b)| format!("{a} {op} {b}")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) ** ({b})")),
            inner.clone().prop_map(|a| format!("-({a})")),
            (
                prop_oneof![Just("sin"), Just("exp"), Just("tanh"), Just("sqrt")],
                inner
            )
                .prop_map(|(f, a)| format!("{f}({a})")),
        ]
    })
}

fn rhs_display(source: &str) -> String {
    let parsed = eqsim::parser::parse(source);
    assert!(parsed.errors.is_empty(), "{source}: {:?}", parsed.errors);
    let set = parsed.equations.expect("equations");
    set.equations[0]
        .rhs
        .as_ref()
        .expect("update equation")
        .to_string()
}

fn arb_dimension() -> impl Strategy<Value = Dimension> {
    prop::array::uniform7(-3i8..=3).prop_map(Dimension::new)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn printed_expressions_reparse_identically(expr in arb_expr()) {
        let first = rhs_display(&format!("z = {expr} : 1"));
        let second = rhs_display(&format!("z = {first} : 1"));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn generated_expressions_compile(expr in arb_expr()) {
        let registry = Registry::new();
        let source = format!("z = {expr} : 1\nx : 1\ny : 1");
        let code = Compiler::new(&registry)
            .compile_source(&source, &Constants::new(), Backend::Interpreted);
        prop_assert!(code.is_ok(), "{}: {:?}", source, code.err());
    }

    #[test]
    fn dimension_mul_div_inverse(a in arb_dimension(), b in arb_dimension()) {
        prop_assert_eq!(a.mul(b).div(b), a);
        prop_assert_eq!(a.mul(b), b.mul(a));
        prop_assert!(a.div(a).is_dimensionless());
        prop_assert_eq!(a.recip().recip(), a);
    }

    #[test]
    fn interpreted_execution_is_element_wise(
        xs in prop::collection::vec(-10.0f64..10.0, 0..64),
    ) {
        let registry = Registry::new();
        let code = Compiler::new(&registry)
            .compile_source(
                "z = x * x - 2 * x + 1 : 1\nx : 1",
                &Constants::new(),
                Backend::Interpreted,
            )
            .unwrap();
        let values: BTreeMap<String, Vec<f64>> = [("x".to_string(), xs.clone())].into();
        let out = code.execute(&Snapshot::new(xs.len(), &values)).unwrap();
        let expected: Vec<f64> = xs.iter().map(|x| x * x - 2.0 * x + 1.0).collect();
        prop_assert_eq!(&out["z"], &expected);
    }

    #[test]
    fn monitor_size_follows_ticks(len in 0usize..16, ticks in 0u64..20) {
        let registry = Registry::new();
        let compiler = Compiler::new(&registry);
        let group = Group::from_source(
            "G",
            len,
            &compiler,
            "v = v + 1 : 1",
            &Constants::new(),
            Backend::Interpreted,
        )
        .unwrap();
        let dt = 1e-4;
        let mut net = Network::new(Clock::new(dt).unwrap());
        let gid = net.add_group(group);
        let mon = net.add_monitor(gid, "v").unwrap();
        net.run(ticks as f64 * dt).unwrap();

        let monitor = net.monitor(mon).unwrap();
        prop_assert_eq!(monitor.len() as u64, ticks);
        prop_assert_eq!(monitor.flatten().len(), len * ticks as usize);
        prop_assert_eq!(net.clock().step(), ticks);
    }

    #[test]
    fn step_count_round_trips(
        steps in 0u64..100_000,
        dt in prop_oneof![Just(1e-4), Just(5e-5), Just(0.1), Just(1.0 / 3.0)],
    ) {
        let clock = Clock::new(dt).unwrap();
        prop_assert_eq!(clock.steps_for(steps as f64 * dt).unwrap(), steps);
    }
}
