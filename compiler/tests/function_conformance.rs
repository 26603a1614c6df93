// Cross-backend conformance: every built-in function, the power operator and
// user-registered functions must give the same values on every backend, and
// the same values as the Rust reference computation.
//
// Native cases are skipped automatically if no C++ compiler is found.

use std::sync::Arc;

use eqsim::clock::Clock;
use eqsim::config::SimConfig;
use eqsim::diag::CollectingSink;
use eqsim::native::NativeToolchain;
use eqsim::network::{Group, Network, NetworkError};
use eqsim::{
    Backend, CodeFragment, CompileError, Compiler, Constants, ExecError, FunctionBuilder,
    Registry,
};

const TEST_ARRAY: [f64; 5] = [-1.0, -0.5, 0.0, 0.5, 1.0];
const DT: f64 = 1e-4;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn find_toolchain() -> Option<NativeToolchain> {
    let mut config = SimConfig::default().with_env().toolchain;
    config.cache_dir = std::env::temp_dir().join("eqsim-conformance-cache");
    NativeToolchain::detect(&config)
}

/// Every backend usable on this host, with the toolchain to compile for it.
fn backends() -> Vec<(Backend, Option<NativeToolchain>)> {
    let mut out = vec![(Backend::Interpreted, None)];
    match find_toolchain() {
        Some(tc) => out.push((Backend::Native, Some(tc))),
        None => eprintln!("SKIP: no C++ compiler found, native backend not tested"),
    }
    out
}

/// Compile `source`, set `variable` to `input`, run one tick and return the
/// recorded `func` row.
fn run_once(
    registry: &Registry,
    source: &str,
    constants: &Constants,
    backend: Backend,
    toolchain: Option<NativeToolchain>,
    input: &[f64],
) -> Result<Vec<f64>, NetworkError> {
    let compiler = Compiler::new(registry).with_toolchain(toolchain);
    let mut group = Group::from_source("G", input.len(), &compiler, source, constants, backend)?;
    group.set("variable", input)?;
    let mut net = Network::new(Clock::new(DT)?);
    let gid = net.add_group(group);
    let mon = net.add_monitor(gid, "func")?;
    net.run(DT)?;
    Ok(net.monitor(mon).map(|m| m.flatten()).unwrap_or_default())
}

/// Element-wise equality where NaN matches NaN.
fn assert_same(actual: &[f64], expected: &[f64], context: &str) {
    assert_eq!(actual.len(), expected.len(), "{context}: length");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a.is_nan() && e.is_nan()) || a == e,
            "{context}: element {i}: got {a}, expected {e}"
        );
    }
}

fn reference_functions() -> Vec<(&'static str, fn(f64) -> f64)> {
    vec![
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
        ("sinh", f64::sinh),
        ("cosh", f64::cosh),
        ("tanh", f64::tanh),
        ("arcsin", f64::asin),
        ("arccos", f64::acos),
        ("arctan", f64::atan),
        ("exp", f64::exp),
        ("log", f64::ln),
        ("log10", f64::log10),
        ("sqrt", f64::sqrt),
        ("ceil", f64::ceil),
        ("floor", f64::floor),
        ("abs", f64::abs),
    ]
}

fn usersin_registry(with_native: bool) -> Registry {
    let mut builder = FunctionBuilder::unary("usersin", f64::sin);
    if with_native {
        builder = builder.code(
            Backend::Native,
            CodeFragment::new("inline double usersin(double x) { return sin(x); }", ""),
        );
    }
    let mut registry = Registry::new();
    registry.register(builder.build().unwrap()).unwrap();
    registry
}

// ── Built-in functions ──────────────────────────────────────────────────────

#[test]
fn math_functions_match_reference_on_every_backend() {
    let registry = Registry::new();
    for (backend, toolchain) in backends() {
        for (name, reference) in reference_functions() {
            let source = format!("func = {name}(variable) : 1\nvariable : 1");
            let got = run_once(
                &registry,
                &source,
                &Constants::new(),
                backend,
                toolchain.clone(),
                &TEST_ARRAY,
            )
            .unwrap_or_else(|e| panic!("{name} on {backend}: {e}"));
            let expected: Vec<f64> = TEST_ARRAY.iter().map(|x| reference(*x)).collect();
            assert_same(&got, &expected, &format!("{name} on {backend}"));
        }
    }
}

#[test]
fn sine_scenario() {
    let registry = Registry::new();
    for (backend, toolchain) in backends() {
        let got = run_once(
            &registry,
            "func = sin(variable) : 1\nvariable : 1",
            &Constants::new(),
            backend,
            toolchain,
            &TEST_ARRAY,
        )
        .unwrap();
        let approx = [-0.8415, -0.4794, 0.0, 0.4794, 0.8415];
        for (g, a) in got.iter().zip(approx) {
            assert!((g - a).abs() < 1e-4, "{backend}: {g} vs {a}");
        }
    }
}

#[test]
fn out_of_domain_inputs_yield_nan_everywhere() {
    let registry = Registry::new();
    let input = [-2.0, 0.0, 2.0];
    for (backend, toolchain) in backends() {
        let got = run_once(
            &registry,
            "func = arccos(variable) : 1\nvariable : 1",
            &Constants::new(),
            backend,
            toolchain,
            &input,
        )
        .unwrap();
        assert!(got[0].is_nan(), "{backend}");
        assert_eq!(got[1], 0.0f64.acos(), "{backend}");
        assert!(got[2].is_nan(), "{backend}");
    }
}

#[test]
fn invalid_values_reach_the_warning_channel() {
    let registry = Registry::new();
    let compiler = Compiler::new(&registry);
    let mut group = Group::from_source(
        "G",
        2,
        &compiler,
        "func = log(variable) : 1\nvariable : 1",
        &Constants::new(),
        Backend::Interpreted,
    )
    .unwrap();
    group.set("variable", &[-1.0, 1.0]).unwrap();
    let sink = CollectingSink::new();
    let mut net = Network::new(Clock::new(DT).unwrap()).with_sink(Arc::new(sink.clone()));
    net.add_group(group);
    net.run(DT).unwrap();
    assert_eq!(sink.len(), 1);
    assert!(sink.diagnostics()[0].to_string().starts_with("warning[W0100]"));
}

// ── Operators ───────────────────────────────────────────────────────────────

#[test]
fn power_with_scalar_exponent() {
    let registry = Registry::new();
    let constants = Constants::new().with("scalar", 3.0);
    for (backend, toolchain) in backends() {
        let got = run_once(
            &registry,
            "func = variable ** scalar : 1\nvariable : 1",
            &constants,
            backend,
            toolchain,
            &TEST_ARRAY,
        )
        .unwrap();
        let expected: Vec<f64> = TEST_ARRAY.iter().map(|x| x.powf(3.0)).collect();
        assert_same(&got, &expected, &format!("power on {backend}"));
        assert_same(&got, &[-1.0, -0.125, 0.0, 0.125, 1.0], "literal values");
    }
}

#[test]
fn arithmetic_matches_across_backends() {
    let registry = Registry::new();
    let source = "func = (variable * 3 - 1) / (2 + variable ** 2) + -variable : 1\nvariable : 1";
    let expected: Vec<f64> = TEST_ARRAY
        .iter()
        .map(|x| (x * 3.0 - 1.0) / (2.0 + x.powf(2.0)) + -x)
        .collect();
    for (backend, toolchain) in backends() {
        let got = run_once(
            &registry,
            source,
            &Constants::new(),
            backend,
            toolchain,
            &TEST_ARRAY,
        )
        .unwrap();
        assert_same(&got, &expected, &format!("arithmetic on {backend}"));
    }
}

#[test]
fn zero_length_run_does_not_build_native_code() {
    let registry = Registry::new();
    let broken = NativeToolchain::new(
        "/nonexistent/eqsim-cc",
        Vec::new(),
        std::env::temp_dir().join("eqsim-conformance-broken"),
    );
    let compiler = Compiler::new(&registry).with_toolchain(Some(broken));
    let group = Group::from_source(
        "G",
        2,
        &compiler,
        "func = sin(variable) : 1\nvariable : 1",
        &Constants::new(),
        Backend::Native,
    )
    .unwrap();
    let mut net = Network::new(Clock::new(DT).unwrap());
    let gid = net.add_group(group);
    let mon = net.add_monitor(gid, "func").unwrap();

    net.run(0.0).unwrap();
    assert!(net.monitor(mon).unwrap().is_empty());
    assert!(matches!(
        net.run(DT),
        Err(NetworkError::Exec {
            source: ExecError::Toolchain { .. },
            ..
        })
    ));
}

// ── User-defined functions ──────────────────────────────────────────────────

#[test]
fn user_function_with_native_code() {
    let registry = usersin_registry(true);
    let input: [f64; 4] = [0.0, 1.0, 2.0, 3.0];
    let expected: Vec<f64> = input.iter().map(|x| x.sin()).collect();
    for (backend, toolchain) in backends() {
        let got = run_once(
            &registry,
            "func = usersin(variable) : 1\nvariable : 1",
            &Constants::new(),
            backend,
            toolchain,
            &input,
        )
        .unwrap();
        assert_same(&got, &expected, &format!("usersin on {backend}"));
    }
}

#[test]
fn user_function_without_native_code_fails_at_run_time() {
    let registry = usersin_registry(false);
    // The capability check precedes any toolchain use, so a configured but
    // absent compiler is enough here.
    let toolchain = find_toolchain().unwrap_or_else(|| {
        NativeToolchain::new("c++", Vec::new(), std::env::temp_dir().join("eqsim-unused"))
    });
    let compiler = Compiler::new(&registry).with_toolchain(Some(toolchain));

    let mut group = Group::from_source(
        "G",
        4,
        &compiler,
        "func = usersin(variable) : 1\nvariable : 1",
        &Constants::new(),
        Backend::Native,
    )
    .expect("compilation must succeed");
    group.set("variable", &[0.0, 1.0, 2.0, 3.0]).unwrap();

    let mut net = Network::new(Clock::new(DT).unwrap());
    let gid = net.add_group(group);
    let mon = net.add_monitor(gid, "func").unwrap();

    // Zero-length runs never execute, so nothing fails yet.
    net.run(0.0).unwrap();
    assert!(net.monitor(mon).unwrap().is_empty());

    let err = net.run(DT).unwrap_err();
    match err {
        NetworkError::Exec {
            source: ExecError::NotImplemented { function, backend },
            ..
        } => {
            assert_eq!(function, "usersin");
            assert_eq!(backend, Backend::Native);
        }
        other => panic!("expected NotImplemented, got {other}"),
    }
    assert!(net.monitor(mon).unwrap().is_empty());

    // The interpreted backend only needs the canonical implementation.
    let got = run_once(
        &registry,
        "func = usersin(variable) : 1\nvariable : 1",
        &Constants::new(),
        Backend::Interpreted,
        None,
        &[0.0, 1.0, 2.0, 3.0],
    )
    .unwrap();
    assert_same(&got, &[0.0, 1.0f64.sin(), 2.0f64.sin(), 3.0f64.sin()], "usersin");
}

#[test]
fn unknown_function_is_a_compile_error() {
    let registry = Registry::new();
    let err = run_once(
        &registry,
        "func = usersin(variable) : 1\nvariable : 1",
        &Constants::new(),
        Backend::Interpreted,
        None,
        &TEST_ARRAY,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        NetworkError::Compile(CompileError::UnknownFunction { .. })
    ));
}

// ── Scheduler properties ────────────────────────────────────────────────────

#[test]
fn monitor_holds_one_value_per_element_and_tick() {
    let registry = Registry::new();
    for (backend, toolchain) in backends() {
        let compiler = Compiler::new(&registry).with_toolchain(toolchain);
        let mut group = Group::from_source(
            "G",
            7,
            &compiler,
            "func = variable * 2 : 1\nvariable : 1",
            &Constants::new(),
            backend,
        )
        .unwrap();
        let input: Vec<f64> = (0..7).map(f64::from).collect();
        group.set("variable", &input).unwrap();
        let mut net = Network::new(Clock::new(DT).unwrap());
        let gid = net.add_group(group);
        let mon = net.add_monitor(gid, "func").unwrap();

        net.run(DT).unwrap();
        let flat = net.monitor(mon).unwrap().flatten();
        assert_eq!(flat, input.iter().map(|x| x * 2.0).collect::<Vec<_>>());

        net.run(2.0 * DT).unwrap();
        assert_eq!(net.monitor(mon).unwrap().flatten().len(), 7 * 3);
    }
}

#[test]
fn repeated_runs_from_reset_are_identical() {
    let registry = Registry::new();
    for (backend, toolchain) in backends() {
        let compiler = Compiler::new(&registry).with_toolchain(toolchain);
        let mut group = Group::from_source(
            "G",
            5,
            &compiler,
            "v = v + dt * tanh(variable) : second\nvariable : 1",
            &Constants::new(),
            backend,
        )
        .unwrap_or_else(|e| panic!("{backend}: {e}"));
        group.set("variable", &TEST_ARRAY).unwrap();
        let mut net = Network::new(Clock::new(DT).unwrap());
        let gid = net.add_group(group);
        let mon = net.add_monitor(gid, "v").unwrap();

        net.run(10.0 * DT).unwrap();
        let first = net.monitor(mon).unwrap().flatten();
        net.reset();
        net.run(10.0 * DT).unwrap();
        let second = net.monitor(mon).unwrap().flatten();
        assert_eq!(first.len(), 50);
        assert_eq!(
            first.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            second.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            "{backend}"
        );
    }
}
