// units.rs — Dimensional analysis for equations and registered functions
//
// A `Dimension` is a vector of SI base exponents. Scale prefixes (`mV`,
// `ms`) are accepted in unit names but only the dimension is tracked:
// checking is about consistency, not conversion.
//
// Preconditions: none.
// Postconditions: `check` succeeds only when a function's unit rule maps its
//                 declared inputs onto its declared output.
// Failure modes: `UnitError` for mismatched dimensions, unknown unit names,
//                non-integer exponents, and arity errors.
// Side effects: none.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};

// ── Dimension ───────────────────────────────────────────────────────────────

const BASE_SYMBOLS: [&str; 7] = ["m", "kg", "s", "A", "K", "mol", "cd"];

/// Exponents of the seven SI base dimensions, in the order
/// length, mass, time, current, temperature, amount, luminous intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimension([i8; 7]);

impl Dimension {
    pub const DIMENSIONLESS: Dimension = Dimension([0; 7]);

    pub const fn new(exponents: [i8; 7]) -> Self {
        Dimension(exponents)
    }

    const fn base(index: usize) -> Self {
        let mut exps = [0i8; 7];
        exps[index] = 1;
        Dimension(exps)
    }

    pub const fn metre() -> Self {
        Self::base(0)
    }

    pub const fn kilogram() -> Self {
        Self::base(1)
    }

    pub const fn second() -> Self {
        Self::base(2)
    }

    pub const fn amp() -> Self {
        Self::base(3)
    }

    pub const fn kelvin() -> Self {
        Self::base(4)
    }

    pub const fn mole() -> Self {
        Self::base(5)
    }

    pub const fn candela() -> Self {
        Self::base(6)
    }

    /// Volt: kg m^2 s^-3 A^-1.
    pub const fn volt() -> Self {
        Dimension([2, 1, -3, -1, 0, 0, 0])
    }

    pub fn exponents(&self) -> [i8; 7] {
        self.0
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0 == [0; 7]
    }

    pub fn mul(self, other: Dimension) -> Dimension {
        let mut out = self.0;
        for (o, e) in out.iter_mut().zip(other.0) {
            *o += e;
        }
        Dimension(out)
    }

    pub fn div(self, other: Dimension) -> Dimension {
        let mut out = self.0;
        for (o, e) in out.iter_mut().zip(other.0) {
            *o -= e;
        }
        Dimension(out)
    }

    pub fn recip(self) -> Dimension {
        Dimension::DIMENSIONLESS.div(self)
    }

    /// Raise to an integer power. `exponent` must be integral.
    pub fn powf(self, exponent: f64) -> Result<Dimension, UnitError> {
        if self.is_dimensionless() {
            return Ok(self);
        }
        if exponent.fract() != 0.0 || !exponent.is_finite() || exponent.abs() > i8::MAX as f64 {
            return Err(UnitError::InvalidExponent {
                base: self,
                exponent,
            });
        }
        let k = exponent as i8;
        let mut out = self.0;
        for o in out.iter_mut() {
            *o = o.checked_mul(k).ok_or(UnitError::InvalidExponent {
                base: self,
                exponent,
            })?;
        }
        Ok(Dimension(out))
    }

    /// Integer root, if every exponent is divisible by `n`.
    pub fn root(self, n: i8) -> Option<Dimension> {
        if n == 0 || self.0.iter().any(|e| e % n != 0) {
            return None;
        }
        let mut out = self.0;
        for o in out.iter_mut() {
            *o /= n;
        }
        Some(Dimension(out))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return f.write_str("1");
        }
        let mut first = true;
        for (sym, exp) in BASE_SYMBOLS.iter().zip(self.0) {
            if exp == 0 {
                continue;
            }
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if exp == 1 {
                write!(f, "{sym}")?;
            } else {
                write!(f, "{sym}^{exp}")?;
            }
        }
        Ok(())
    }
}

// ── Quantity ────────────────────────────────────────────────────────────────

/// A scalar value tagged with its dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub dim: Dimension,
}

impl Quantity {
    pub fn new(value: f64, dim: Dimension) -> Self {
        Quantity { value, dim }
    }

    pub fn dimensionless(value: f64) -> Self {
        Quantity {
            value,
            dim: Dimension::DIMENSIONLESS,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: Dimension,
        found: Dimension,
    },
    #[error("unknown unit `{0}`")]
    UnknownUnit(String),
    #[error("cannot raise {base} to the non-integer power {exponent}")]
    InvalidExponent { base: Dimension, exponent: f64 },
    #[error("expected {expected} argument(s), found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("unsupported unit expression: {0}")]
    Unsupported(String),
    #[error("`{name}` declares units but has no unit rule or unit-aware implementation")]
    Unchecked { name: String },
}

// ── Unit rules ──────────────────────────────────────────────────────────────

/// Maps argument dimensions to the result dimension of a function. This is
/// the static analogue of calling the implementation on unit-bearing values.
pub type UnitRule = fn(&[Dimension]) -> Result<Dimension, UnitError>;

/// Every argument must be dimensionless; the result is dimensionless.
/// Used for transcendental functions (`sin`, `exp`, `log`, ...).
pub fn dimensionless_rule(args: &[Dimension]) -> Result<Dimension, UnitError> {
    for (i, dim) in args.iter().enumerate() {
        if !dim.is_dimensionless() {
            return Err(UnitError::DimensionMismatch {
                context: format!("argument {}", i + 1),
                expected: Dimension::DIMENSIONLESS,
                found: *dim,
            });
        }
    }
    Ok(Dimension::DIMENSIONLESS)
}

/// Result carries the unit of the single argument (`abs`, `ceil`, `floor`).
pub fn preserve_rule(args: &[Dimension]) -> Result<Dimension, UnitError> {
    match args {
        [dim] => Ok(*dim),
        _ => Err(UnitError::ArityMismatch {
            expected: 1,
            found: args.len(),
        }),
    }
}

/// Square root halves every exponent.
pub fn sqrt_rule(args: &[Dimension]) -> Result<Dimension, UnitError> {
    let dim = preserve_rule(args)?;
    dim.root(2).ok_or(UnitError::InvalidExponent {
        base: dim,
        exponent: 0.5,
    })
}

/// Verify that `rule` maps `inputs` onto `output`. Runs once, when a
/// function is built, never per call.
pub fn check(
    name: &str,
    rule: UnitRule,
    inputs: &[Dimension],
    output: Dimension,
) -> Result<(), UnitError> {
    let found = rule(inputs)?;
    if found != output {
        return Err(UnitError::DimensionMismatch {
            context: format!("result of `{name}`"),
            expected: output,
            found,
        });
    }
    Ok(())
}

/// Unit-aware form of a canonical implementation.
pub type UnitFn = Arc<dyn Fn(&[Quantity]) -> Result<Quantity, UnitError> + Send + Sync>;

/// Verify a unit-aware implementation by calling it on dummy operands that
/// carry the declared input units.
pub fn check_operands(
    name: &str,
    f: &UnitFn,
    inputs: &[Dimension],
    output: Dimension,
) -> Result<(), UnitError> {
    let operands: Vec<Quantity> = inputs.iter().map(|dim| Quantity::new(1.0, *dim)).collect();
    let found = f(&operands)?.dim;
    if found != output {
        return Err(UnitError::DimensionMismatch {
            context: format!("result of `{name}`"),
            expected: output,
            found,
        });
    }
    Ok(())
}

// ── Unit names ──────────────────────────────────────────────────────────────

const PREFIXES: &[&str] = &[
    "pico", "nano", "micro", "milli", "centi", "kilo", "mega", "p", "n", "u", "m", "c", "k", "M",
];

fn named_unit(name: &str) -> Option<Dimension> {
    let kg_m2 = Dimension::new([2, 1, 0, 0, 0, 0, 0]);
    let dim = match name {
        "radian" | "rad" => Dimension::DIMENSIONLESS,
        "metre" | "meter" | "m" => Dimension::metre(),
        "kilogram" | "kg" => Dimension::kilogram(),
        "gram" | "g" => Dimension::kilogram(),
        "second" | "s" => Dimension::second(),
        "amp" | "ampere" | "A" => Dimension::amp(),
        "kelvin" | "K" => Dimension::kelvin(),
        "mole" | "mol" => Dimension::mole(),
        "candela" | "cd" => Dimension::candela(),
        "hertz" | "Hz" => Dimension::second().recip(),
        "newton" | "N" => Dimension::new([1, 1, -2, 0, 0, 0, 0]),
        "joule" | "J" => kg_m2.div(Dimension::second().powf(2.0).ok()?),
        "watt" | "W" => kg_m2.div(Dimension::second().powf(3.0).ok()?),
        "coulomb" | "C" => Dimension::second().mul(Dimension::amp()),
        "volt" | "V" => Dimension::volt(),
        "ohm" => Dimension::volt().div(Dimension::amp()),
        "siemens" | "S" => Dimension::amp().div(Dimension::volt()),
        "farad" | "F" => Dimension::second()
            .mul(Dimension::amp())
            .div(Dimension::volt()),
        _ => return None,
    };
    Some(dim)
}

/// Look up a unit name, accepting SI prefixes (`mV`, `ms`, `nsiemens`).
pub fn lookup_unit(name: &str) -> Result<Dimension, UnitError> {
    if let Some(dim) = named_unit(name) {
        return Ok(dim);
    }
    PREFIXES
        .iter()
        .filter_map(|p| name.strip_prefix(p))
        .filter(|rest| !rest.is_empty())
        .find_map(named_unit)
        .ok_or_else(|| UnitError::UnknownUnit(name.to_string()))
}

/// Evaluate a unit annotation (`1`, `volt`, `metre / second ** 2`).
pub fn eval_unit_expr(expr: &Expr) -> Result<Dimension, UnitError> {
    match &expr.kind {
        ExprKind::Number(_) => Ok(Dimension::DIMENSIONLESS),
        ExprKind::Ident(id) => lookup_unit(&id.name),
        ExprKind::Unary {
            op: UnaryOp::Plus,
            operand,
        } => eval_unit_expr(operand),
        ExprKind::Binary { op, lhs, rhs } => {
            let base = eval_unit_expr(lhs)?;
            match op {
                BinaryOp::Mul => Ok(base.mul(eval_unit_expr(rhs)?)),
                BinaryOp::Div => Ok(base.div(eval_unit_expr(rhs)?)),
                BinaryOp::Pow => {
                    let exponent = literal_value(rhs)
                        .ok_or_else(|| UnitError::Unsupported(format!("{rhs}")))?;
                    base.powf(exponent)
                }
                BinaryOp::Add | BinaryOp::Sub => Err(UnitError::Unsupported(format!("{expr}"))),
            }
        }
        _ => Err(UnitError::Unsupported(format!("{expr}"))),
    }
}

fn literal_value(expr: &Expr) -> Option<f64> {
    match &expr.kind {
        ExprKind::Number(n) => Some(*n),
        ExprKind::Unary { op, operand } => {
            let v = literal_value(operand)?;
            Some(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Plus => v,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_of(source: &str) -> Result<Dimension, UnitError> {
        let parsed = crate::parser::parse(&format!("x : {source}"));
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let set = parsed.equations.unwrap();
        eval_unit_expr(&set.equations[0].unit)
    }

    #[test]
    fn display() {
        assert_eq!(Dimension::DIMENSIONLESS.to_string(), "1");
        assert_eq!(Dimension::volt().to_string(), "m^2 kg s^-3 A^-1");
        let speed = Dimension::metre().div(Dimension::second());
        assert_eq!(speed.to_string(), "m s^-1");
    }

    #[test]
    fn unit_annotations() {
        assert_eq!(unit_of("1").unwrap(), Dimension::DIMENSIONLESS);
        assert_eq!(unit_of("volt").unwrap(), Dimension::volt());
        assert_eq!(unit_of("mV").unwrap(), Dimension::volt());
        assert_eq!(unit_of("ms").unwrap(), Dimension::second());
        assert_eq!(unit_of("second ** -1").unwrap(), Dimension::second().recip());
        assert_eq!(
            unit_of("metre / second ** 2").unwrap(),
            Dimension::new([1, 0, -2, 0, 0, 0, 0])
        );
        assert_eq!(unit_of("siemens * volt").unwrap(), Dimension::amp());
    }

    #[test]
    fn unknown_unit() {
        assert!(matches!(unit_of("furlong"), Err(UnitError::UnknownUnit(u)) if u == "furlong"));
    }

    #[test]
    fn sums_are_not_units() {
        assert!(matches!(unit_of("volt + volt"), Err(UnitError::Unsupported(_))));
    }

    #[test]
    fn fractional_powers_of_dimensioned_units_fail() {
        assert!(Dimension::metre().powf(0.5).is_err());
        assert_eq!(Dimension::DIMENSIONLESS.powf(0.5).unwrap(), Dimension::DIMENSIONLESS);
    }

    #[test]
    fn sqrt_rule_halves_even_exponents() {
        let area = Dimension::metre().mul(Dimension::metre());
        assert_eq!(sqrt_rule(&[area]).unwrap(), Dimension::metre());
        assert!(sqrt_rule(&[Dimension::metre()]).is_err());
    }

    #[test]
    fn check_accepts_consistent_declarations() {
        check("sin", dimensionless_rule, &[Dimension::DIMENSIONLESS], Dimension::DIMENSIONLESS)
            .unwrap();
        check("abs", preserve_rule, &[Dimension::volt()], Dimension::volt()).unwrap();
    }

    #[test]
    fn check_rejects_wrong_output() {
        let err = check("abs", preserve_rule, &[Dimension::volt()], Dimension::DIMENSIONLESS)
            .unwrap_err();
        assert!(matches!(err, UnitError::DimensionMismatch { .. }));
        assert!(err.to_string().contains("result of `abs`"));
    }

    #[test]
    fn check_rejects_wrong_input() {
        let err = check("sin", dimensionless_rule, &[Dimension::volt()], Dimension::DIMENSIONLESS)
            .unwrap_err();
        assert!(matches!(err, UnitError::DimensionMismatch { .. }));
    }
}
