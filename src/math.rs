//! Fixed math function library available to every expression
//!
//! Functions are reachable both qualified (`Math.floor(x)`) and bare
//! (`floor(x)`); variables of the same name shadow the bare form.

use crate::error::{EngineError, Result};
use crate::value::Value;
use std::collections::HashMap;

/// Namespace under which the library is reachable in qualified form.
pub const MATH_NAMESPACE: &str = "Math";

type MathFunction = fn(&[f64]) -> f64;

pub struct MathLibrary {
    functions: HashMap<&'static str, MathFunction>,
    constants: HashMap<&'static str, f64>,
}

fn arg(args: &[f64], i: usize) -> f64 {
    args.get(i).copied().unwrap_or(f64::NAN)
}

/// Rounds half-up like spreadsheet and script authors expect (`round(-2.5) == -2`).
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

impl MathLibrary {
    pub fn new() -> Self {
        let mut functions: HashMap<&'static str, MathFunction> = HashMap::new();
        functions.insert("abs", |a| arg(a, 0).abs());
        functions.insert("ceil", |a| arg(a, 0).ceil());
        functions.insert("floor", |a| arg(a, 0).floor());
        functions.insert("round", |a| round_half_up(arg(a, 0)));
        functions.insert("trunc", |a| arg(a, 0).trunc());
        functions.insert("sign", |a| {
            let x = arg(a, 0);
            if x.is_nan() || x == 0.0 { x } else { x.signum() }
        });
        functions.insert("sqrt", |a| arg(a, 0).sqrt());
        functions.insert("cbrt", |a| arg(a, 0).cbrt());
        functions.insert("pow", |a| arg(a, 0).powf(arg(a, 1)));
        functions.insert("exp", |a| arg(a, 0).exp());
        functions.insert("log", |a| arg(a, 0).ln());
        functions.insert("log10", |a| arg(a, 0).log10());
        functions.insert("log2", |a| arg(a, 0).log2());
        functions.insert("sin", |a| arg(a, 0).sin());
        functions.insert("cos", |a| arg(a, 0).cos());
        functions.insert("tan", |a| arg(a, 0).tan());
        functions.insert("asin", |a| arg(a, 0).asin());
        functions.insert("acos", |a| arg(a, 0).acos());
        functions.insert("atan", |a| arg(a, 0).atan());
        functions.insert("atan2", |a| arg(a, 0).atan2(arg(a, 1)));
        functions.insert("hypot", |a| a.iter().map(|x| x * x).sum::<f64>().sqrt());
        functions.insert("min", |a| {
            if a.iter().any(|x| x.is_nan()) {
                return f64::NAN;
            }
            a.iter().copied().fold(f64::INFINITY, f64::min)
        });
        functions.insert("max", |a| {
            if a.iter().any(|x| x.is_nan()) {
                return f64::NAN;
            }
            a.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        });
        functions.insert("clamp", |a| {
            let (x, lo, hi) = (arg(a, 0), arg(a, 1), arg(a, 2));
            x.max(lo).min(hi)
        });

        let mut constants = HashMap::new();
        constants.insert("PI", std::f64::consts::PI);
        constants.insert("E", std::f64::consts::E);
        constants.insert("LN2", std::f64::consts::LN_2);
        constants.insert("LN10", std::f64::consts::LN_10);
        constants.insert("SQRT2", std::f64::consts::SQRT_2);
        constants.insert("Infinity", f64::INFINITY);
        constants.insert("NaN", f64::NAN);

        Self { functions, constants }
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn constant(&self, name: &str) -> Option<Value> {
        self.constants.get(name).map(|c| Value::Number(*c))
    }

    /// Calls a library function. Array arguments are flattened so
    /// `max(this.rolls)` works on a list.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| EngineError::evaluation(format!("{}.{} is not a function", MATH_NAMESPACE, name)))?;

        let mut numbers = Vec::with_capacity(args.len());
        for value in args {
            match value {
                Value::Array(items) => numbers.extend(items.iter().map(Value::to_number)),
                other => numbers.push(other.to_number()),
            }
        }
        Ok(Value::Number(function(&numbers)))
    }
}

impl Default for MathLibrary {
    fn default() -> Self {
        Self::new()
    }
}
