//! Trigonometric helpers over SQL real values.
//!
//! These back the `@acos`-family builtins. NULL inputs produce NULL outputs;
//! domain errors follow IEEE semantics (NaN/infinity), matching the scalar
//! library the engine exposes. Note `cot(0)` is `1/tan(0)`, which is
//! positive infinity.

use crate::sql::value::Real;

fn unary(input: Real, f: impl Fn(f64) -> f64) -> Real {
    if input.is_null {
        Real::null()
    } else {
        Real::new(f(input.value))
    }
}

pub fn acos(input: Real) -> Real {
    unary(input, f64::acos)
}

pub fn asin(input: Real) -> Real {
    unary(input, f64::asin)
}

pub fn atan(input: Real) -> Real {
    unary(input, f64::atan)
}

pub fn atan2(y: Real, x: Real) -> Real {
    if y.is_null || x.is_null {
        Real::null()
    } else {
        Real::new(y.value.atan2(x.value))
    }
}

pub fn cos(input: Real) -> Real {
    unary(input, f64::cos)
}

pub fn cot(input: Real) -> Real {
    unary(input, |v| 1.0 / v.tan())
}

pub fn sin(input: Real) -> Real {
    unary(input, f64::sin)
}

pub fn tan(input: Real) -> Real {
    unary(input, f64::tan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_propagates() {
        assert!(cos(Real::null()).is_null);
        assert!(atan2(Real::null(), Real::new(1.0)).is_null);
    }

    #[test]
    fn test_basic_values() {
        assert!((cos(Real::new(0.0)).value - 1.0).abs() < 1e-12);
        assert!((sin(Real::new(0.0)).value).abs() < 1e-12);
    }

    #[test]
    fn test_cot_of_zero_is_infinite() {
        let result = cot(Real::new(0.0));
        assert!(!result.is_null);
        assert!(result.value.is_infinite() && result.value > 0.0);
    }
}
