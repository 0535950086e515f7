//! Vectorized binary arithmetic.
//!
//! `result[i] = op(left[i], right[i])` for every active tuple. A NULL in
//! either operand is a NULL in the result. Division and modulo by zero at an
//! active, non-NULL position abort with an execution error.

use super::{exec, match_shape, shape_of};
use crate::sql::error::{ExecutionError, Result};
use crate::sql::vector::Vector;
use crate::sql::TypeId;

fn binary<T: Copy>(
    left: &Vector,
    right: &Vector,
    result: &mut Vector,
    op: impl Fn(T, T) -> T,
    check_zero: Option<impl Fn(T) -> bool>,
) -> Result<()> {
    let template = shape_of(left, right);
    match_shape(template, result);

    let mut failed = None;
    exec(template, |i| {
        if failed.is_some() {
            return;
        }
        let null = left.is_null(i) || right.is_null(i);
        result.set_null(i, null);
        if null {
            return;
        }
        let rhs = right.get::<T>(i);
        if let Some(is_zero) = &check_zero {
            if is_zero(rhs) {
                failed = Some(ExecutionError::DivisionByZero);
                return;
            }
        }
        result.set::<T>(i, op(left.get::<T>(i), rhs));
    });
    match failed {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

macro_rules! arith_kernel {
    ($name:ident, $int_method:ident, $float_op:tt, $checked:expr) => {
        pub fn $name(left: &Vector, right: &Vector, result: &mut Vector) -> Result<()> {
            debug_assert_eq!(left.type_id(), right.type_id());
            debug_assert_eq!(left.type_id(), result.type_id());
            match left.type_id() {
                TypeId::TinyInt => binary::<i8>(
                    left,
                    right,
                    result,
                    |a, b| a.$int_method(b),
                    if $checked { Some(|v: i8| v == 0) } else { None },
                ),
                TypeId::SmallInt => binary::<i16>(
                    left,
                    right,
                    result,
                    |a, b| a.$int_method(b),
                    if $checked { Some(|v: i16| v == 0) } else { None },
                ),
                TypeId::Integer => binary::<i32>(
                    left,
                    right,
                    result,
                    |a, b| a.$int_method(b),
                    if $checked { Some(|v: i32| v == 0) } else { None },
                ),
                TypeId::BigInt => binary::<i64>(
                    left,
                    right,
                    result,
                    |a, b| a.$int_method(b),
                    if $checked { Some(|v: i64| v == 0) } else { None },
                ),
                TypeId::Float => binary::<f32>(
                    left,
                    right,
                    result,
                    |a, b| a $float_op b,
                    if $checked { Some(|v: f32| v == 0.0) } else { None },
                ),
                TypeId::Double => binary::<f64>(
                    left,
                    right,
                    result,
                    |a, b| a $float_op b,
                    if $checked { Some(|v: f64| v == 0.0) } else { None },
                ),
                other => Err(ExecutionError::NotImplemented(format!(
                    "arithmetic on {other}"
                ))),
            }
        }
    };
}

arith_kernel!(add, wrapping_add, +, false);
arith_kernel!(subtract, wrapping_sub, -, false);
arith_kernel!(multiply, wrapping_mul, *, false);
arith_kernel!(divide, wrapping_div, /, true);
arith_kernel!(modulo, wrapping_rem, %, true);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::value::GenericValue;
    use crate::sql::TupleIdList;

    fn int_vector(values: &[Option<i32>]) -> Vector {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(values.len());
        for (i, value) in values.iter().enumerate() {
            match value {
                Some(x) => v.set::<i32>(i, *x),
                None => v.set_null(i, true),
            }
        }
        v
    }

    #[test]
    fn test_add_with_null_propagation() {
        let a = int_vector(&[Some(1), None, Some(3)]);
        let b = int_vector(&[Some(10), Some(20), None]);
        let mut out = Vector::new(TypeId::Integer);
        add(&a, &b, &mut out).expect("add");
        assert_eq!(out.get::<i32>(0), 11);
        assert!(out.is_null(1));
        assert!(out.is_null(2));
    }

    #[test]
    fn test_constant_operand() {
        let a = int_vector(&[Some(1), Some(2), Some(3)]);
        let c = Vector::constant(&GenericValue::Integer(Some(10)), 3);
        let mut out = Vector::new(TypeId::Integer);
        multiply(&a, &c, &mut out).expect("mul");
        assert_eq!(out.as_slice::<i32>(), &[10, 20, 30]);
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let a = int_vector(&[Some(10)]);
        let b = int_vector(&[Some(0)]);
        let mut out = Vector::new(TypeId::Integer);
        assert_eq!(
            divide(&a, &b, &mut out),
            Err(ExecutionError::DivisionByZero)
        );
    }

    #[test]
    fn test_division_by_zero_in_null_slot_is_fine() {
        // The zero sits in a NULL position; it is never an active divisor.
        let a = int_vector(&[Some(10), None]);
        let b = int_vector(&[Some(2), Some(0)]);
        let mut out = Vector::new(TypeId::Integer);
        divide(&a, &b, &mut out).expect("divide");
        assert_eq!(out.get::<i32>(0), 5);
        assert!(out.is_null(1));
    }

    #[test]
    fn test_filtered_inputs_only_touch_active_tuples() {
        let a = int_vector(&[Some(1), Some(2), Some(0)]);
        let mut b = int_vector(&[Some(1), Some(1), Some(0)]);
        let mut list = TupleIdList::new(3);
        list.add(0);
        list.add(1);
        // Tuple 2 would divide by zero, but it is inactive.
        b.set_filtered_tuple_id_list(&list);
        let a = {
            let mut a = a;
            a.set_filtered_tuple_id_list(&list);
            a
        };
        let mut out = Vector::new(TypeId::Integer);
        divide(&a, &b, &mut out).expect("divide");
        assert_eq!(out.get::<i32>(0), 1);
        assert_eq!(out.get::<i32>(1), 2);
        assert_eq!(out.count(), 2);
    }
}
