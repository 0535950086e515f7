//! The vectorized cast kernel.
//!
//! Dispatches on source and target type. Numeric casts that lose value
//! range-check each active element; string parses that fail raise a
//! conversion error. NULL inputs propagate to NULL outputs without being
//! inspected.

use super::exec;
use crate::sql::error::{ExecutionError, Result};
use crate::sql::runtime_types::{ConversionError, Date, Timestamp, VarlenEntry};
use crate::sql::vector::Vector;
use crate::sql::TypeId;

const MICROS_PER_DAY: i64 = 24 * 60 * 60 * 1_000_000;

fn numeric_cast<S, T>(
    source: &Vector,
    target: &mut Vector,
    convert: impl Fn(S) -> Option<T>,
) -> Result<()>
where
    S: Copy + std::fmt::Display,
    T: Copy,
{
    super::match_shape(source, target);
    let mut failed = None;
    exec(source, |i| {
        if failed.is_some() {
            return;
        }
        if source.is_null(i) {
            target.set_null(i, true);
            return;
        }
        let value = source.get::<S>(i);
        match convert(value) {
            Some(out) => {
                target.set_null(i, false);
                target.set::<T>(i, out);
            }
            None => {
                failed = Some(ExecutionError::Conversion(ConversionError::BadNumericCast {
                    value: value.to_string(),
                    target: "numeric",
                }));
            }
        }
    });
    failed.map_or(Ok(()), Err)
}

fn to_string_cast(
    source: &Vector,
    target: &mut Vector,
    render: impl Fn(&Vector, usize) -> String,
) -> Result<()> {
    super::match_shape(source, target);
    let mut rendered = Vec::new();
    exec(source, |i| {
        if source.is_null(i) {
            rendered.push((i, None));
        } else {
            rendered.push((i, Some(render(source, i))));
        }
    });
    for (i, value) in rendered {
        match value {
            None => target.set_null(i, true),
            Some(text) => {
                target.set_null(i, false);
                target.set_string(i, text.as_bytes());
            }
        }
    }
    Ok(())
}

fn parse_cast<T: Copy>(
    source: &Vector,
    target: &mut Vector,
    parse: impl Fn(&str) -> Option<T>,
    target_name: &'static str,
) -> Result<()> {
    super::match_shape(source, target);
    let mut failed = None;
    let mut parsed = Vec::new();
    exec(source, |i| {
        if failed.is_some() {
            return;
        }
        if source.is_null(i) {
            parsed.push((i, None));
            return;
        }
        let entry = source.get::<VarlenEntry>(i);
        let text = entry.as_str_lossy();
        match parse(text.trim()) {
            Some(v) => parsed.push((i, Some(v))),
            None => {
                failed = Some(ExecutionError::Conversion(ConversionError::BadNumericCast {
                    value: text.into_owned(),
                    target: target_name,
                }));
            }
        }
    });
    if let Some(err) = failed {
        return Err(err);
    }
    for (i, value) in parsed {
        match value {
            None => target.set_null(i, true),
            Some(v) => {
                target.set_null(i, false);
                target.set::<T>(i, v);
            }
        }
    }
    Ok(())
}

/// Cast every active element of `source` into `target`'s type.
pub fn cast(source: &Vector, target: &mut Vector) -> Result<()> {
    use TypeId as T;
    let (from, to) = (source.type_id(), target.type_id());

    match (from, to) {
        // Identity: plain copy of active elements in place.
        (a, b) if a == b => {
            super::match_shape(source, target);
            let mut tids = Vec::new();
            exec(source, |i| tids.push(i));
            for i in tids {
                let value = source.get_value(i);
                target.set_value(i, &value);
            }
            Ok(())
        }

        // Integer widenings never fail.
        (T::TinyInt, T::SmallInt) => numeric_cast::<i8, i16>(source, target, |v| Some(v.into())),
        (T::TinyInt, T::Integer) => numeric_cast::<i8, i32>(source, target, |v| Some(v.into())),
        (T::TinyInt, T::BigInt) => numeric_cast::<i8, i64>(source, target, |v| Some(v.into())),
        (T::SmallInt, T::Integer) => numeric_cast::<i16, i32>(source, target, |v| Some(v.into())),
        (T::SmallInt, T::BigInt) => numeric_cast::<i16, i64>(source, target, |v| Some(v.into())),
        (T::Integer, T::BigInt) => numeric_cast::<i32, i64>(source, target, |v| Some(v.into())),

        // Narrowing casts range-check.
        (T::SmallInt, T::TinyInt) => {
            numeric_cast::<i16, i8>(source, target, |v| i8::try_from(v).ok())
        }
        (T::Integer, T::SmallInt) => {
            numeric_cast::<i32, i16>(source, target, |v| i16::try_from(v).ok())
        }
        (T::Integer, T::TinyInt) => {
            numeric_cast::<i32, i8>(source, target, |v| i8::try_from(v).ok())
        }
        (T::BigInt, T::Integer) => {
            numeric_cast::<i64, i32>(source, target, |v| i32::try_from(v).ok())
        }
        (T::BigInt, T::SmallInt) => {
            numeric_cast::<i64, i16>(source, target, |v| i16::try_from(v).ok())
        }
        (T::BigInt, T::TinyInt) => {
            numeric_cast::<i64, i8>(source, target, |v| i8::try_from(v).ok())
        }

        // Int/float conversions.
        (T::Integer, T::Float) => numeric_cast::<i32, f32>(source, target, |v| Some(v as f32)),
        (T::Integer, T::Double) => numeric_cast::<i32, f64>(source, target, |v| Some(v.into())),
        (T::BigInt, T::Double) => numeric_cast::<i64, f64>(source, target, |v| Some(v as f64)),
        (T::Float, T::Double) => numeric_cast::<f32, f64>(source, target, |v| Some(v.into())),
        (T::Double, T::Float) => numeric_cast::<f64, f32>(source, target, |v| Some(v as f32)),
        (T::Float, T::Integer) => numeric_cast::<f32, i32>(source, target, |v| {
            let t = v.trunc();
            (t >= i32::MIN as f32 && t <= i32::MAX as f32).then_some(t as i32)
        }),
        (T::Double, T::BigInt) => numeric_cast::<f64, i64>(source, target, |v| {
            let t = v.trunc();
            (t >= i64::MIN as f64 && t <= i64::MAX as f64).then_some(t as i64)
        }),

        // Date/timestamp conversions.
        (T::Date, T::Timestamp) => numeric_cast::<i32, i64>(source, target, |jd| {
            Some(i64::from(jd) * MICROS_PER_DAY)
        }),
        (T::Timestamp, T::Date) => numeric_cast::<i64, i32>(source, target, |micros| {
            Some(micros.div_euclid(MICROS_PER_DAY) as i32)
        }),

        // Rendering into strings.
        (T::Boolean, T::Varchar) => to_string_cast(source, target, |v, i| {
            if v.get::<u8>(i) != 0 { "true" } else { "false" }.to_string()
        }),
        (T::TinyInt, T::Varchar) => {
            to_string_cast(source, target, |v, i| v.get::<i8>(i).to_string())
        }
        (T::SmallInt, T::Varchar) => {
            to_string_cast(source, target, |v, i| v.get::<i16>(i).to_string())
        }
        (T::Integer, T::Varchar) => {
            to_string_cast(source, target, |v, i| v.get::<i32>(i).to_string())
        }
        (T::BigInt, T::Varchar) => {
            to_string_cast(source, target, |v, i| v.get::<i64>(i).to_string())
        }
        (T::Float, T::Varchar) => {
            to_string_cast(source, target, |v, i| v.get::<f32>(i).to_string())
        }
        (T::Double, T::Varchar) => {
            to_string_cast(source, target, |v, i| v.get::<f64>(i).to_string())
        }
        (T::Date, T::Varchar) => to_string_cast(source, target, |v, i| {
            Date::from_julian(v.get::<i32>(i)).to_string()
        }),
        (T::Timestamp, T::Varchar) => to_string_cast(source, target, |v, i| {
            Timestamp::from_micros(v.get::<i64>(i)).to_string()
        }),

        // Parsing out of strings.
        (T::Varchar, T::Integer) => {
            parse_cast::<i32>(source, target, |s| s.parse().ok(), "Integer")
        }
        (T::Varchar, T::BigInt) => {
            parse_cast::<i64>(source, target, |s| s.parse().ok(), "BigInt")
        }
        (T::Varchar, T::Double) => {
            parse_cast::<f64>(source, target, |s| s.parse().ok(), "Double")
        }
        (T::Varchar, T::Float) => parse_cast::<f32>(source, target, |s| s.parse().ok(), "Float"),
        (T::Varchar, T::Date) => parse_cast::<i32>(
            source,
            target,
            |s| Date::from_str(s).ok().map(Date::julian),
            "Date",
        ),
        (T::Varchar, T::Timestamp) => parse_cast::<i64>(
            source,
            target,
            |s| Timestamp::from_str(s).ok().map(Timestamp::micros),
            "Timestamp",
        ),

        (from, to) => Err(ExecutionError::InvalidCast {
            from: from.to_string(),
            to: to.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_int_cast() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(2);
        v.set::<i32>(0, 100);
        v.set_null(1, true);
        let mut out = Vector::new(TypeId::BigInt);
        cast(&v, &mut out).expect("cast");
        assert_eq!(out.get::<i64>(0), 100);
        assert!(out.is_null(1));
    }

    #[test]
    fn test_narrowing_cast_fails_out_of_range() {
        let mut v = Vector::new(TypeId::BigInt);
        v.set_size(1);
        v.set::<i64>(0, 1 << 40);
        let mut out = Vector::new(TypeId::Integer);
        assert!(cast(&v, &mut out).is_err());
    }

    #[test]
    fn test_narrowing_cast_of_null_is_fine() {
        let mut v = Vector::new(TypeId::BigInt);
        v.set_size(1);
        v.set::<i64>(0, 1 << 40);
        v.set_null(0, true);
        let mut out = Vector::new(TypeId::Integer);
        cast(&v, &mut out).expect("NULL propagates, value never inspected");
        assert!(out.is_null(0));
    }

    #[test]
    fn test_string_parse_cast() {
        let mut v = Vector::new(TypeId::Varchar);
        v.set_size(2);
        v.set_string(0, b"  123 ");
        v.set_string(1, b"-7");
        let mut out = Vector::new(TypeId::Integer);
        cast(&v, &mut out).expect("cast");
        assert_eq!(out.get::<i32>(0), 123);
        assert_eq!(out.get::<i32>(1), -7);
    }

    #[test]
    fn test_bad_string_parse_is_error() {
        let mut v = Vector::new(TypeId::Varchar);
        v.set_size(1);
        v.set_string(0, b"twelve");
        let mut out = Vector::new(TypeId::Integer);
        assert!(cast(&v, &mut out).is_err());
    }

    #[test]
    fn test_int_to_string_cast() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(1);
        v.set::<i32>(0, -42);
        let mut out = Vector::new(TypeId::Varchar);
        cast(&v, &mut out).expect("cast");
        assert_eq!(out.get::<VarlenEntry>(0).as_bytes(), b"-42");
    }

    #[test]
    fn test_date_round_trip_through_timestamp() {
        let date = Date::from_ymd(2024, 3, 15).expect("valid");
        let mut v = Vector::new(TypeId::Date);
        v.set_size(1);
        v.set::<i32>(0, date.julian());
        let mut ts = Vector::new(TypeId::Timestamp);
        cast(&v, &mut ts).expect("cast");
        let mut back = Vector::new(TypeId::Date);
        cast(&ts, &mut back).expect("cast");
        assert_eq!(back.get::<i32>(0), date.julian());
    }
}
