//! Value sources for static field reads and static calls.
//!
//! The interpreter resolves `getstatic` and `invokestatic` through two layers:
//!
//! 1. [`builtin_static_field`] and [`builtin_static_call`], a fixed table of well-known runtime
//!    constants and pure library functions whose results depend only on their arguments;
//! 2. a [`MethodLookup`] over the bodies being processed, whose static callees are evaluated
//!    with a step budget (see [`crate::analysis::Evaluator`]).
//!
//! # Built-in Fields
//!
//! | Owner | Fields |
//! |-------|--------|
//! | `java/lang/Byte`, `Short`, `Integer`, `Long` | `BYTES`, `SIZE`, `MIN_VALUE`, `MAX_VALUE` |
//! | `java/lang/Character` | `BYTES`, `SIZE`, `MIN_VALUE`, `MAX_VALUE` |
//! | `java/lang/Float`, `Double` | `BYTES`, `SIZE`, `MIN_VALUE`, `MAX_VALUE`, `NaN`, infinities |
//!
//! # Built-in Calls
//!
//! | Owner | Methods |
//! |-------|---------|
//! | `java/lang/Math` | `abs`, `min`, `max` on all numeric kinds, `floorMod(II)`, `floorDiv(II)` |
//! | `java/lang/Integer` | `bitCount`, `reverse`, `reverseBytes`, `rotateLeft`, `rotateRight`, `highestOneBit`, `lowestOneBit`, `numberOfLeadingZeros`, `numberOfTrailingZeros`, `signum`, `parseInt`, `toString`, `valueOf` |
//! | `java/lang/Long` | `bitCount`, `reverse`, `signum`, `numberOfLeadingZeros`, `numberOfTrailingZeros` |
//! | `java/lang/String` | `valueOf(I)`, `valueOf(J)`, `valueOf(Z)`, `valueOf(C)` |

use std::{collections::HashMap, sync::Arc};

use crate::{
    analysis::AbstractValue,
    assembly::{MemberRef, MethodBody, MethodKey},
};

/// Finds method bodies for static call evaluation.
pub trait MethodLookup: Send + Sync {
    /// Returns the body of `owner.name desc`, if it is available for evaluation.
    fn find(&self, key: &MethodKey) -> Option<Arc<MethodBody>>;
}

impl MethodLookup for HashMap<MethodKey, Arc<MethodBody>> {
    fn find(&self, key: &MethodKey) -> Option<Arc<MethodBody>> {
        self.get(key).cloned()
    }
}

/// Value of a well-known static constant.
#[must_use]
pub fn builtin_static_field(field: &MemberRef) -> Option<AbstractValue> {
    use AbstractValue::{Double, Float, Int, Long};

    Some(match (field.owner.as_str(), field.name.as_str()) {
        ("java/lang/Byte", "BYTES") => Int(Some(1)),
        ("java/lang/Byte", "SIZE") => Int(Some(8)),
        ("java/lang/Byte", "MIN_VALUE") => Int(Some(i32::from(i8::MIN))),
        ("java/lang/Byte", "MAX_VALUE") => Int(Some(i32::from(i8::MAX))),
        ("java/lang/Short", "BYTES") => Int(Some(2)),
        ("java/lang/Short", "SIZE") => Int(Some(16)),
        ("java/lang/Short", "MIN_VALUE") => Int(Some(i32::from(i16::MIN))),
        ("java/lang/Short", "MAX_VALUE") => Int(Some(i32::from(i16::MAX))),
        ("java/lang/Character", "BYTES") => Int(Some(2)),
        ("java/lang/Character", "SIZE") => Int(Some(16)),
        ("java/lang/Character", "MIN_VALUE") => Int(Some(0)),
        ("java/lang/Character", "MAX_VALUE") => Int(Some(i32::from(u16::MAX))),
        ("java/lang/Integer", "BYTES") => Int(Some(4)),
        ("java/lang/Integer", "SIZE") => Int(Some(32)),
        ("java/lang/Integer", "MIN_VALUE") => Int(Some(i32::MIN)),
        ("java/lang/Integer", "MAX_VALUE") => Int(Some(i32::MAX)),
        ("java/lang/Long", "BYTES") => Int(Some(8)),
        ("java/lang/Long", "SIZE") => Int(Some(64)),
        ("java/lang/Long", "MIN_VALUE") => Long(Some(i64::MIN)),
        ("java/lang/Long", "MAX_VALUE") => Long(Some(i64::MAX)),
        ("java/lang/Float", "BYTES") => Int(Some(4)),
        ("java/lang/Float", "SIZE") => Int(Some(32)),
        ("java/lang/Float", "MIN_VALUE") => Float(Some(f32::from_bits(1))),
        ("java/lang/Float", "MAX_VALUE") => Float(Some(f32::MAX)),
        ("java/lang/Float", "MIN_NORMAL") => Float(Some(f32::MIN_POSITIVE)),
        ("java/lang/Float", "NaN") => Float(Some(f32::NAN)),
        ("java/lang/Float", "POSITIVE_INFINITY") => Float(Some(f32::INFINITY)),
        ("java/lang/Float", "NEGATIVE_INFINITY") => Float(Some(f32::NEG_INFINITY)),
        ("java/lang/Double", "BYTES") => Int(Some(8)),
        ("java/lang/Double", "SIZE") => Int(Some(64)),
        ("java/lang/Double", "MIN_VALUE") => Double(Some(f64::from_bits(1))),
        ("java/lang/Double", "MAX_VALUE") => Double(Some(f64::MAX)),
        ("java/lang/Double", "MIN_NORMAL") => Double(Some(f64::MIN_POSITIVE)),
        ("java/lang/Double", "NaN") => Double(Some(f64::NAN)),
        ("java/lang/Double", "POSITIVE_INFINITY") => Double(Some(f64::INFINITY)),
        ("java/lang/Double", "NEGATIVE_INFINITY") => Double(Some(f64::NEG_INFINITY)),
        _ => return None,
    })
}

/// Result of a pure library call with fully known arguments.
///
/// Returns `None` when the method is not in the table, an argument is unknown, or the call
/// would throw.
#[must_use]
pub fn builtin_static_call(method: &MemberRef, args: &[AbstractValue]) -> Option<AbstractValue> {
    use AbstractValue::{Double, Float, Int, Long};

    let int = |i: usize| args.get(i).and_then(AbstractValue::as_int);
    let long = |i: usize| args.get(i).and_then(AbstractValue::as_long);
    let float = |i: usize| args.get(i).and_then(AbstractValue::as_float);
    let double = |i: usize| args.get(i).and_then(AbstractValue::as_double);
    let string = |s: String| AbstractValue::from_constant(&crate::assembly::Constant::String(s));

    Some(match (method.owner.as_str(), method.name.as_str(), method.desc.as_str()) {
        ("java/lang/Math", "abs", "(I)I") => Int(Some(int(0)?.wrapping_abs())),
        ("java/lang/Math", "abs", "(J)J") => Long(Some(long(0)?.wrapping_abs())),
        ("java/lang/Math", "abs", "(F)F") => Float(Some(float(0)?.abs())),
        ("java/lang/Math", "abs", "(D)D") => Double(Some(double(0)?.abs())),
        ("java/lang/Math", "min", "(II)I") => Int(Some(int(0)?.min(int(1)?))),
        ("java/lang/Math", "max", "(II)I") => Int(Some(int(0)?.max(int(1)?))),
        ("java/lang/Math", "min", "(JJ)J") => Long(Some(long(0)?.min(long(1)?))),
        ("java/lang/Math", "max", "(JJ)J") => Long(Some(long(0)?.max(long(1)?))),
        ("java/lang/Math", "floorMod", "(II)I") => {
            let divisor = int(1)?;
            if divisor == 0 {
                return None;
            }
            let m = int(0)?.wrapping_rem(divisor);
            Int(Some(if m != 0 && (m ^ divisor) < 0 { m + divisor } else { m }))
        }
        ("java/lang/Math", "floorDiv", "(II)I") => {
            let (x, y) = (int(0)?, int(1)?);
            if y == 0 {
                return None;
            }
            let q = x.wrapping_div(y);
            Int(Some(if (x ^ y) < 0 && q.wrapping_mul(y) != x { q - 1 } else { q }))
        }
        ("java/lang/Integer", "bitCount", "(I)I") => Int(Some(int(0)?.count_ones() as i32)),
        ("java/lang/Integer", "reverse", "(I)I") => Int(Some(int(0)?.reverse_bits())),
        ("java/lang/Integer", "reverseBytes", "(I)I") => Int(Some(int(0)?.swap_bytes())),
        ("java/lang/Integer", "rotateLeft", "(II)I") => {
            Int(Some(int(0)?.rotate_left((int(1)? & 31) as u32)))
        }
        ("java/lang/Integer", "rotateRight", "(II)I") => {
            Int(Some(int(0)?.rotate_right((int(1)? & 31) as u32)))
        }
        ("java/lang/Integer", "highestOneBit", "(I)I") => {
            let v = int(0)? as u32;
            Int(Some(if v == 0 { 0 } else { (1u32 << (31 - v.leading_zeros())) as i32 }))
        }
        ("java/lang/Integer", "lowestOneBit", "(I)I") => {
            let v = int(0)?;
            Int(Some(v & v.wrapping_neg()))
        }
        ("java/lang/Integer", "numberOfLeadingZeros", "(I)I") => {
            Int(Some(int(0)?.leading_zeros() as i32))
        }
        ("java/lang/Integer", "numberOfTrailingZeros", "(I)I") => {
            Int(Some(int(0)?.trailing_zeros() as i32))
        }
        ("java/lang/Integer", "signum", "(I)I") => Int(Some(int(0)?.signum())),
        ("java/lang/Integer", "parseInt", "(Ljava/lang/String;)I") => {
            Int(Some(args.first()?.as_str()?.parse::<i32>().ok()?))
        }
        ("java/lang/Integer", "toString", "(I)Ljava/lang/String;")
        | ("java/lang/String", "valueOf", "(I)Ljava/lang/String;") => string(int(0)?.to_string()),
        ("java/lang/String", "valueOf", "(J)Ljava/lang/String;") => string(long(0)?.to_string()),
        ("java/lang/String", "valueOf", "(Z)Ljava/lang/String;") => {
            string((int(0)? != 0).to_string())
        }
        ("java/lang/String", "valueOf", "(C)Ljava/lang/String;") => {
            string(char::from_u32(int(0)? as u32 & 0xFFFF)?.to_string())
        }
        ("java/lang/Long", "bitCount", "(J)I") => Int(Some(long(0)?.count_ones() as i32)),
        ("java/lang/Long", "reverse", "(J)J") => Long(Some(long(0)?.reverse_bits())),
        ("java/lang/Long", "signum", "(J)I") => Int(Some(long(0)?.signum() as i32)),
        ("java/lang/Long", "numberOfLeadingZeros", "(J)I") => {
            Int(Some(long(0)?.leading_zeros() as i32))
        }
        ("java/lang/Long", "numberOfTrailingZeros", "(J)I") => {
            Int(Some(long(0)?.trailing_zeros() as i32))
        }
        _ => return None,
    })
}
