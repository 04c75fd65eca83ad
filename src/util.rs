const FLOAT_TO_INT_MAX: f64 = 9007199254740991_f64;

/// Casting a float to an integer saturates silently for huge magnitudes. Refuse anything beyond
/// 2**53 - 1, past which a 64-bit float can no longer represent every integer.
pub(crate) fn f64_to_i64_safe(f: f64) -> Option<i64> {
    if f.abs() <= FLOAT_TO_INT_MAX {
        Some(f as i64)
    } else {
        None
    }
}

pub(crate) fn is_false(b: &bool) -> bool {
    !(*b)
}
