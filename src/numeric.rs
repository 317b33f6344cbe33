//! Numeric-safety helpers shared by derived-column code.
//!
//! Every edge case (missing operand, zero denominator, non-finite result) has a
//! fixed replacement value here instead of being patched per expression.

/// Replacement for a ratio whose denominator is zero or whose result is not finite.
pub const RATIO_DEFAULT: f64 = 0.0;

/// `num / den`.
///
/// - missing numerator: missing
/// - missing or zero denominator: [`RATIO_DEFAULT`]
/// - non-finite result: [`RATIO_DEFAULT`]
pub fn light_divide(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    let num = num?;
    let Some(den) = den else {
        return Some(RATIO_DEFAULT);
    };
    if den == 0.0 {
        return Some(RATIO_DEFAULT);
    }
    Some(clamp_non_finite(num / den, RATIO_DEFAULT))
}

/// `num / den` where an infinite result becomes [`RATIO_DEFAULT`] and an
/// undefined one (`0/0`, missing operand) stays missing.
pub fn finite_ratio(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    let value = num? / den?;
    if value.is_nan() {
        None
    } else if value.is_infinite() {
        Some(RATIO_DEFAULT)
    } else {
        Some(value)
    }
}

/// Plain division; missing if either side is missing. Infinite results are kept.
pub fn divide(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    Some(num? / den?)
}

pub fn floor_divide(num: Option<f64>, den: f64) -> Option<f64> {
    let value = (num? / den).floor();
    value.is_finite().then_some(value)
}

pub fn subtract(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

pub fn multiply(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? * b?)
}

/// `base^exp`; missing when either side is missing or the result is not finite.
pub fn finite_power(base: Option<f64>, exp: Option<f64>) -> Option<f64> {
    let value = base?.powf(exp?);
    value.is_finite().then_some(value)
}

pub fn clamp_non_finite(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        default
    }
}

pub fn fill_missing(value: Option<f64>, default: f64) -> f64 {
    value.unwrap_or(default)
}

pub fn max_with(value: Option<f64>, floor: f64) -> Option<f64> {
    value.map(|v| v.max(floor))
}

pub fn min_with(value: Option<f64>, cap: f64) -> Option<f64> {
    value.map(|v| v.min(cap))
}

pub fn flag(condition: bool) -> Option<f64> {
    Some(if condition { 1.0 } else { 0.0 })
}

/// Median of a non-empty slice; `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
