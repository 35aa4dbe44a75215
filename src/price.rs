//! Currency text to integer cents.

/// Converts freeform currency text into minor units.
///
/// Dots are thousands separators and the comma is the decimal separator, so
/// `"1.234,56 €"` becomes `123456`. Anything that does not end up as a finite
/// number yields `None`.
pub fn normalize(text: &str) -> Option<i64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let value: f64 = kept.parse().ok()?;
    to_cents(value)
}

/// Converts a decimal amount in major units (as found in structured data) to cents.
pub fn from_major_units(value: f64) -> Option<i64> {
    if value < 0.0 {
        return None;
    }
    to_cents(value)
}

/// `None` for amounts that do not fit in `i64` cents.
fn to_cents(value: f64) -> Option<i64> {
    let cents = (value * 100.0).round();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if !cents.is_finite() || cents < i64::MIN as f64 || cents >= i64::MAX as f64 {
        return None;
    }
    Some(cents as i64)
}

/// Formats cents for log lines, e.g. `129.99`.
pub fn display(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}
