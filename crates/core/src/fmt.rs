//! Display helpers shared by notifications, log lines, and CLI output.

/// Formats a dollar amount with thousands separators and no cents,
/// e.g. `1234567.0` becomes `1,234,567`.
#[must_use]
pub fn usd(value: f64) -> String {
    let negative = value < 0.0;
    let digits = (value.abs().round() as u128).to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if negative {
        out.insert(0, '-');
    }
    out
}

/// First `n` characters of `s`, for log-friendly previews of addresses.
#[must_use]
pub fn preview(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
