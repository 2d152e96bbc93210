//! Positional field formatting
//!
//! Numeric fields are right-justified and zero-padded, text fields are
//! left-justified, space-padded and truncated. Output is always printable
//! ASCII so that character width equals byte width.

use super::BatchFileError;

/// Replace anything outside printable ASCII with a space
fn sanitize(text: &str) -> impl Iterator<Item = char> + '_ {
    text.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { ' ' })
}

/// Left-justified text, space-padded or truncated to `width`
pub fn alpha(text: &str, width: usize) -> String {
    let mut out: String = sanitize(text).take(width).collect();
    while out.len() < width {
        out.push(' ');
    }
    out
}

/// Right-justified text, space-padded on the left, truncated to `width`
pub fn alpha_right(text: &str, width: usize) -> String {
    let clipped: String = sanitize(text.trim()).take(width).collect();
    format!("{:>width$}", clipped, width = width)
}

/// Zero-padded number; fails when it does not fit in `width` digits
pub fn numeric(value: u64, width: usize, field: &'static str) -> Result<String, BatchFileError> {
    let out = format!("{:0width$}", value, width = width);
    if out.len() > width {
        return Err(BatchFileError::FieldOverflow { field, value });
    }
    Ok(out)
}

/// Zero-padded low-order `width` digits (used for hash fields)
pub fn numeric_mod(value: u64, width: usize) -> String {
    let modulus = 10u64.pow(width as u32);
    format!("{:0width$}", value % modulus, width = width)
}

/// Digit string zero-padded on the left to `width`
pub fn digits(text: &str, width: usize, field: &'static str) -> Result<String, BatchFileError> {
    let text = text.trim();
    if text.is_empty() || text.len() > width || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BatchFileError::InvalidDigits {
            field,
            value: text.to_string(),
        });
    }
    Ok(format!("{:0>width$}", text, width = width))
}
