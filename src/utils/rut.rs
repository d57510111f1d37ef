// src/utils/rut.rs
//! Chilean RUT (Rol Único Tributario) validation and formatting.
//!
//! A RUT is a 7-8 digit body followed by a modulo-11 check digit, where `K`
//! stands for 10. Both `12.345.678-5` and `12345678-5` forms are accepted.

/// Strips dots and dashes and uppercases the check digit.
fn normalize(rut: &str) -> String {
    rut.chars()
        .filter(|c| *c != '.' && *c != '-' && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Splits a normalized RUT into body and check digit if it has the right shape.
fn split(normalized: &str) -> Option<(&str, char)> {
    let (at, check) = normalized.char_indices().next_back()?;
    let body = &normalized[..at];
    let body_ok = (7..=8).contains(&body.len()) && body.chars().all(|c| c.is_ascii_digit());
    let check_ok = check.is_ascii_digit() || check == 'K';
    if body_ok && check_ok {
        Some((body, check))
    } else {
        None
    }
}

/// Computes the check digit for a RUT body.
///
/// Digits are weighted 2..=7 from the right, cycling.
pub fn check_digit(body: &str) -> Option<char> {
    let mut sum = 0u32;
    let mut weight = 2u32;
    for c in body.chars().rev() {
        sum += c.to_digit(10)? * weight;
        weight = if weight == 7 { 2 } else { weight + 1 };
    }
    match 11 - (sum % 11) {
        11 => Some('0'),
        10 => Some('K'),
        digit => char::from_digit(digit, 10),
    }
}

/// Returns `true` when the RUT is well formed and its check digit matches.
pub fn is_valid(rut: &str) -> bool {
    let normalized = normalize(rut);
    match split(&normalized) {
        Some((body, check)) => check_digit(body) == Some(check),
        None => false,
    }
}

/// Formats as `XX.XXX.XXX-X`. Malformed input is returned unchanged.
pub fn format(rut: &str) -> String {
    let normalized = normalize(rut);
    let Some((body, check)) = split(&normalized) else {
        return rut.to_string();
    };

    let mut grouped = String::with_capacity(body.len() + 3);
    for (i, c) in body.chars().enumerate() {
        if i > 0 && (body.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("{}-{}", grouped, check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ruts() {
        assert!(is_valid("12.345.678-5"));
        assert!(is_valid("12345678-5"));
        assert!(is_valid("16.358.742-4"));
        assert!(is_valid("10.000.013-k"));
    }

    #[test]
    fn test_invalid_ruts() {
        assert!(!is_valid("12.345.678-9"));
        assert!(!is_valid("123-4"));
        assert!(!is_valid("ABCDEFGH-1"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_multibyte_input_is_rejected() {
        assert!(!is_valid("1234567é"));
        assert!(!is_valid("12.345.678-€"));
        assert!(!is_valid("ñ"));
        assert_eq!(format("1234567é"), "1234567é");
    }

    #[test]
    fn test_check_digit_special_values() {
        assert_eq!(check_digit("10000013"), Some('K'));
        assert_eq!(check_digit("1000013"), Some('0'));
    }

    #[test]
    fn test_format() {
        assert_eq!(format("123456785"), "12.345.678-5");
        assert_eq!(format("1.000.013-0"), "1.000.013-0");
        assert_eq!(format("not a rut"), "not a rut");
    }
}
