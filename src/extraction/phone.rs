//! Phone number normalization

use crate::config::PhoneFormat;

/// Normalize a North American number.
///
/// Non-digits are stripped; a leading `1` country code on an 11-digit
/// string is dropped so formatted output can be fed back in. Anything that
/// is not then exactly 10 digits is rejected.
pub fn format_phone(raw: &str, format: PhoneFormat) -> Option<String> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits.remove(0);
    }
    if digits.len() != 10 {
        return None;
    }

    let body = if format.hyphenate {
        format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..])
    } else {
        digits
    };

    Some(match (format.country_code, format.hyphenate) {
        (true, true) => format!("+1-{}", body),
        (true, false) => format!("+1{}", body),
        (false, _) => body,
    })
}
