//! Phone number normalization

/// Normalize a phone number to `+` followed by its digits.
///
/// Everything except ASCII digits is stripped; a number with no digits at
/// all yields `None`.
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("+{}", digits))
}
