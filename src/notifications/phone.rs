use lazy_static::lazy_static;
use regex::Regex;

use super::NotificationError;

lazy_static! {
    static ref E164: Regex = Regex::new(r"^\+[1-9]\d{7,14}$").expect("valid E.164 pattern");
}

/// Normalises a locally written phone number to E.164.
///
/// `012-345 6789` with country code `60` becomes `+60123456789`. Numbers
/// already carrying `+` or an `00` international prefix keep their own code.
pub fn normalize_msisdn(raw: &str, default_country_code: &str) -> Result<String, NotificationError> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.' | '+'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(NotificationError::InvalidRecipient(format!(
            "`{}` is not a phone number",
            raw
        )));
    }

    let candidate = if has_plus {
        format!("+{digits}")
    } else if let Some(international) = digits.strip_prefix("00") {
        format!("+{international}")
    } else if let Some(national) = digits.strip_prefix('0') {
        format!("+{default_country_code}{national}")
    } else if digits.starts_with(default_country_code) {
        format!("+{digits}")
    } else {
        format!("+{default_country_code}{digits}")
    };

    if E164.is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(NotificationError::InvalidRecipient(format!(
            "`{}` does not form a valid E.164 number",
            raw
        )))
    }
}
