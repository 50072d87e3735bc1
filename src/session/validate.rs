use super::error::SessionError;

const MAX_SESSION_ID_LEN: usize = 128;

/// Check that a session id is usable as a registry key and a directory suffix.
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    if id.is_empty() {
        return Err(SessionError::InvalidSessionId("session id is required".into()));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(SessionError::InvalidSessionId(format!(
            "session id longer than {MAX_SESSION_ID_LEN} characters"
        )));
    }
    if id == "." || id == ".." {
        return Err(SessionError::InvalidSessionId(id.to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(SessionError::InvalidSessionId(format!(
            "'{id}' may only contain letters, digits, '_', '-' and '.'"
        )));
    }
    Ok(())
}

/// Normalize a phone number to the international digits-only form.
///
/// Non-digits are stripped first. National numbers (10 or 11 digits) get the
/// country code prepended; numbers already carrying the country code at the
/// matching length pass through.
pub fn normalize_phone(raw: &str, country_code: &str) -> Result<String, SessionError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let cc_len = country_code.len();

    match digits.len() {
        10 | 11 => Ok(format!("{country_code}{digits}")),
        n if cc_len > 0 && (n == 10 + cc_len || n == 11 + cc_len) && digits.starts_with(country_code) => {
            Ok(digits)
        }
        _ => Err(SessionError::InvalidPhone(raw.to_string())),
    }
}

/// Address a recipient: full JIDs pass through, bare numbers get the user domain.
pub fn recipient_jid(number: &str) -> String {
    let trimmed = number.trim();
    if trimmed.contains('@') {
        trimmed.to_string()
    } else {
        format!("{trimmed}@s.whatsapp.net")
    }
}
