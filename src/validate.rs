//! Format rules for registration and password-change input.
//!
//! Length limits and character classes mirror what the account store
//! accepts; everything here returns `InvalidInput` with a message naming
//! the offending field.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AuthError, AuthResult};

static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();

fn username_regex() -> &'static Regex {
    USERNAME_REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]{3,50}$").expect("username regex"))
}

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"))
}

fn name_regex() -> &'static Regex {
    NAME_REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z]{2,50}$").expect("name regex"))
}

fn phone_regex() -> &'static Regex {
    PHONE_REGEX.get_or_init(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone regex"))
}

/// 3-50 characters, letters and digits only.
pub fn username(value: &str) -> AuthResult<()> {
    if username_regex().is_match(value) {
        Ok(())
    } else {
        Err(AuthError::InvalidInput(
            "username must be 3-50 alphanumeric characters".into(),
        ))
    }
}

/// Mailbox-shaped and at most 100 characters.
pub fn email(value: &str) -> AuthResult<()> {
    if value.len() <= 100 && email_regex().is_match(value) {
        Ok(())
    } else {
        Err(AuthError::InvalidInput("email address is not valid".into()))
    }
}

/// 6-100 characters with at least one lowercase letter, one uppercase
/// letter, one digit, and one symbol.
pub fn password(value: &str) -> AuthResult<()> {
    if value.len() < 6 || value.len() > 100 {
        return Err(AuthError::InvalidInput(
            "password must be 6-100 characters".into(),
        ));
    }

    let has_lower = value.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = value.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = value.chars().any(|c| c.is_ascii_digit());
    let has_symbol = value.chars().any(|c| !c.is_ascii_alphanumeric());

    if has_lower && has_upper && has_digit && has_symbol {
        Ok(())
    } else {
        Err(AuthError::InvalidInput(
            "password needs a lowercase letter, an uppercase letter, a digit, and a symbol".into(),
        ))
    }
}

/// Letters only, 2-50 characters, when a name is given at all.
pub fn optional_name(field: &'static str, value: Option<&str>) -> AuthResult<()> {
    match value {
        Some(value) if !name_regex().is_match(value) => Err(AuthError::InvalidInput(format!(
            "{field} must be 2-50 letters"
        ))),
        _ => Ok(()),
    }
}

/// E.164-style number, when a phone is given at all.
pub fn optional_phone(value: Option<&str>) -> AuthResult<()> {
    match value {
        Some(value) if !phone_regex().is_match(value) => Err(AuthError::InvalidInput(
            "phone number is not valid".into(),
        )),
        _ => Ok(()),
    }
}
