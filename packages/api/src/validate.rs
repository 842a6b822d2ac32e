//! Input validation run by forms before anything reaches the session manager or
//! the notes store. A value that fails here never causes a network call.

use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_OTP_LEN: usize = 6;
pub const MAX_TITLE_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a valid email address")]
    InvalidEmail,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("Passwords don't match")]
    PasswordMismatch,
    #[error("Verification code must be at least 6 characters")]
    OtpTooShort,
    #[error("Title is required")]
    EmptyTitle,
    #[error("Title too long")]
    TitleTooLong,
    #[error("Content is required")]
    EmptyContent,
}

pub fn email(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    let domain_ok =
        !domain.contains('@') && domain.contains('.') && domain.split('.').all(|label| !label.is_empty());
    if local.is_empty() || !domain_ok || value.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

pub fn password(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// Sign-up form: both fields valid and identical.
pub fn new_password(value: &str, confirmation: &str) -> Result<(), ValidationError> {
    password(value)?;
    if value != confirmation {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

/// One-time codes are backend-defined; only a lower bound is enforced.
pub fn otp(value: &str) -> Result<(), ValidationError> {
    if value.trim().chars().count() < MIN_OTP_LEN {
        return Err(ValidationError::OtpTooShort);
    }
    Ok(())
}

pub fn note(title: &str, content: &str) -> Result<(), ValidationError> {
    let title_len = title.trim().chars().count();
    if title_len == 0 {
        return Err(ValidationError::EmptyTitle);
    }
    if title_len > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong);
    }
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(())
}
