/// Input validators for registration, login and activation requests
///
/// Each `parse_*` function checks one field and returns either the cleaned
/// value or a `FieldError` describing the first problem found. The
/// `validate_*` helpers collect those failures into a `ValidationErrors` map
/// so a response can report every bad field at once.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationErrors;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 64;
const MIN_PASSWORD_LENGTH: usize = 8;
/// bcrypt ignores everything past 72 bytes
const MAX_PASSWORD_LENGTH: usize = 72;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("email regex is valid");

    static ref USERNAME_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("username regex is valid");

    // Unpadded RFC 4648 base32
    static ref CODE_REGEX: Regex = Regex::new(r"^[A-Z2-7]+$").expect("code regex is valid");
}

/// A single failed field check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    EmptyField(&'static str),
    TooShort(&'static str, usize),
    TooLong(&'static str, usize),
    InvalidFormat(&'static str),
    SuspiciousContent(&'static str),
}

impl FieldError {
    pub fn field(&self) -> &'static str {
        match self {
            FieldError::EmptyField(field)
            | FieldError::TooShort(field, _)
            | FieldError::TooLong(field, _)
            | FieldError::InvalidFormat(field)
            | FieldError::SuspiciousContent(field) => field,
        }
    }

    /// Message without the field name, for field-keyed responses
    pub fn message(&self) -> String {
        match self {
            FieldError::EmptyField(_) => "must be provided".to_string(),
            FieldError::TooShort(_, min) => format!("must be at least {} bytes long", min),
            FieldError::TooLong(_, max) => format!("must not be more than {} bytes long", max),
            FieldError::InvalidFormat(_) => "has invalid format".to_string(),
            FieldError::SuspiciousContent(_) => "contains suspicious content".to_string(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field(), self.message())
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(err: FieldError) -> Self {
        ValidationErrors::single(err.field(), err.message())
    }
}

/// Validates an email address and returns it trimmed
pub fn parse_email(email: &str) -> Result<String, FieldError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(FieldError::EmptyField("email"));
    }
    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(FieldError::TooShort("email", MIN_EMAIL_LENGTH));
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(FieldError::TooLong("email", MAX_EMAIL_LENGTH));
    }
    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(FieldError::InvalidFormat("email"));
    }
    if has_suspicious_email_patterns(trimmed) {
        return Err(FieldError::SuspiciousContent("email"));
    }

    Ok(trimmed.to_string())
}

/// Validates a username and returns it trimmed
pub fn parse_username(username: &str) -> Result<String, FieldError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(FieldError::EmptyField("username"));
    }
    if trimmed.len() < MIN_USERNAME_LENGTH {
        return Err(FieldError::TooShort("username", MIN_USERNAME_LENGTH));
    }
    if trimmed.len() > MAX_USERNAME_LENGTH {
        return Err(FieldError::TooLong("username", MAX_USERNAME_LENGTH));
    }
    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(FieldError::InvalidFormat("username"));
    }

    Ok(trimmed.to_string())
}

/// Checks a plaintext password. The password is never trimmed or echoed back.
pub fn check_password_plaintext(password: &str) -> Result<(), FieldError> {
    if password.is_empty() {
        return Err(FieldError::EmptyField("password"));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(FieldError::TooShort("password", MIN_PASSWORD_LENGTH));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(FieldError::TooLong("password", MAX_PASSWORD_LENGTH));
    }
    if password.contains('\0') {
        return Err(FieldError::SuspiciousContent("password"));
    }

    Ok(())
}

/// Validates the shape of a plaintext verification code
pub fn parse_verification_code(code: &str) -> Result<String, FieldError> {
    let trimmed = code.trim();

    if trimmed.is_empty() {
        return Err(FieldError::EmptyField("code"));
    }
    if trimmed.len() > 64 || !CODE_REGEX.is_match(trimmed) {
        return Err(FieldError::InvalidFormat("code"));
    }

    Ok(trimmed.to_string())
}

/// Validated registration input
#[derive(Debug)]
pub struct RegistrationInput {
    pub username: String,
    pub email: String,
}

/// Validates every registration field, reporting all failures together
pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
) -> Result<RegistrationInput, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let username = record(&mut errors, parse_username(username));
    let email = record(&mut errors, parse_email(email));
    record(&mut errors, check_password_plaintext(password));

    match (username, email) {
        (Some(username), Some(email)) if errors.is_empty() => {
            Ok(RegistrationInput { username, email })
        }
        _ => Err(errors),
    }
}

/// Which identifier a login request resolves the user by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(String),
    Username(String),
}

/// Validates a login request.
///
/// The password must be well-formed and at least one of email or username
/// supplied. A well-formed email takes precedence over the username. When
/// neither identifier is well-formed the request fails here, before any
/// storage lookup.
pub fn validate_login(
    username: Option<&str>,
    email: Option<&str>,
    password: &str,
) -> Result<LoginIdentifier, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    record(&mut errors, check_password_plaintext(password));

    let username = username.filter(|u| !u.trim().is_empty());
    let email = email.filter(|e| !e.trim().is_empty());

    if username.is_none() && email.is_none() {
        errors.add("email", "an email or username must be provided");
        return Err(errors);
    }

    let by_email = email.map(parse_email);
    let by_username = username.map(parse_username);

    let identifier = match (by_email, by_username) {
        (Some(Ok(email)), _) => Some(LoginIdentifier::Email(email)),
        (_, Some(Ok(username))) => Some(LoginIdentifier::Username(username)),
        (email_result, username_result) => {
            if let Some(Err(e)) = email_result {
                errors.add(e.field(), e.message());
            }
            if let Some(Err(e)) = username_result {
                errors.add(e.field(), e.message());
            }
            None
        }
    };

    match identifier {
        Some(identifier) if errors.is_empty() => Ok(identifier),
        _ => Err(errors),
    }
}

fn record<T>(errors: &mut ValidationErrors, result: Result<T, FieldError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            errors.add(e.field(), e.message());
            None
        }
    }
}

/// Detects suspicious patterns in email addresses that might indicate phishing
fn has_suspicious_email_patterns(email: &str) -> bool {
    if let Some(at_pos) = email.find('@') {
        if email[..at_pos].len() > MAX_LOCAL_PART_LENGTH {
            return true;
        }
    }

    if email.matches('@').count() != 1 {
        return true;
    }

    email.contains('\0')
}
