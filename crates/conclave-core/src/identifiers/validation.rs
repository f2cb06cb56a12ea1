//! Identifier validation rules

use std::fmt;

/// Maximum length for validated string identifiers
pub const MAX_ID_LENGTH: usize = 128;

/// Error type for identifier validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdValidationError {
    /// The identifier string is empty
    Empty,
    /// The identifier has leading or trailing whitespace
    LeadingTrailingWhitespace,
    /// The identifier contains characters outside the allowed set
    InvalidCharacters,
    /// The identifier exceeds the maximum length
    TooLong { length: usize, max: usize },
    /// The identifier is not a UUID
    MalformedUuid(String),
}

impl fmt::Display for IdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Identifier cannot be empty"),
            Self::LeadingTrailingWhitespace => {
                write!(f, "Identifier cannot have leading or trailing whitespace")
            }
            Self::InvalidCharacters => write!(
                f,
                "Identifier can only contain alphanumeric characters, hyphens, underscores, and dots"
            ),
            Self::TooLong { length, max } => {
                write!(f, "Identifier too long ({} chars, max {})", length, max)
            }
            Self::MalformedUuid(reason) => write!(f, "Identifier is not a valid UUID: {}", reason),
        }
    }
}

impl std::error::Error for IdValidationError {}

/// Validator shared by every string identifier
pub struct IdValidator;

impl IdValidator {
    /// Validate an identifier string.
    ///
    /// Accepts 1 to 128 characters drawn from alphanumerics, `-`, `_` and `.`,
    /// without surrounding whitespace.
    ///
    /// ```rust
    /// use conclave_core::identifiers::IdValidator;
    ///
    /// assert!(IdValidator::validate("default").is_ok());
    /// assert!(IdValidator::validate("analyzeIntent").is_ok());
    /// assert!(IdValidator::validate("").is_err());
    /// assert!(IdValidator::validate("a b").is_err());
    /// ```
    pub fn validate(id: &str) -> Result<&str, IdValidationError> {
        if id.is_empty() {
            return Err(IdValidationError::Empty);
        }

        if id != id.trim() {
            return Err(IdValidationError::LeadingTrailingWhitespace);
        }

        let length = id.chars().count();
        if length > MAX_ID_LENGTH {
            return Err(IdValidationError::TooLong {
                length,
                max: MAX_ID_LENGTH,
            });
        }

        if !id.chars().all(Self::is_valid_char) {
            return Err(IdValidationError::InvalidCharacters);
        }

        Ok(id)
    }

    /// Validate a free-form key: any non-empty string is accepted.
    ///
    /// ```rust
    /// use conclave_core::identifiers::IdValidator;
    ///
    /// assert!(IdValidator::validate_key("chat session").is_ok());
    /// assert!(IdValidator::validate_key("tab:1").is_ok());
    /// assert!(IdValidator::validate_key("").is_err());
    /// ```
    pub fn validate_key(id: &str) -> Result<&str, IdValidationError> {
        if id.is_empty() {
            return Err(IdValidationError::Empty);
        }
        Ok(id)
    }

    /// Check if a character is valid in an identifier
    pub fn is_valid_char(c: char) -> bool {
        c.is_alphanumeric() || c == '-' || c == '_' || c == '.'
    }
}
