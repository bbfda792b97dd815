use std::fmt;

use rand::Rng;
use thiserror::Error;

/// Characters a generated alias is drawn from.
pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Upper bound on the length of a caller-supplied alias.
pub const MAX_ALIAS_LENGTH: usize = 64;

/// A short public identifier mapped to a destination URL.
///
/// Aliases are case-sensitive. Generated aliases only use [`ALPHABET`];
/// caller-supplied ones may additionally contain `-` and `_`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Alias(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AliasValidationError {
    #[error("alias must not be empty")]
    Empty,
    #[error("alias must be at most {MAX_ALIAS_LENGTH} characters, got {0}")]
    TooLong(usize),
    #[error("alias contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl Alias {
    /// Validates a caller-supplied alias.
    ///
    /// # Errors
    /// Returns [`Err`] when the alias is empty, longer than [`MAX_ALIAS_LENGTH`],
    /// or contains anything other than ASCII letters, digits, `-` and `_`.
    pub fn new(alias: String) -> Result<Self, AliasValidationError> {
        if alias.is_empty() {
            return Err(AliasValidationError::Empty);
        }

        let len = alias.chars().count();
        if len > MAX_ALIAS_LENGTH {
            return Err(AliasValidationError::TooLong(len));
        }

        let invalid_chars: String = alias
            .chars()
            .filter(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
            .collect();
        if !invalid_chars.is_empty() {
            return Err(AliasValidationError::InvalidCharacters { invalid_chars });
        }

        Ok(Self(alias))
    }

    /// Draws `length` characters uniformly and independently from [`ALPHABET`].
    ///
    /// The result is not checked against storage; uniqueness is the store's job.
    ///
    /// # Panics
    /// Panics if `length` is zero.
    #[must_use]
    pub fn generate(length: usize) -> Self {
        assert!(length > 0, "generated aliases must be non-empty");

        let mut rng = rand::rng();
        let alias = (0..length)
            .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
            .collect();
        Self(alias)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
