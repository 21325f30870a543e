//! Password hashing with Argon2

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHash(e.to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Validate password strength
pub fn validate_password_strength(password: &str) -> Result<(), PasswordValidationError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(PasswordValidationError::TooShort);
    }
    if length > MAX_PASSWORD_LEN {
        return Err(PasswordValidationError::TooLong);
    }

    if !password.chars().any(char::is_alphabetic) {
        return Err(PasswordValidationError::MissingLetter);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordValidationError::MissingDigit);
    }

    if is_common_password(password) {
        return Err(PasswordValidationError::TooCommon);
    }

    Ok(())
}

/// Check if password is in the common passwords list
fn is_common_password(password: &str) -> bool {
    let password_lower = password.to_lowercase();

    const COMMON_PASSWORDS: &[&str] = &[
        "password1",
        "password12",
        "password123",
        "abcd1234",
        "qwerty123",
        "azerty123",
        "admin123",
        "welcome1",
        "welcome123",
        "letmein1",
        "iloveyou1",
        "motdepasse1",
        "soleil123",
        "bonjour1",
        "passw0rd",
        "p@ssw0rd",
    ];

    COMMON_PASSWORDS.contains(&password_lower.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error("Invalid password hash: {0}")]
    InvalidHash(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PasswordValidationError {
    #[error("Password must be at least 8 characters")]
    TooShort,
    #[error("Password must be at most 128 characters")]
    TooLong,
    #[error("Password must contain at least one letter")]
    MissingLetter,
    #[error("Password must contain at least one digit")]
    MissingDigit,
    #[error("Password is too common")]
    TooCommon,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse 1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse 1", &hash).unwrap());
        assert!(!verify_password("wrong horse 1", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(matches!(
            verify_password("anything", "not-a-hash"),
            Err(PasswordError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_strength_rules() {
        assert_eq!(
            validate_password_strength("abc12"),
            Err(PasswordValidationError::TooShort)
        );
        assert_eq!(
            validate_password_strength("12345678"),
            Err(PasswordValidationError::MissingLetter)
        );
        assert_eq!(
            validate_password_strength("abcdefgh"),
            Err(PasswordValidationError::MissingDigit)
        );
        assert_eq!(
            validate_password_strength("Password123"),
            Err(PasswordValidationError::TooCommon)
        );
        assert_eq!(
            validate_password_strength(&"a1".repeat(65)),
            Err(PasswordValidationError::TooLong)
        );
        assert!(validate_password_strength("rédaction2024").is_ok());
    }
}
