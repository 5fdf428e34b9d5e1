use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_letter: bool,
    pub require_digit: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_letter: true,
            require_digit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argon2Config {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost_kib: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PasswordIssue {
    TooShort { min: usize, actual: usize },
    TooLong { max: usize, actual: usize },
    MissingLetter,
    MissingDigit,
    CommonPassword,
    ContainsUsername,
}

impl PasswordIssue {
    pub fn message(&self) -> String {
        match self {
            Self::TooShort { min, actual } => {
                format!("Password must be at least {min} characters (currently {actual})")
            }
            Self::TooLong { max, actual } => {
                format!("Password must be at most {max} characters (currently {actual})")
            }
            Self::MissingLetter => "Password must contain at least one letter".into(),
            Self::MissingDigit => "Password must contain at least one digit".into(),
            Self::CommonPassword => "This password is too common and easily guessed".into(),
            Self::ContainsUsername => "Password must not contain your username".into(),
        }
    }
}

pub struct CrmPasswordHasher {
    argon2: Argon2<'static>,
    policy: PasswordPolicy,
}

impl CrmPasswordHasher {
    pub fn new(argon2_config: Argon2Config, policy: PasswordPolicy) -> Result<Self> {
        let params = Params::new(
            argon2_config.memory_cost_kib,
            argon2_config.time_cost,
            argon2_config.parallelism,
            None,
        )
        .map_err(|e| anyhow!("Invalid Argon2 parameters: {e}"))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            policy,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(Argon2Config::default(), PasswordPolicy::default())
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash password: {e}"))?;

        Ok(hash.to_string())
    }

    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash =
            PasswordHash::new(hash).map_err(|e| anyhow!("Invalid password hash format: {e}"))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(anyhow!("Password verification failed: {e}")),
        }
    }

    pub fn check_policy(&self, password: &str, username: Option<&str>) -> Vec<PasswordIssue> {
        let mut issues = Vec::new();
        let length = password.chars().count();

        if length < self.policy.min_length {
            issues.push(PasswordIssue::TooShort {
                min: self.policy.min_length,
                actual: length,
            });
        }
        if length > self.policy.max_length {
            issues.push(PasswordIssue::TooLong {
                max: self.policy.max_length,
                actual: length,
            });
        }
        if self.policy.require_letter && !password.chars().any(char::is_alphabetic) {
            issues.push(PasswordIssue::MissingLetter);
        }
        if self.policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            issues.push(PasswordIssue::MissingDigit);
        }
        if is_common_password(password) {
            issues.push(PasswordIssue::CommonPassword);
        }
        if let Some(uname) = username.filter(|u| u.len() >= 3) {
            if password.to_lowercase().contains(&uname.to_lowercase()) {
                issues.push(PasswordIssue::ContainsUsername);
            }
        }

        if !issues.is_empty() {
            debug!("Password rejected with {} policy issue(s)", issues.len());
        }
        issues
    }
}

static DEFAULT_HASHER: LazyLock<Option<CrmPasswordHasher>> =
    LazyLock::new(|| CrmPasswordHasher::with_defaults().ok());

fn default_hasher() -> Result<&'static CrmPasswordHasher> {
    DEFAULT_HASHER
        .as_ref()
        .ok_or_else(|| anyhow!("Password hasher is not available"))
}

pub fn hash_password(password: &str) -> Result<String> {
    default_hasher()?.hash(password)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    default_hasher()?.verify(password, hash)
}

/// Returns the policy violations as human readable messages.
pub fn password_policy_errors(password: &str, username: Option<&str>) -> Vec<String> {
    match default_hasher() {
        Ok(hasher) => hasher
            .check_policy(password, username)
            .iter()
            .map(PasswordIssue::message)
            .collect(),
        Err(e) => vec![e.to_string()],
    }
}

/// A random password for seeded accounts when none was configured.
pub fn generate_password() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("Crm{}9", &random[..16])
}

fn is_common_password(password: &str) -> bool {
    const COMMON_PASSWORDS: &[&str] = &[
        "password",
        "12345678",
        "123456789",
        "qwerty123",
        "letmein1",
        "welcome1",
        "admin123",
        "changeme1",
        "passw0rd",
        "p@ssw0rd",
        "password1",
        "password123",
        "iloveyou1",
        "1234567890",
    ];

    let lower = password.to_lowercase();
    COMMON_PASSWORDS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> CrmPasswordHasher {
        CrmPasswordHasher::new(
            Argon2Config {
                memory_cost_kib: 1024,
                time_cost: 1,
                parallelism: 1,
            },
            PasswordPolicy::default(),
        )
        .expect("hasher")
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("Pipeline2024").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Pipeline2024", &hash).expect("verify"));
        assert!(!hasher.verify("pipeline2024", &hash).expect("verify"));
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = fast_hasher();
        let a = hasher.hash("Pipeline2024").expect("hash");
        let b = hasher.hash("Pipeline2024").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_hash_is_error() {
        assert!(fast_hasher().verify("anything", "not-a-hash").is_err());
    }

    #[test]
    fn test_policy_accepts_reasonable_password() {
        assert!(fast_hasher().check_policy("Quarterly9Goals", Some("jdoe")).is_empty());
    }

    #[test]
    fn test_policy_issues() {
        let hasher = fast_hasher();
        let issues = hasher.check_policy("short", None);
        assert!(issues.contains(&PasswordIssue::TooShort { min: 8, actual: 5 }));
        assert!(issues.contains(&PasswordIssue::MissingDigit));

        assert!(hasher
            .check_policy("password123", None)
            .contains(&PasswordIssue::CommonPassword));
        assert!(hasher
            .check_policy("jdoe-2024-secure", Some("JDoe"))
            .contains(&PasswordIssue::ContainsUsername));
        assert!(hasher
            .check_policy("1234567890123", None)
            .contains(&PasswordIssue::MissingLetter));
    }

    #[test]
    fn test_generated_password_meets_policy() {
        let password = generate_password();
        assert!(fast_hasher().check_policy(&password, Some("admin")).is_empty());
        assert_ne!(password, generate_password());
    }

    #[test]
    fn test_policy_error_messages() {
        let errors = password_policy_errors("abc", None);
        assert!(errors.iter().any(|m| m.contains("at least 8")));
    }
}
