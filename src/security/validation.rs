use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Required(String),
    TooShort { field: String, min: usize, actual: usize },
    TooLong { field: String, max: usize, actual: usize },
    InvalidFormat { field: String, expected: String },
    InvalidRange { field: String, min: String, max: String },
    InvalidValue { field: String, message: String },
    InvalidEmail(String),
    InvalidUrl(String),
    InvalidPhone(String),
    Custom(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required(field) => write!(f, "Field '{field}' is required"),
            Self::TooShort { field, min, actual } => {
                write!(f, "Field '{field}' is too short: {actual} < {min} chars")
            }
            Self::TooLong { field, max, actual } => {
                write!(f, "Field '{field}' is too long: {actual} > {max} chars")
            }
            Self::InvalidFormat { field, expected } => {
                write!(f, "Field '{field}' has invalid format, expected: {expected}")
            }
            Self::InvalidRange { field, min, max } => {
                write!(f, "Field '{field}' must be between {min} and {max}")
            }
            Self::InvalidValue { field, message } => {
                write!(f, "Field '{field}' has invalid value: {message}")
            }
            Self::InvalidEmail(email) => write!(f, "Invalid email address: {email}"),
            Self::InvalidUrl(url) => write!(f, "Invalid URL: {url}"),
            Self::InvalidPhone(phone) => write!(f, "Invalid phone number: {phone}"),
            Self::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn to_error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_error_messages().join("; "))
    }
}

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("Invalid email regex")
});

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)+(:\d+)?(/[-a-zA-Z0-9()@:%_\+.~#?&/=]*)?$"
    ).expect("Invalid URL regex")
});

static PHONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{6,14}$").expect("Invalid phone regex"));

static SLUG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("Invalid slug regex"));

static USERNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.-]{2,31}$").expect("Invalid username regex")
});

static CURRENCY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("Invalid currency regex"));

static CODENAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z_]*\.(view|add|change|delete)$").expect("Invalid codename regex")
});

pub fn validate_string_required(value: &str, field_name: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Required(field_name.to_string()))
    } else {
        Ok(())
    }
}

pub fn validate_length(
    value: &str,
    field_name: &str,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<(), ValidationError> {
    let len = value.chars().count();

    if let Some(min_len) = min {
        if len < min_len {
            return Err(ValidationError::TooShort {
                field: field_name.to_string(),
                min: min_len,
                actual: len,
            });
        }
    }

    if let Some(max_len) = max {
        if len > max_len {
            return Err(ValidationError::TooLong {
                field: field_name.to_string(),
                max: max_len,
                actual: len,
            });
        }
    }

    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err(ValidationError::InvalidEmail(email.to_string()));
    }
    Ok(())
}

pub fn validate_url(url: &str) -> Result<(), ValidationError> {
    if url.len() > 2048 || !URL_REGEX.is_match(url) {
        return Err(ValidationError::InvalidUrl(url.to_string()));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if PHONE_REGEX.is_match(&digits) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPhone(phone.to_string()))
    }
}

pub fn validate_slug(value: &str, field_name: &str) -> Result<(), ValidationError> {
    if SLUG_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: field_name.to_string(),
            expected: "lowercase alphanumeric with hyphens".to_string(),
        })
    }
}

pub fn validate_username(value: &str) -> Result<(), ValidationError> {
    if USERNAME_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "username".to_string(),
            expected: "3-32 chars, starting with a letter".to_string(),
        })
    }
}

pub fn validate_currency(value: &str) -> Result<(), ValidationError> {
    if CURRENCY_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            expected: "three-letter ISO 4217 code".to_string(),
        })
    }
}

pub fn validate_codename(value: &str) -> Result<(), ValidationError> {
    if CODENAME_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "permission".to_string(),
            expected: "resource.action".to_string(),
        })
    }
}

pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: &T,
    field_name: &str,
    min: Option<&T>,
    max: Option<&T>,
) -> Result<(), ValidationError> {
    let too_low = min.is_some_and(|m| value < m);
    let too_high = max.is_some_and(|m| value > m);

    if too_low || too_high {
        return Err(ValidationError::InvalidRange {
            field: field_name.to_string(),
            min: min.map_or_else(|| "-inf".to_string(), |m| m.to_string()),
            max: max.map_or_else(|| "inf".to_string(), |m| m.to_string()),
        });
    }

    Ok(())
}

pub fn validate_one_of(value: &str, field_name: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            field: field_name.to_string(),
            message: format!("must be one of {}", allowed.join(", ")),
        })
    }
}

/// Collects every failure instead of stopping at the first one.
pub struct Validator {
    result: ValidationResult,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            result: ValidationResult::new(),
        }
    }

    fn check(mut self, outcome: Result<(), ValidationError>) -> Self {
        if let Err(e) = outcome {
            self.result.add_error(e);
        }
        self
    }

    pub fn string_required(self, value: &str, field_name: &str) -> Self {
        self.check(validate_string_required(value, field_name))
    }

    pub fn length(self, value: &str, field_name: &str, min: Option<usize>, max: Option<usize>) -> Self {
        self.check(validate_length(value, field_name, min, max))
    }

    pub fn email(self, value: &str) -> Self {
        self.check(validate_email(value))
    }

    /// Checks an optional email; blank values are treated as absent.
    pub fn email_opt(self, value: Option<&str>) -> Self {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => self.email(v),
            None => self,
        }
    }

    pub fn url_opt(self, value: Option<&str>) -> Self {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => self.check(validate_url(v)),
            None => self,
        }
    }

    pub fn phone_opt(self, value: Option<&str>) -> Self {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => self.check(validate_phone(v)),
            None => self,
        }
    }

    pub fn slug(self, value: &str, field_name: &str) -> Self {
        self.check(validate_slug(value, field_name))
    }

    pub fn username(self, value: &str) -> Self {
        self.check(validate_username(value))
    }

    pub fn currency(self, value: &str) -> Self {
        self.check(validate_currency(value))
    }

    pub fn range<T: PartialOrd + std::fmt::Display>(
        self,
        value: &T,
        field_name: &str,
        min: Option<&T>,
        max: Option<&T>,
    ) -> Self {
        self.check(validate_range(value, field_name, min, max))
    }

    pub fn one_of(self, value: &str, field_name: &str, allowed: &[&str]) -> Self {
        self.check(validate_one_of(value, field_name, allowed))
    }

    pub fn custom<F>(mut self, validation_fn: F) -> Self
    where
        F: FnOnce() -> Option<ValidationError>,
    {
        if let Some(error) = validation_fn() {
            self.result.add_error(error);
        }
        self
    }

    pub fn validate(self) -> Result<(), ValidationResult> {
        if self.result.is_valid() {
            Ok(())
        } else {
            Err(self.result)
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn test_validate_length_counts_chars() {
        assert!(validate_length("héllo", "field", Some(1), Some(5)).is_ok());
        assert!(validate_length("hi", "field", Some(3), None).is_err());
        assert!(validate_length("hello world", "field", None, Some(5)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("test@example.com").is_ok());
        assert!(validate_email("user.name+tag@domain.co.uk").is_ok());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@domain.com").is_err());
        assert!(validate_email("user@").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://localhost.test:8080/path?query=1").is_ok());
        assert!(validate_url("ftp://invalid.com").is_err());
        assert!(validate_url("not-a-url").is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+1 (555) 123-4567").is_ok());
        assert!(validate_phone("1234567890").is_ok());
        assert!(validate_phone("123").is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("john_doe").is_ok());
        assert!(validate_username("j.smith").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("123user").is_err());
    }

    #[test]
    fn test_validate_currency() {
        assert!(validate_currency("USD").is_ok());
        assert!(validate_currency("usd").is_err());
        assert!(validate_currency("US").is_err());
    }

    #[test]
    fn test_validate_codename() {
        assert!(validate_codename("accounts.view").is_ok());
        assert!(validate_codename("sales_orders.delete").is_ok());
        assert!(validate_codename("accounts.fly").is_err());
        assert!(validate_codename("accounts").is_err());
    }

    #[test]
    fn test_validate_range_with_decimals() {
        let zero = BigDecimal::from(0);
        let hundred = BigDecimal::from(100);
        let ok = BigDecimal::from_str("12.5").expect("decimal");
        let bad = BigDecimal::from_str("100.01").expect("decimal");
        assert!(validate_range(&ok, "discount_percent", Some(&zero), Some(&hundred)).is_ok());
        assert!(validate_range(&bad, "discount_percent", Some(&zero), Some(&hundred)).is_err());
    }

    #[test]
    fn test_validate_one_of() {
        assert!(validate_one_of("won", "outcome", &["won", "lost"]).is_ok());
        let err = validate_one_of("maybe", "outcome", &["won", "lost"]).expect_err("rejected");
        assert!(err.to_string().contains("won, lost"));
    }

    #[test]
    fn test_validator_collects_all_errors() {
        let result = Validator::new()
            .string_required("", "name")
            .email_opt(Some("invalid-email"))
            .phone_opt(Some(""))
            .currency("usd")
            .validate();

        let errors = result.expect_err("should fail");
        assert_eq!(errors.errors().len(), 3);
        assert!(errors.to_string().contains("name"));
    }

    #[test]
    fn test_validator_passes() {
        let result = Validator::new()
            .string_required("Acme", "name")
            .length("Acme", "name", Some(1), Some(255))
            .email_opt(None)
            .url_opt(Some("https://acme.example.com"))
            .validate();

        assert!(result.is_ok());
    }
}
