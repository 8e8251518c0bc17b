use once_cell::sync::Lazy;
use regex::Regex;
use validator::{ValidateUrl, ValidationError};

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,20}$").unwrap());

/// 用户名：3-20 位字母、数字或下划线
pub fn validate_username(value: &str) -> Result<(), ValidationError> {
    if USERNAME_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("username.invalid"))
    }
}

/// 商品链接必须是 http(s) 绝对地址
pub fn validate_link(value: &str) -> Result<(), ValidationError> {
    let lower = value.to_ascii_lowercase();
    if value.validate_url() && (lower.starts_with("http://") || lower.starts_with("https://")) {
        Ok(())
    } else {
        Err(ValidationError::new("link.invalid"))
    }
}

pub fn validate_links(values: &[String]) -> Result<(), ValidationError> {
    values.iter().try_for_each(|v| validate_link(v))
}

pub fn validate_non_negative(value: impl std::borrow::Borrow<f64>) -> Result<(), ValidationError> {
    let value = value.borrow();
    if value.is_finite() && *value >= 0.0 { Ok(()) } else { Err(ValidationError::new("price.invalid")) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames() {
        assert!(validate_username("ana_maria").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("a".repeat(21).as_str()).is_err());
    }

    #[test]
    fn links_must_be_absolute_http() {
        assert!(validate_link("https://example.com/item?id=1").is_ok());
        assert!(validate_link("http://shop.example.org").is_ok());
        assert!(validate_link("example.com").is_err());
        assert!(validate_link("ftp://example.com/file").is_err());
        assert!(validate_links(&["https://a.com".to_string(), "nope".to_string()]).is_err());
    }

    #[test]
    fn prices() {
        assert!(validate_non_negative(&0.0).is_ok());
        assert!(validate_non_negative(&-1.0).is_err());
        assert!(validate_non_negative(&f64::NAN).is_err());
    }
}
