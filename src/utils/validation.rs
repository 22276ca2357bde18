use once_cell::sync::Lazy;
use regex::Regex;

static NATIONAL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{13,16}$").expect("valid national id regex"));

// 布隆迪手机号：+257 XX XXX XXX
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+257 [0-9]{2} [0-9]{3} [0-9]{3}$").expect("valid phone regex"));

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

pub const MIN_PASSWORD_LENGTH: usize = 6;

pub fn is_valid_national_id(value: &str) -> bool {
    NATIONAL_ID_RE.is_match(value)
}

pub fn is_valid_phone_number(value: &str) -> bool {
    PHONE_RE.is_match(value)
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_valid_password(value: &str) -> bool {
    value.chars().count() >= MIN_PASSWORD_LENGTH
}

/// 空字符串和纯空白都算缺失
pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
