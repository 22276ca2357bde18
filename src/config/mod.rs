use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub otp_ttl_secs: u64,
    pub reset_token_ttl_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub login_attempt_limit: u32,
    pub otp_attempt_limit: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub site_url: String,
    pub app_url: String,
    pub app_env: String,
    pub sms_gateway_url: Option<String>,
    pub email_gateway_url: Option<String>,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = var_or("JWT_EXPIRATION", "24")
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);
        let otp_ttl_minutes = var_or("OTP_TTL_MINUTES", "10").parse::<u64>().unwrap_or(10);
        let reset_ttl_minutes = var_or("RESET_TOKEN_TTL_MINUTES", "60")
            .parse::<u64>()
            .unwrap_or(60);
        let site_url = var_or("SITE_URL", "http://localhost:3000");

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            otp_ttl_secs: otp_ttl_minutes * 60,
            reset_token_ttl_secs: reset_ttl_minutes * 60,
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW", "60").parse().unwrap_or(60),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", "100").parse().unwrap_or(100),
            login_attempt_limit: var_or("LOGIN_ATTEMPT_LIMIT", "5").parse().unwrap_or(5),
            otp_attempt_limit: var_or("OTP_ATTEMPT_LIMIT", "5").parse().unwrap_or(5),
            server_host: var_or("SERVER_HOST", "0.0.0.0"),
            server_port: var_or("SERVER_PORT", "3000").parse().unwrap_or(3000),
            api_base_uri: var_or("API_BASE_URI", "/api"),
            app_url: optional_var("APP_URL").unwrap_or_else(|| site_url.clone()),
            site_url,
            app_env: var_or("APP_ENV", "production"),
            sms_gateway_url: optional_var("SMS_GATEWAY_URL"),
            email_gateway_url: optional_var("EMAIL_GATEWAY_URL"),
        })
    }

    /// 开发环境下会把 OTP 和一次性令牌直接返回给调用方
    pub fn is_development(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("development")
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl_secs)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}
