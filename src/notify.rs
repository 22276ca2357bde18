use serde::Serialize;

use crate::config::Config;

/// 短信、邮件网关的出站通知。投递失败只记日志，不影响请求结果。
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    sms_gateway_url: Option<String>,
    email_gateway_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SmsMessage<'a> {
    to: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailMessage<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            sms_gateway_url: config.sms_gateway_url.clone(),
            email_gateway_url: config.email_gateway_url.clone(),
        }
    }

    pub async fn send_sms(&self, to: &str, message: &str) {
        let Some(url) = &self.sms_gateway_url else {
            tracing::debug!("SMS gateway not configured, skipping message to {}", to);
            return;
        };
        self.post(url, &SmsMessage { to, message }).await;
    }

    pub async fn send_email(&self, to: &str, subject: &str, body: &str) {
        let Some(url) = &self.email_gateway_url else {
            tracing::debug!("Email gateway not configured, skipping \"{}\" to {}", subject, to);
            return;
        };
        self.post(url, &EmailMessage { to, subject, body }).await;
    }

    async fn post<T: Serialize>(&self, url: &str, payload: &T) {
        match self.client.post(url).json(payload).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => tracing::warn!("Notification gateway {} returned {}", url, resp.status()),
            Err(e) => tracing::warn!("Failed to reach notification gateway {}: {}", url, e),
        }
    }
}
