use serde::{Deserialize, Serialize};

/// 统一响应包装。`code` 为 0 表示成功。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "success".into(),
            resp_data: Some(data),
        }
    }

    pub fn with_message(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            resp_data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            resp_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_omits_payload() {
        let body = serde_json::to_value(ApiResponse::error(1004, "missing")).unwrap();
        assert_eq!(body["code"], 1004);
        assert_eq!(body["msg"], "missing");
        assert!(body.get("respData").is_none());
    }

    #[test]
    fn success_envelope_uses_camel_case() {
        let body = serde_json::to_value(ApiResponse::success(vec![1, 2])).unwrap();
        assert_eq!(body["code"], 0);
        assert_eq!(body["msg"], "success");
        assert_eq!(body["respData"], serde_json::json!([1, 2]));
    }
}
