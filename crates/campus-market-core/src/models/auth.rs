use serde::{Deserialize, Serialize};

/// Body for `/login` and `/register`
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    pub refresh_token: &'a str,
}

/// A rotated refresh token is optional; when absent the old one stays valid.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
}

/// Generic `{ "message": ... }` acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_response() {
        let json = r#"{"message": "Login successful", "user_id": "65a1f0", "token": "a.b.c", "refreshToken": "r.s.t"}"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.user_id, "65a1f0");
        assert_eq!(resp.token, "a.b.c");
        assert_eq!(resp.refresh_token.as_deref(), Some("r.s.t"));
    }

    #[test]
    fn test_parse_refresh_response_without_rotation() {
        let resp: RefreshResponse = serde_json::from_str(r#"{"token": "T2"}"#).unwrap();
        assert_eq!(resp.token, "T2");
        assert!(resp.refresh_token.is_none());
    }

    #[test]
    fn test_refresh_request_uses_camel_case_key() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "r" }).unwrap();
        assert_eq!(body, serde_json::json!({ "refreshToken": "r" }));
    }
}
