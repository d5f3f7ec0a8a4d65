//! Core protocol types for Warden's wire format.
//!
//! Every type here travels "on the wire": one JSON object per line, one
//! response per request, strictly in arrival order.
//!
//! ```text
//! → {"type":"login","username":"alice","password":"secret1"}
//! ← {"status":"success","data":{"token":"…","user_id":"…","expires_at":1700000000,…}}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// RequestKind: the closed set of operations
// ---------------------------------------------------------------------------

/// The operations a client can ask for.
///
/// The `type` field of a [`Request`] is kept as a raw string during
/// decoding and only then classified, so that an unknown kind still
/// decodes and can be answered with an error that names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Register,
    Login,
    Logout,
    Validate,
    Refresh,
}

impl RequestKind {
    /// The wire spelling of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Register => "register",
            RequestKind::Login => "login",
            RequestKind::Logout => "logout",
            RequestKind::Validate => "validate",
            RequestKind::Refresh => "refresh",
        }
    }
}

impl FromStr for RequestKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(RequestKind::Register),
            "login" => Ok(RequestKind::Login),
            "logout" => Ok(RequestKind::Logout),
            "validate" => Ok(RequestKind::Validate),
            "refresh" => Ok(RequestKind::Refresh),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A client request.
///
/// Which optional fields are required depends on the kind:
///
/// | kind       | fields                          |
/// |------------|---------------------------------|
/// | `register` | `username`, `email`, `password` |
/// | `login`    | `username`, `password`          |
/// | `logout`   | `token`                         |
/// | `validate` | `token`                         |
/// | `refresh`  | `token`                         |
///
/// An empty string is treated the same as an absent field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Request {
    /// Classifies the raw `type` field.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownKind`] carrying the received string.
    pub fn kind(&self) -> Result<RequestKind, ProtocolError> {
        self.kind.parse()
    }

    /// Builds a request of the given kind with no fields set.
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The username, if present and non-empty.
    pub fn username(&self) -> Option<&str> {
        non_empty(&self.username)
    }

    /// The email, if present and non-empty.
    pub fn email(&self) -> Option<&str> {
        non_empty(&self.email)
    }

    /// The password, if present and non-empty.
    pub fn password(&self) -> Option<&str> {
        non_empty(&self.password)
    }

    /// The token, if present and non-empty.
    pub fn token(&self) -> Option<&str> {
        non_empty(&self.token)
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Outcome marker of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// A server response. Exactly one is written per request.
///
/// `message` is present on errors, `data` on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl Response {
    /// A success response carrying `data`.
    pub fn success(data: impl Into<ResponseData>) -> Self {
        Self {
            status: Status::Success,
            message: None,
            data: Some(data.into()),
        }
    }

    /// An error response with a client-facing message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// The success payload, shaped by request kind.
///
/// Untagged on the wire: the variants are told apart by their required
/// fields. `Validate` is listed before `Register` because a valid
/// validation result carries a superset of the registration fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Login(LoginData),
    Validate(ValidateData),
    Register(RegisterData),
    Message(MessageData),
}

/// Returned by `login` and `refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    /// Unix timestamp (seconds) after which the token is no longer valid.
    pub expires_at: i64,
}

/// Returned by `register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterData {
    pub user_id: String,
    pub username: String,
    pub email: String,
}

/// Returned by `validate`. User fields are present only when `valid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateData {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ValidateData {
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// A bare acknowledgement, e.g. for `logout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub message: String,
}

impl From<LoginData> for ResponseData {
    fn from(data: LoginData) -> Self {
        ResponseData::Login(data)
    }
}

impl From<ValidateData> for ResponseData {
    fn from(data: ValidateData) -> Self {
        ResponseData::Validate(data)
    }
}

impl From<RegisterData> for ResponseData {
    fn from(data: RegisterData) -> Self {
        ResponseData::Register(data)
    }
}

impl From<MessageData> for ResponseData {
    fn from(data: MessageData) -> Self {
        ResponseData::Message(data)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_kind_parses_every_known_kind() {
        for kind in [
            RequestKind::Register,
            RequestKind::Login,
            RequestKind::Logout,
            RequestKind::Validate,
            RequestKind::Refresh,
        ] {
            assert_eq!(kind.as_str().parse::<RequestKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_request_kind_unknown_names_received_kind() {
        let err = "delete_account".parse::<RequestKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown request type: delete_account");
    }

    #[test]
    fn test_request_decodes_from_client_json() {
        let req: Request = serde_json::from_value(json!({
            "type": "register",
            "username": "alice",
            "email": "a@x.com",
            "password": "secret1"
        }))
        .unwrap();

        assert_eq!(req.kind().unwrap(), RequestKind::Register);
        assert_eq!(req.username(), Some("alice"));
        assert_eq!(req.email(), Some("a@x.com"));
        assert_eq!(req.password(), Some("secret1"));
        assert_eq!(req.token(), None);
    }

    #[test]
    fn test_request_missing_type_is_unknown_empty_kind() {
        let req: Request =
            serde_json::from_value(json!({ "token": "abc" })).unwrap();

        let err = req.kind().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(k) if k.is_empty()));
    }

    #[test]
    fn test_request_empty_fields_read_as_absent() {
        let req = Request::new(RequestKind::Login)
            .with_username("")
            .with_password("pw");

        assert_eq!(req.username(), None);
        assert_eq!(req.password(), Some("pw"));
    }

    #[test]
    fn test_request_builder_serializes_only_set_fields() {
        let req = Request::new(RequestKind::Validate).with_token("t0k");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({ "type": "validate", "token": "t0k" }));
    }

    #[test]
    fn test_error_response_json_format() {
        let value =
            serde_json::to_value(Response::error("token is required")).unwrap();
        assert_eq!(
            value,
            json!({ "status": "error", "message": "token is required" })
        );
    }

    #[test]
    fn test_login_response_json_format() {
        let resp = Response::success(LoginData {
            token: "t".into(),
            user_id: "u1".into(),
            username: "alice".into(),
            email: "a@x.com".into(),
            expires_at: 1_700_000_000,
        });
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "success",
                "data": {
                    "token": "t",
                    "user_id": "u1",
                    "username": "alice",
                    "email": "a@x.com",
                    "expires_at": 1_700_000_000
                }
            })
        );
    }

    #[test]
    fn test_invalid_validate_data_omits_user_fields() {
        let value = serde_json::to_value(ValidateData::invalid()).unwrap();
        assert_eq!(value, json!({ "valid": false }));
    }

    #[test]
    fn test_response_data_untagged_picks_matching_shape() {
        let valid: ResponseData = serde_json::from_value(json!({
            "valid": true,
            "user_id": "u1",
            "username": "alice",
            "email": "a@x.com"
        }))
        .unwrap();
        assert!(matches!(valid, ResponseData::Validate(v) if v.valid));

        let registered: ResponseData = serde_json::from_value(json!({
            "user_id": "u1",
            "username": "alice",
            "email": "a@x.com"
        }))
        .unwrap();
        assert!(matches!(registered, ResponseData::Register(_)));

        let ack: ResponseData = serde_json::from_value(json!({
            "message": "logged out successfully"
        }))
        .unwrap();
        assert!(matches!(ack, ResponseData::Message(_)));
    }
}
