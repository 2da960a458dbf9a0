//! HNAP wire format
//!
//! Typed request and response envelopes for the three calls the collector
//! makes (challenge, login confirmation and downstream channel info), plus the
//! per-request signing headers.

use crate::error::SurveyError;
use crate::hash::calculate_keyed_hash;
use crate::session::Credentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SOAP action for both handshake steps
pub const LOGIN_ACTION: &str = r#""http://purenetworks.com/HNAP1/Login""#;

/// SOAP action for batched status queries
pub const GET_MULTIPLE_HNAPS_ACTION: &str = r#""http://purenetworks.com/HNAP1/GetMultipleHNAPs""#;

/// Signing key used before a private key has been derived
pub const ANONYMOUS_KEY: &str = "withoutloginkey";

/// Result value the modem uses for success
pub const RESULT_OK: &str = "OK";

/// Signing timestamps are kept under this many seconds. Wraps far in the future.
const TIMESTAMP_MODULUS: i64 = 2_000_000_000_000;

/// Body of a `Login` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    #[serde(rename = "Login")]
    pub login: LoginRequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequestBody {
    pub action: String,
    pub username: String,
    pub login_password: String,
    pub captcha: String,
    pub private_login: String,
}

impl LoginRequest {
    pub fn new(action: &str, username: &str, password: &str) -> Self {
        Self {
            login: LoginRequestBody {
                action: action.to_string(),
                username: username.to_string(),
                login_password: password.to_string(),
                captcha: String::new(),
                private_login: "LoginPassword".to_string(),
            },
        }
    }

    /// First handshake step: ask for a challenge with an empty password
    pub fn challenge(username: &str) -> Self {
        Self::new("request", username, "")
    }

    /// Second handshake step: answer the challenge with the login token
    pub fn confirm(username: &str, login_token: &str) -> Self {
        Self::new("login", username, login_token)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "LoginResponse")]
    pub login: LoginResponseBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResponseBody {
    #[serde(default)]
    pub challenge: String,
    /// Session id handed back as the `uid` cookie
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub login_result: Option<String>,
}

/// Body of a `GetMultipleHNAPs` call asking for downstream channel info
#[derive(Debug, Clone, Default, Serialize)]
pub struct GetMultipleHnapsRequest {
    #[serde(rename = "GetMultipleHNAPs")]
    pub body: GetMultipleHnapsBody,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetMultipleHnapsBody {
    #[serde(rename = "GetCustomerStatusDownstreamChannelInfo")]
    pub downstream_channel_info: String,
}

/// Downstream channel info as returned by the modem
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownstreamChannelInfo {
    #[serde(rename = "GetCustomerStatusDownstreamChannelInfoResult", default)]
    pub result: String,
    #[serde(rename = "CustomerConnDownstreamChannel", default)]
    pub channels: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetMultipleHnapsResponseBody {
    #[serde(rename = "GetMultipleHNAPsResult", default)]
    pub result: Option<String>,
    #[serde(rename = "GetCustomerStatusDownstreamChannelInfoResponse")]
    pub downstream: Option<DownstreamChannelInfo>,
}

/// Telemetry envelope. Firmware either wraps the channel info in a
/// `GetMultipleHNAPsResponse` or returns it at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamEnvelope {
    #[serde(rename = "GetMultipleHNAPsResponse")]
    pub multiple: Option<GetMultipleHnapsResponseBody>,
    #[serde(rename = "GetCustomerStatusDownstreamChannelInfoResponse")]
    pub downstream: Option<DownstreamChannelInfo>,
}

impl DownstreamEnvelope {
    /// Validate result codes and return the raw channel blob
    pub fn into_channels(self) -> Result<String, SurveyError> {
        let info = match (self.multiple, self.downstream) {
            (Some(multiple), _) => {
                if let Some(result) = multiple.result.as_deref() {
                    if result != RESULT_OK {
                        return Err(SurveyError::protocol(
                            "telemetry fetch",
                            format!("error in batched response, result={result:?}"),
                        ));
                    }
                }
                multiple.downstream
            }
            (None, downstream) => downstream,
        };

        let info = info.ok_or_else(|| {
            SurveyError::Decode("response has no downstream channel info".to_string())
        })?;

        if info.result != RESULT_OK {
            return Err(SurveyError::protocol(
                "telemetry fetch",
                format!("error in downstream info, result={:?}", info.result),
            ));
        }

        Ok(info.channels)
    }
}

/// Headers attached to every HNAP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub soap_action: String,
    pub hnap_auth: String,
    pub cookie: Option<String>,
}

impl SignedHeaders {
    /// Header name/value pairs in wire form
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("SOAPACTION", self.soap_action.clone()),
            ("HNAP_AUTH", self.hnap_auth.clone()),
        ];
        if let Some(cookie) = &self.cookie {
            pairs.push(("Cookie", cookie.clone()));
        }
        pairs
    }
}

/// Sign `action` at `now` with the given credentials, or anonymously.
pub fn sign_request(action: &str, credentials: Option<&Credentials>, now: DateTime<Utc>) -> SignedHeaders {
    let key = credentials
        .map(|c| c.private_key.as_str())
        .unwrap_or(ANONYMOUS_KEY);

    let timestamp = now.timestamp() % TIMESTAMP_MODULUS;
    let digest = calculate_keyed_hash(&format!("{timestamp}{action}"), key);

    SignedHeaders {
        soap_action: action.to_string(),
        hnap_auth: format!("{digest} {timestamp}"),
        cookie: credentials.map(|c| {
            format!(
                "Secure; Secure; uid={}; PrivateKey={}",
                c.session_id, c.private_key
            )
        }),
    }
}
