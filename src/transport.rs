//! Transport seam between the client and the modem
//!
//! [`Transport`] posts one signed HNAP request and returns the raw HTTP reply.
//! Status interpretation (404 as session expiry, other non-200s as protocol
//! errors) happens in the client, so any transport behaves the same way.

use crate::error::SurveyError;
use crate::hnap::SignedHeaders;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::future::Future;
use std::time::Duration;

/// Default modem endpoint
pub const DEFAULT_ENDPOINT: &str = "https://192.168.100.1/HNAP1/";

/// One HNAP call ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HnapRequest {
    /// Human-readable step name used in errors and logs
    pub step: &'static str,
    pub headers: SignedHeaders,
    /// JSON body
    pub body: String,
}

/// Raw HTTP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends HNAP requests to the modem
pub trait Transport {
    fn post(&self, request: HnapRequest) -> impl Future<Output = Result<HttpReply, SurveyError>> + Send;
}

/// HTTPS transport backed by reqwest.
///
/// The modem serves a self-signed certificate, so certificate validation is
/// turned off.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, SurveyError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(request_timeout)
            .build()
            .map_err(|e| SurveyError::transport("client setup", e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn post(&self, request: HnapRequest) -> Result<HttpReply, SurveyError> {
        let step = request.step;
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(request.body);

        for (name, value) in request.headers.to_pairs() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SurveyError::Timeout(step)
            } else {
                SurveyError::transport(step, format!("error performing request: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SurveyError::transport(step, format!("error reading response body: {e}")))?;

        Ok(HttpReply { status, body })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory transport for client and pipeline tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub(crate) enum Scripted {
        Reply(HttpReply),
        Fail(&'static str),
        /// Never answers; lets deadline handling be tested
        Stall,
    }

    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<HnapRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn requests(&self) -> Vec<HnapRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn steps(&self) -> Vec<&'static str> {
            self.requests().iter().map(|r| r.step).collect()
        }

        pub(crate) fn remaining(&self) -> usize {
            self.script.lock().unwrap().len()
        }
    }

    impl Transport for ScriptedTransport {
        fn post(&self, request: HnapRequest) -> impl Future<Output = Result<HttpReply, SurveyError>> + Send {
            let step = request.step;
            self.requests.lock().unwrap().push(request);
            let next = self.script.lock().unwrap().pop_front();

            async move {
                match next {
                    Some(Scripted::Reply(reply)) => Ok(reply),
                    Some(Scripted::Fail(message)) => Err(SurveyError::transport(step, message)),
                    Some(Scripted::Stall) => std::future::pending().await,
                    None => Err(SurveyError::transport(step, "script exhausted")),
                }
            }
        }
    }

    pub(crate) fn ok(body: &str) -> Scripted {
        Scripted::Reply(HttpReply::new(200, body))
    }

    pub(crate) fn status(code: u16) -> Scripted {
        Scripted::Reply(HttpReply::new(code, ""))
    }

    pub(crate) fn challenge_reply() -> Scripted {
        ok(r#"{"LoginResponse":{"Challenge":"message","Cookie":"uid","PublicKey":"public key","LoginResult":"OK"}}"#)
    }

    pub(crate) fn login_ok() -> Scripted {
        ok(r#"{"LoginResponse":{"LoginResult":"OK"}}"#)
    }

    pub(crate) fn telemetry_reply(channels: &str) -> Scripted {
        let body = serde_json::json!({
            "GetMultipleHNAPsResponse": {
                "GetCustomerStatusDownstreamChannelInfoResponse": {
                    "CustomerConnDownstreamChannel": channels,
                    "GetCustomerStatusDownstreamChannelInfoResult": "OK"
                },
                "GetMultipleHNAPsResult": "OK"
            }
        });
        ok(&body.to_string())
    }
}
