//! Telemetry client
//!
//! Drives the session state machine over a [`Transport`]: logs in when there
//! is no session, fetches downstream channel info, and rebuilds the session
//! once if the modem reports it as expired.

use crate::error::SurveyError;
use crate::hnap::{
    sign_request, DownstreamEnvelope, GetMultipleHnapsRequest, LoginRequest, LoginResponse,
    GET_MULTIPLE_HNAPS_ACTION, LOGIN_ACTION, RESULT_OK,
};
use crate::parser::TelemetryParser;
use crate::session::{step, Account, AuthSession, Challenge, SessionAction, SessionEvent, SessionState};
use crate::transport::{HnapRequest, Transport};
use crate::types::SignalSnapshot;
use chrono::Utc;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};

const STEP_CHALLENGE: &str = "challenge request";
const STEP_LOGIN: &str = "login confirmation";
const STEP_TELEMETRY: &str = "telemetry fetch";

/// Client for one modem. Holds the session between fetches.
///
/// Fetching takes `&mut self`: one fetch per client at a time.
pub struct TelemetryClient<T> {
    transport: T,
    session: AuthSession,
    parser: TelemetryParser,
}

impl<T: Transport> TelemetryClient<T> {
    pub fn new(transport: T, account: Account) -> Self {
        Self {
            transport,
            session: AuthSession::new(account),
            parser: TelemetryParser::default(),
        }
    }

    pub fn with_parser(mut self, parser: TelemetryParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch and parse downstream channel telemetry.
    ///
    /// Every network call must complete before `deadline`.
    pub async fn get_signal_data(&mut self, deadline: Instant) -> Result<SignalSnapshot, SurveyError> {
        let channels = self.fetch_channels(deadline).await?;
        self.parser.parse(&channels)
    }

    async fn fetch_channels(&mut self, deadline: Instant) -> Result<String, SurveyError> {
        let (mut cycle, mut action) = step(self.session.begin_cycle(), SessionEvent::Start, self.session.account());
        let mut channels = None;
        let mut failure = None;

        loop {
            let outcome = match action {
                SessionAction::Finish | SessionAction::Abort => break,
                SessionAction::RequestChallenge => {
                    log::info!("no session, logging in");
                    self.request_challenge(&cycle.session, deadline)
                        .await
                        .map(SessionEvent::ChallengeIssued)
                }
                SessionAction::SubmitLogin => self
                    .submit_login(&cycle.session, deadline)
                    .await
                    .map(|()| SessionEvent::LoginAccepted),
                SessionAction::FetchTelemetry => self
                    .request_channels(&cycle.session, deadline)
                    .await
                    .map(|blob| {
                        channels = Some(blob);
                        SessionEvent::TelemetryReceived
                    }),
            };

            let event = match outcome {
                Ok(event) => event,
                Err(err) => {
                    let event = if err.is_session_expired() {
                        log::warn!("modem rejected the session");
                        SessionEvent::SessionInvalid
                    } else {
                        SessionEvent::Failed
                    };
                    failure = Some(err);
                    event
                }
            };

            (cycle, action) = step(cycle, event, self.session.account());
        }

        self.session.finish_cycle(cycle);

        match (action, channels) {
            (SessionAction::Finish, Some(channels)) => Ok(channels),
            _ => Err(failure.unwrap_or(SurveyError::SessionExpired)),
        }
    }

    async fn request_challenge(&self, session: &SessionState, deadline: Instant) -> Result<Challenge, SurveyError> {
        let username = &self.session.account().username;
        let body = self
            .exchange(STEP_CHALLENGE, LOGIN_ACTION, &LoginRequest::challenge(username), session, deadline)
            .await?;

        let response: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| SurveyError::Decode(format!("{STEP_CHALLENGE}: {e}: {body:?}")))?;
        Challenge::try_from(response)
    }

    async fn submit_login(&self, session: &SessionState, deadline: Instant) -> Result<(), SurveyError> {
        let creds = session
            .signing_credentials()
            .ok_or_else(|| SurveyError::protocol(STEP_LOGIN, "no pending credentials"))?;

        let request = LoginRequest::confirm(&creds.username, &creds.login_token);
        let body = self
            .exchange(STEP_LOGIN, LOGIN_ACTION, &request, session, deadline)
            .await?;

        let response: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| SurveyError::Decode(format!("{STEP_LOGIN}: {e}: {body:?}")))?;

        match response.login.login_result.as_deref() {
            Some(RESULT_OK) => {
                log::info!("logged in as {}", creds.username);
                Ok(())
            }
            other => Err(SurveyError::protocol(
                STEP_LOGIN,
                format!("login rejected, result={other:?}"),
            )),
        }
    }

    async fn request_channels(&self, session: &SessionState, deadline: Instant) -> Result<String, SurveyError> {
        let body = self
            .exchange(
                STEP_TELEMETRY,
                GET_MULTIPLE_HNAPS_ACTION,
                &GetMultipleHnapsRequest::default(),
                session,
                deadline,
            )
            .await?;

        let envelope: DownstreamEnvelope = serde_json::from_str(&body)
            .map_err(|e| SurveyError::Decode(format!("{STEP_TELEMETRY}: {e}: {body:?}")))?;
        envelope.into_channels()
    }

    /// Sign and send one request, returning the body of a 200 reply.
    async fn exchange<B: Serialize>(
        &self,
        step: &'static str,
        action: &str,
        body: &B,
        session: &SessionState,
        deadline: Instant,
    ) -> Result<String, SurveyError> {
        let request = HnapRequest {
            step,
            headers: sign_request(action, session.signing_credentials(), Utc::now()),
            body: serde_json::to_string(body)?,
        };

        log::debug!("sending {step}");
        let reply = timeout_at(deadline, self.transport.post(request))
            .await
            .map_err(|_| SurveyError::Timeout(step))??;

        match reply.status {
            200 => Ok(reply.body),
            404 => Err(SurveyError::SessionExpired),
            status => Err(SurveyError::protocol(
                step,
                format!("received http error status={status}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const CHANNELS: &str = "1^Locked^QAM256^3^723000000^7^29^53513438^417213^|+|2^Locked^QAM256^1^651000000^7^31^2895843^340003^|+|3^Locked^QAM256^2^657000000^8^31^3946112^232351^";

    fn client(script: Vec<Scripted>) -> TelemetryClient<ScriptedTransport> {
        TelemetryClient::new(ScriptedTransport::new(script), Account::new("admin", "passw0rd!"))
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_logs_in_then_fetches() {
        let mut client = client(vec![challenge_reply(), login_ok(), telemetry_reply(CHANNELS)]);

        let snapshot = client.get_signal_data(deadline()).await.unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.get(3).map(|r| r.frequency), Some(723_000_000));
        assert!(client.session().is_authenticated());
        assert_eq!(
            client.transport().steps(),
            vec![STEP_CHALLENGE, STEP_LOGIN, STEP_TELEMETRY]
        );
    }

    #[tokio::test]
    async fn test_handshake_requests_are_signed() {
        let mut client = client(vec![challenge_reply(), login_ok(), telemetry_reply(CHANNELS)]);
        client.get_signal_data(deadline()).await.unwrap();

        let requests = client.transport().requests();
        assert_eq!(requests[0].headers.cookie, None);
        assert_eq!(requests[0].headers.soap_action, LOGIN_ACTION);
        assert!(requests[0].body.contains(r#""Action":"request""#));
        assert!(requests[0].body.contains(r#""LoginPassword":"""#));

        let creds = client.session().credentials().unwrap();
        let pk = &creds.private_key;
        let expected_cookie = format!("Secure; Secure; uid=uid; PrivateKey={pk}");
        assert_eq!(requests[1].headers.cookie.as_deref(), Some(expected_cookie.as_str()));
        assert!(requests[1].body.contains(&format!(r#""LoginPassword":"{}""#, creds.login_token)));
        assert_eq!(requests[2].headers.soap_action, GET_MULTIPLE_HNAPS_ACTION);
        assert_eq!(requests[2].headers.cookie.as_deref(), Some(expected_cookie.as_str()));

        // Re-sign at the timestamp carried in each header.
        let signed_at = |auth: &str| {
            let ts: i64 = auth.split_once(' ').unwrap().1.parse().unwrap();
            Utc.timestamp_opt(ts, 0).unwrap()
        };

        let challenge_auth = &requests[0].headers.hnap_auth;
        let at = signed_at(challenge_auth);
        assert_eq!(challenge_auth, &sign_request(LOGIN_ACTION, None, at).hnap_auth);

        let confirm_auth = &requests[1].headers.hnap_auth;
        let at = signed_at(confirm_auth);
        assert_eq!(confirm_auth, &sign_request(LOGIN_ACTION, Some(creds), at).hnap_auth);
        assert_ne!(confirm_auth, &sign_request(LOGIN_ACTION, None, at).hnap_auth);

        let fetch_auth = &requests[2].headers.hnap_auth;
        let at = signed_at(fetch_auth);
        assert_eq!(
            fetch_auth,
            &sign_request(GET_MULTIPLE_HNAPS_ACTION, Some(creds), at).hnap_auth
        );
    }

    #[tokio::test]
    async fn test_reuses_session() {
        let mut client = client(vec![
            challenge_reply(),
            login_ok(),
            telemetry_reply(CHANNELS),
            telemetry_reply(CHANNELS),
        ]);

        client.get_signal_data(deadline()).await.unwrap();
        client.get_signal_data(deadline()).await.unwrap();

        assert_eq!(client.transport().requests().len(), 4);
        assert_eq!(client.transport().steps()[3], STEP_TELEMETRY);
    }

    #[tokio::test]
    async fn test_expired_session_renewed_once() {
        let mut client = client(vec![
            challenge_reply(),
            login_ok(),
            telemetry_reply(CHANNELS),
            status(404),
            challenge_reply(),
            login_ok(),
            telemetry_reply(CHANNELS),
        ]);

        client.get_signal_data(deadline()).await.unwrap();
        let snapshot = client.get_signal_data(deadline()).await.unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            client.transport().steps()[3..].to_vec(),
            vec![STEP_TELEMETRY, STEP_CHALLENGE, STEP_LOGIN, STEP_TELEMETRY]
        );
        assert!(client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_second_expiry_is_terminal() {
        let mut client = client(vec![
            challenge_reply(),
            login_ok(),
            telemetry_reply(CHANNELS),
            status(404),
            challenge_reply(),
            login_ok(),
            status(404),
            telemetry_reply(CHANNELS),
        ]);

        client.get_signal_data(deadline()).await.unwrap();
        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(err.is_session_expired());
        assert_eq!(client.transport().remaining(), 1);
        assert!(!client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_expiry_during_handshake_counts() {
        let mut client = client(vec![status(404), status(404), challenge_reply()]);

        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(err.is_session_expired());
        assert_eq!(client.transport().steps(), vec![STEP_CHALLENGE, STEP_CHALLENGE]);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_credentials() {
        let mut client = client(vec![
            challenge_reply(),
            login_ok(),
            telemetry_reply(CHANNELS),
            Scripted::Fail("connection reset"),
        ]);

        client.get_signal_data(deadline()).await.unwrap();
        let before = client.session().credentials().cloned();
        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(matches!(err, SurveyError::Transport { .. }));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(client.session().credentials().cloned(), before);
        assert_eq!(client.transport().requests().len(), 4);
    }

    #[tokio::test]
    async fn test_unexpected_status_is_protocol_error() {
        let mut client = client(vec![status(500)]);

        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(matches!(err, SurveyError::Protocol { step: STEP_CHALLENGE, .. }));
        assert!(err.to_string().contains("status=500"));
        assert!(!client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_rejected_login_leaves_unauthenticated() {
        let mut client = client(vec![
            challenge_reply(),
            ok(r#"{"LoginResponse":{"LoginResult":"FAILED"}}"#),
        ]);

        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(err.to_string().contains("FAILED"));
        assert_eq!(client.session().state(), &SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_malformed_challenge_is_decode_error() {
        let mut client = client(vec![ok("<html>not json</html>")]);

        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(matches!(err, SurveyError::Decode(_)));
        assert!(err.to_string().contains(STEP_CHALLENGE));
    }

    #[tokio::test]
    async fn test_non_ok_result_reported() {
        let mut client = client(vec![
            challenge_reply(),
            login_ok(),
            ok(r#"{"GetCustomerStatusDownstreamChannelInfoResponse":{"GetCustomerStatusDownstreamChannelInfoResult":"ERROR","CustomerConnDownstreamChannel":""}}"#),
        ]);

        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(matches!(err, SurveyError::Protocol { step: STEP_TELEMETRY, .. }));
        assert!(client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_bad_blob_is_decode_error() {
        let mut client = client(vec![challenge_reply(), login_ok(), telemetry_reply("1^Locked")]);

        let err = client.get_signal_data(deadline()).await.unwrap_err();

        assert!(matches!(err, SurveyError::Decode(_)));
        assert!(client.session().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transport_times_out() {
        let mut client = client(vec![Scripted::Stall]);

        let err = client
            .get_signal_data(Instant::now() + Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, SurveyError::Timeout(STEP_CHALLENGE)));
        assert!(!client.session().is_authenticated());
    }
}
