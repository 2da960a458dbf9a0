//! HNAP authentication session
//!
//! The handshake is two calls: a `Login` request with an empty password
//! returns a challenge, and a second `Login` call answers it with a token
//! derived from the account password. The derived private key then signs
//! every later request.
//!
//! The control flow for one fetch lives in [`step`], a pure transition
//! function over [`FetchCycle`]. The client performs the I/O each
//! [`SessionAction`] asks for and feeds the outcome back as a [`SessionEvent`].

use crate::error::SurveyError;
use crate::hash::calculate_keyed_hash;
use crate::hnap::LoginResponse;

/// How many times one fetch may rebuild a session the modem rejected
pub const MAX_SESSION_RENEWALS: u8 = 1;

/// Account the collector logs in with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Challenge issued by the modem for one handshake attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub public_key: String,
    pub session_id: String,
    pub message: String,
}

impl TryFrom<LoginResponse> for Challenge {
    type Error = SurveyError;

    fn try_from(response: LoginResponse) -> Result<Self, Self::Error> {
        let body = response.login;
        let missing: Vec<&str> = [
            ("PublicKey", &body.public_key),
            ("Cookie", &body.cookie),
            ("Challenge", &body.challenge),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(SurveyError::Decode(format!(
                "challenge response missing {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            public_key: body.public_key,
            session_id: body.cookie,
            message: body.challenge,
        })
    }
}

/// Secrets for one authenticated session.
///
/// Only built by [`Credentials::derive`] from a complete challenge, so the
/// session id and private key are always both present.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub session_id: String,
    pub private_key: String,
    pub username: String,
    /// Token submitted as `LoginPassword` when confirming the challenge
    pub login_token: String,
}

impl Credentials {
    /// Derive the private key and login token for a challenge
    pub fn derive(challenge: &Challenge, account: &Account) -> Self {
        let challenge_key = format!("{}{}", challenge.public_key, account.password);
        let private_key = calculate_keyed_hash(&challenge.message, &challenge_key);
        let login_token = calculate_keyed_hash(&challenge.message, &private_key);

        Self {
            session_id: challenge.session_id.clone(),
            private_key,
            username: account.username.clone(),
            login_token,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("session_id", &self.session_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Where the session is in the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    /// Challenge answered locally; confirmation not yet accepted
    Challenged(Credentials),
    Authenticated(Credentials),
}

impl SessionState {
    /// Credentials to sign the next request with, pending ones included
    pub fn signing_credentials(&self) -> Option<&Credentials> {
        match self {
            SessionState::Unauthenticated => None,
            SessionState::Challenged(creds) | SessionState::Authenticated(creds) => Some(creds),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Outcome of the previous action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    ChallengeIssued(Challenge),
    LoginAccepted,
    TelemetryReceived,
    /// Modem answered 404: the session is no longer valid
    SessionInvalid,
    /// Any other failure of the previous action
    Failed,
}

/// What the client should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    RequestChallenge,
    SubmitLogin,
    FetchTelemetry,
    Finish,
    Abort,
}

/// Session state plus the renewal budget of the fetch in progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchCycle {
    pub session: SessionState,
    pub renewals: u8,
}

impl FetchCycle {
    /// Begin a fetch from an existing session
    pub fn resume(session: SessionState) -> Self {
        Self {
            session,
            renewals: 0,
        }
    }
}

/// Advance a fetch cycle by one event.
pub fn step(cycle: FetchCycle, event: SessionEvent, account: &Account) -> (FetchCycle, SessionAction) {
    let FetchCycle { session, renewals } = cycle;
    let with = |session: SessionState, action: SessionAction| (FetchCycle { session, renewals }, action);

    match (session, event) {
        (SessionState::Authenticated(creds), SessionEvent::Start) => {
            with(SessionState::Authenticated(creds), SessionAction::FetchTelemetry)
        }
        (_, SessionEvent::Start) => with(SessionState::Unauthenticated, SessionAction::RequestChallenge),

        (SessionState::Unauthenticated, SessionEvent::ChallengeIssued(challenge)) => {
            let creds = Credentials::derive(&challenge, account);
            with(SessionState::Challenged(creds), SessionAction::SubmitLogin)
        }

        (SessionState::Challenged(creds), SessionEvent::LoginAccepted) => {
            with(SessionState::Authenticated(creds), SessionAction::FetchTelemetry)
        }

        (SessionState::Authenticated(creds), SessionEvent::TelemetryReceived) => {
            with(SessionState::Authenticated(creds), SessionAction::Finish)
        }

        (_, SessionEvent::SessionInvalid) if renewals < MAX_SESSION_RENEWALS => (
            FetchCycle {
                session: SessionState::Unauthenticated,
                renewals: renewals + 1,
            },
            SessionAction::RequestChallenge,
        ),
        (_, SessionEvent::SessionInvalid) => with(SessionState::Unauthenticated, SessionAction::Abort),

        // A failed fetch says nothing about the session; keep it for next time.
        (SessionState::Authenticated(creds), SessionEvent::Failed) => {
            with(SessionState::Authenticated(creds), SessionAction::Abort)
        }
        (_, SessionEvent::Failed) => with(SessionState::Unauthenticated, SessionAction::Abort),

        (session, event) => {
            log::error!("unexpected {event:?} while {}", state_name(&session));
            with(SessionState::Unauthenticated, SessionAction::Abort)
        }
    }
}

fn state_name(session: &SessionState) -> &'static str {
    match session {
        SessionState::Unauthenticated => "unauthenticated",
        SessionState::Challenged(_) => "challenged",
        SessionState::Authenticated(_) => "authenticated",
    }
}

/// Session owned by one client. Survives across fetches, not restarts.
#[derive(Debug, Clone)]
pub struct AuthSession {
    account: Account,
    state: SessionState,
}

impl AuthSession {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        match &self.state {
            SessionState::Authenticated(creds) => Some(creds),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Start a fetch cycle, leaving the session unauthenticated until it is
    /// handed back with [`AuthSession::finish_cycle`].
    pub(crate) fn begin_cycle(&mut self) -> FetchCycle {
        FetchCycle::resume(std::mem::take(&mut self.state))
    }

    pub(crate) fn finish_cycle(&mut self, cycle: FetchCycle) {
        self.state = match cycle.session {
            // Half-finished handshakes never outlive the cycle.
            SessionState::Challenged(_) => SessionState::Unauthenticated,
            other => other,
        };
    }
}
