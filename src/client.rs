//! Blocking HTTP client for the ConnectedDrive `webapi/v1` vehicle endpoints.
//!
//! - Blocking client using `ureq` (no async).
//! - Responses are handed out as raw JSON text; callers cache the text for the
//!   troubleshoot fingerprint and decode it with [`parse_json`].
//!
//! Authentication
//! - Legacy OAuth password grant against `https://{server}/gcdm/oauth/token`.
//! - The bearer token is renewed 30 s before it expires, and once more when a
//!   request comes back with 401.

use std::cell::RefCell;
use std::fmt;
use std::time::{Duration, Instant};

use http::StatusCode;
use log::{debug, info};
use serde::de::DeserializeOwned;

use crate::config::Config;

const OAUTH_SCOPE: &str = "authenticate_user vehicle_data remote_services";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ClientError {
    MissingAuth,
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
    Auth(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::MissingAuth => write!(f, "missing bearer token for authenticated endpoint"),
            ClientError::Transport(s) => write!(f, "transport error: {}", s),
            ClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            ClientError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
            ClientError::Auth(e) => write!(f, "auth error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ureq::Error> for ClientError {
    fn from(value: ureq::Error) -> Self {
        ClientError::Transport(value.to_string())
    }
}

/// Decode a response body, reporting the JSON path of the first mismatch.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(ClientError::Json)
}

/// Per-vehicle resources polled by the service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Status,
    ChargeProfile,
    LastTrip,
    AllTrips,
    Destinations,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Status => "status",
            Endpoint::ChargeProfile => "chargingprofile",
            Endpoint::LastTrip => "statistics/lastTrip",
            Endpoint::AllTrips => "statistics/allTrips",
            Endpoint::Destinations => "destinations",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// What the poll loop needs from the vendor API.
pub trait VehicleApi {
    fn fetch(&self, endpoint: Endpoint) -> Result<String, ClientError>;
    fn send_charge_profile(&self, payload: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
struct OAuthToken {
    access_token: String,
    expires_at: Instant,
}

impl OAuthToken {
    fn is_stale(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN >= self.expires_at
    }
}

#[derive(Debug)]
struct OAuthState {
    token: Option<OAuthToken>,
    username: String,
    password: String,
    client_auth: String,
}

pub struct ConnectedDriveClient {
    agent: ureq::Agent,
    server: &'static str,
    vin: String,
    oauth: RefCell<OAuthState>,
}

impl ConnectedDriveClient {
    pub fn new(cfg: &Config) -> Result<Self, ClientError> {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(cfg.request_timeout))
            .build();
        let agent = ureq::Agent::new_with_config(agent_config);

        let mut state = OAuthState {
            token: None,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            client_auth: cfg.client_auth.clone(),
        };

        // Fetch initial token
        let server = cfg.region.server();
        let token = Self::oauth_password_grant(&agent, server, &state)?;
        state.token = Some(token);

        Ok(ConnectedDriveClient {
            agent,
            server,
            vin: cfg.vin.clone(),
            oauth: RefCell::new(state),
        })
    }

    fn vehicle_url(server: &str, vin: &str, endpoint: Endpoint) -> String {
        format!("https://{}/webapi/v1/user/vehicles/{}/{}", server, vin, endpoint.path())
    }

    fn oauth_password_grant(agent: &ureq::Agent, server: &str, state: &OAuthState) -> Result<OAuthToken, ClientError> {
        #[derive(serde::Deserialize)]
        struct R {
            access_token: String,
            expires_in: u64,
        }

        let url = format!("https://{}/gcdm/oauth/token", server);
        let mut resp = agent
            .post(&url)
            .header("Accept", "application/json")
            .header("Authorization", &format!("Basic {}", state.client_auth))
            .send_form([
                ("grant_type", "password"),
                ("scope", OAUTH_SCOPE),
                ("username", state.username.as_str()),
                ("password", state.password.as_str()),
            ])?;

        let status = resp.status();
        let body = resp.body_mut().read_to_string()?;
        if !status.is_success() {
            return Err(ClientError::Auth(format!("http {}: {}", status.as_u16(), body)));
        }
        let R { access_token, expires_in } = parse_json(&body)?;
        info!("Obtained ConnectedDrive token valid for {}s", expires_in);
        Ok(OAuthToken {
            access_token,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        })
    }

    fn get_bearer(&self, force: bool) -> Result<String, ClientError> {
        let mut s = self.oauth.borrow_mut();
        let needs_refresh = force
            || match &s.token {
                None => true,
                Some(t) => t.is_stale(Instant::now()),
            };
        if needs_refresh {
            debug!("Renewing ConnectedDrive token (forced={})", force);
            let new_tok = Self::oauth_password_grant(&self.agent, self.server, &s)?;
            s.token = Some(new_tok);
        }
        s.token
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(ClientError::MissingAuth)
    }

    /// One authenticated round trip; `Ok` carries any status so the caller can retry on 401.
    fn execute(&self, endpoint: Endpoint, payload: Option<&str>, force_token: bool) -> Result<(StatusCode, String), ClientError> {
        let url = Self::vehicle_url(self.server, &self.vin, endpoint);
        let bearer = format!("Bearer {}", self.get_bearer(force_token)?);
        let mut resp = match payload {
            None => self
                .agent
                .get(&url)
                .header("Accept", "application/json")
                .header("Authorization", &bearer)
                .call()?,
            Some(body) => self
                .agent
                .post(&url)
                .header("Accept", "application/json")
                .header("Content-Type", "application/json")
                .header("Authorization", &bearer)
                .send(body)?,
        };
        let status = resp.status();
        let body = resp.body_mut().read_to_string()?;
        Ok((status, body))
    }

    fn request(&self, endpoint: Endpoint, payload: Option<&str>) -> Result<String, ClientError> {
        let (mut status, mut body) = self.execute(endpoint, payload, false)?;
        if status == StatusCode::UNAUTHORIZED {
            debug!("{} answered 401; retrying with a fresh token", endpoint);
            (status, body) = self.execute(endpoint, payload, true)?;
        }
        if status.is_success() {
            Ok(body)
        } else {
            Err(ClientError::Http {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

impl VehicleApi for ConnectedDriveClient {
    fn fetch(&self, endpoint: Endpoint) -> Result<String, ClientError> {
        self.request(endpoint, None)
    }

    fn send_charge_profile(&self, payload: &str) -> Result<(), ClientError> {
        self.request(Endpoint::ChargeProfile, Some(payload)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_vehicle_urls() {
        assert_eq!(
            ConnectedDriveClient::vehicle_url("b2vapi.bmwgroup.com", "WBY1Z21000V000000", Endpoint::LastTrip),
            "https://b2vapi.bmwgroup.com/webapi/v1/user/vehicles/WBY1Z21000V000000/statistics/lastTrip"
        );
        assert_eq!(Endpoint::ChargeProfile.to_string(), "chargingprofile");
    }

    #[test]
    fn token_is_renewed_inside_margin() {
        let now = Instant::now();
        let fresh = OAuthToken {
            access_token: "a".into(),
            expires_at: now + Duration::from_secs(3600),
        };
        let expiring = OAuthToken {
            access_token: "b".into(),
            expires_at: now + Duration::from_secs(10),
        };
        assert!(!fresh.is_stale(now));
        assert!(expiring.is_stale(now));
    }

    #[test]
    fn json_errors_carry_the_path() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Token {
            expires_in: u64,
        }
        let err = parse_json::<Token>(r#"{"expires_in": "soon"}"#).expect_err("wrong type");
        assert!(err.to_string().starts_with("json error at expires_in:"), "{err}");
        assert_eq!(ClientError::Http { status: 404, message: String::new() }.status(), Some(404));
        assert_eq!(ClientError::MissingAuth.status(), None);
    }
}
