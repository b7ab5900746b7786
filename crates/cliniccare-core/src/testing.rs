//! In-memory ClinicCare back end for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use crate::api::{paths, ApiError, ApiRequest, ApiResponse, Transport};
use crate::models::LoginRequest;

pub const EMAIL: &str = "doc@clinic.test";
pub const PASSWORD: &str = "b";
pub const REFRESH_VALUE: &str = "R1";

pub fn credentials() -> LoginRequest {
    LoginRequest::new(EMAIL, PASSWORD)
}

struct State {
    /// Token the data endpoints currently accept
    valid_token: Option<String>,
    /// Tokens handed out by successive refreshes
    next_tokens: Vec<String>,
    refresh_ok: bool,
    /// How many times the refresh endpoint yields before answering
    refresh_yields: usize,
    logout_fails: bool,
    /// Logout rejects a stale bearer token
    logout_checks_token: bool,
    me_fails: bool,
    offline: bool,
    /// Data endpoints reject every token
    reject_all: bool,
    /// 429 responses to hand out before serving normally
    throttle: usize,
    refresh_calls: usize,
    logout_calls: usize,
    bodies: HashMap<String, String>,
    log: Vec<ApiRequest>,
}

pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                valid_token: None,
                next_tokens: vec!["T2".to_string(), "T3".to_string(), "T4".to_string()],
                refresh_ok: true,
                refresh_yields: 0,
                logout_fails: false,
                logout_checks_token: false,
                me_fails: false,
                offline: false,
                reject_all: false,
                throttle: 0,
                refresh_calls: 0,
                logout_calls: 0,
                bodies: HashMap::new(),
                log: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake backend poisoned")
    }

    /// Invalidate the current access token, as if it expired server-side
    pub fn expire_token(&self) {
        self.lock().valid_token = Some("expired-on-server".to_string());
    }

    pub fn set_refresh_ok(&self, ok: bool) {
        self.lock().refresh_ok = ok;
    }

    pub fn set_refresh_yields(&self, yields: usize) {
        self.lock().refresh_yields = yields;
    }

    pub fn set_logout_fails(&self, fails: bool) {
        self.lock().logout_fails = fails;
    }

    pub fn set_logout_checks_token(&self, checks: bool) {
        self.lock().logout_checks_token = checks;
    }

    pub fn set_me_fails(&self, fails: bool) {
        self.lock().me_fails = fails;
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_reject_all(&self, reject: bool) {
        self.lock().reject_all = reject;
    }

    pub fn set_throttle(&self, count: usize) {
        self.lock().throttle = count;
    }

    pub fn set_body(&self, path: &str, body: &str) {
        self.lock().bodies.insert(path.to_string(), body.to_string());
    }

    pub fn refresh_calls(&self) -> usize {
        self.lock().refresh_calls
    }

    pub fn logout_calls(&self) -> usize {
        self.lock().logout_calls
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().log.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.lock()
            .log
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn unauthorized(detail: &str) -> ApiResponse {
        ApiResponse::new(StatusCode::UNAUTHORIZED, json!({ "detail": detail }).to_string())
    }

    fn login(state: &mut State, request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or_default();
        let email = body.get("email").and_then(|v| v.as_str());
        let password = body.get("password").and_then(|v| v.as_str());

        if email == Some(EMAIL) && password == Some(PASSWORD) {
            state.valid_token = Some("T1".to_string());
            ApiResponse::new(
                StatusCode::OK,
                json!({ "access_token": "T1", "token_type": "bearer", "expires_in": 1800 }).to_string(),
            )
            .with_cookie(format!("refresh_token={}; HttpOnly; Max-Age=604800; Path=/", REFRESH_VALUE))
        } else {
            Self::unauthorized("Incorrect email or password")
        }
    }

    fn refresh(state: &mut State, request: &ApiRequest) -> ApiResponse {
        let expected_cookie = format!("refresh_token={}", REFRESH_VALUE);
        if !state.refresh_ok || request.cookie.as_deref() != Some(expected_cookie.as_str()) {
            return Self::unauthorized("Refresh token missing");
        }

        let token = if state.next_tokens.is_empty() {
            "T-last".to_string()
        } else {
            state.next_tokens.remove(0)
        };
        state.valid_token = Some(token.clone());
        ApiResponse::new(
            StatusCode::OK,
            json!({ "access_token": token, "token_type": "bearer", "expires_in": 1800 }).to_string(),
        )
    }

    fn authorized(state: &State, request: &ApiRequest) -> bool {
        !state.reject_all
            && request.bearer.is_some()
            && request.bearer == state.valid_token
    }

    fn data(state: &mut State, request: &ApiRequest) -> ApiResponse {
        if state.throttle > 0 {
            state.throttle -= 1;
            return ApiResponse::new(StatusCode::TOO_MANY_REQUESTS, "");
        }
        if !Self::authorized(state, request) {
            return Self::unauthorized("Could not validate credentials");
        }

        if request.path == paths::CURRENT_USER {
            if state.me_fails {
                return ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom");
            }
            return ApiResponse::new(
                StatusCode::OK,
                json!({
                    "id": "6f1c1e52-7a0b-4f51-9d43-3c1b0a3f8e21",
                    "email": EMAIL,
                    "full_name": "Dana Scully",
                    "role": "doctor",
                    "is_active": true
                })
                .to_string(),
            );
        }

        let body = state
            .bodies
            .get(&request.path)
            .cloned()
            .unwrap_or_else(|| json!({ "data": [], "count": 0 }).to_string());
        ApiResponse::new(StatusCode::OK, body)
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let yields = {
            let mut state = self.lock();
            if state.offline {
                return Err(ApiError::InvalidResponse("connection refused".to_string()));
            }
            state.log.push(request.clone());
            if request.path == paths::REFRESH {
                state.refresh_calls += 1;
                state.refresh_yields
            } else {
                0
            }
        };

        // Keep the refresh outstanding so other requests pile up behind it
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }

        let mut state = self.lock();
        let response = match request.path.as_str() {
            paths::LOGIN => Self::login(&mut state, request),
            paths::REFRESH => Self::refresh(&mut state, request),
            paths::LOGOUT => {
                state.logout_calls += 1;
                if state.logout_fails {
                    ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "")
                } else if state.logout_checks_token
                    && request.bearer.is_some()
                    && request.bearer != state.valid_token
                {
                    Self::unauthorized("Could not validate credentials")
                } else {
                    ApiResponse::new(StatusCode::OK, json!({ "detail": "Successfully logged out" }).to_string())
                }
            }
            _ => Self::data(&mut state, request),
        };
        Ok(response)
    }
}
