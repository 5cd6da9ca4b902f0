use crate::credentials::CredentialStore;
use crate::error::ApiError;
use reqwest::Method;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::watch;

pub const LOGIN_ENDPOINT: &str = "/login";
pub const REFRESH_ENDPOINT: &str = "/refresh";
pub const LOGOUT_ENDPOINT: &str = "/logout";

/// Whether a usable credential is believed to exist. The view layer watches
/// this to route to the login screen when a refresh fails for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    LoggedOut,
}

/// Successful response body, decoded according to the Content-Type header.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        match self {
            ResponseBody::Json(value) => {
                serde_json::from_value(value).map_err(|err| ApiError::Decode(err.to_string()))
            }
            ResponseBody::Text(text) => Err(ApiError::Decode(format!(
                "expected JSON response, got text ({} bytes)",
                text.len()
            ))),
        }
    }
}

type RefreshWaiter = oneshot::Sender<Result<String, ApiError>>;

/// Coordination state for the credential-refresh critical section. Guarded
/// by a mutex that is never held across an await; reentrancy happens only
/// through interleaved continuations, which all go through the queue.
#[derive(Default)]
struct RefreshGate {
    in_flight: bool,
    pending: Vec<RefreshWaiter>,
}

struct ClientInner {
    base_url: String,
    http: reqwest::Client,
    credentials: CredentialStore,
    refresh: Mutex<RefreshGate>,
    session_tx: watch::Sender<SessionState>,
}

/// Authenticated HTTP transport. Attaches the bearer credential to every
/// request and transparently refreshes it on 401, with the guarantee that
/// no matter how many requests fail at once, at most one refresh call is
/// ever in flight: the first 401 performs the refresh, the rest queue and
/// are retried exactly once when it settles.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: CredentialStore,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder().cookie_store(true);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let initial = if credentials.is_logged_in() {
            SessionState::Active
        } else {
            SessionState::LoggedOut
        };
        let (session_tx, _) = watch::channel(initial);
        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url: base_url.into(),
                http,
                credentials,
                refresh: Mutex::new(RefreshGate::default()),
                session_tx,
            }),
        })
    }

    pub fn session_watch(&self) -> watch::Receiver<SessionState> {
        self.inner.session_tx.subscribe()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.inner.base_url)
    }

    /// Performs an authenticated request against `path`. See the type docs
    /// for the 401 handling contract; `/login` and `/refresh` themselves are
    /// exempt so a rejected refresh can never recurse.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ResponseBody, ApiError> {
        let token = self.inner.credentials.current();
        let response = self
            .execute(method.clone(), path, body, token.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && !is_auth_endpoint(path) {
            let fresh_token = self.refresh_credential().await?;
            let retried = self
                .execute(method, path, body, Some(fresh_token.as_str()))
                .await?;
            return read_body(retried).await;
        }

        read_body(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<Value>(Method::GET, path, None)
            .await?
            .into_json()
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body)).await?.into_json()
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, Some(body)).await?.into_json()
    }

    /// Exchanges credentials for a bearer token. The backend speaks the
    /// OAuth2 password form, so this goes out form-encoded, and the refresh
    /// token comes back as a cookie captured by the client's cookie store.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let form = [("username", username), ("password", password)];
        let response = self
            .inner
            .http
            .post(self.url(LOGIN_ENDPOINT))
            .form(&form)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let detail = login_failure_detail(response).await;
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let payload: crate::models::LoginResponse = response
            .json()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        self.inner
            .credentials
            .store(&payload.access_token)
            .map_err(|err| ApiError::Credential(err.to_string()))?;
        let _ = self.inner.session_tx.send(SessionState::Active);
        tracing::info!("logged in");
        Ok(())
    }

    /// Best-effort server-side logout; local credential removal always
    /// happens, whatever the server says.
    pub async fn logout(&self) {
        if let Some(token) = self.inner.credentials.current() {
            let result = self
                .inner
                .http
                .post(self.url(LOGOUT_ENDPOINT))
                .bearer_auth(token)
                .send()
                .await;
            if let Err(err) = result {
                tracing::debug!("logout request failed (ignored): {err}");
            }
        }
        if let Err(err) = self.inner.credentials.clear() {
            tracing::warn!("failed to clear credential: {err}");
        }
        let _ = self.inner.session_tx.send(SessionState::LoggedOut);
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.inner.http.request(method, self.url(path));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(ApiError::from_reqwest)
    }

    /// Single-flight credential refresh. The caller either becomes the
    /// refresher or parks on the pending queue until the in-flight refresh
    /// settles; the queue is drained atomically with clearing the flag.
    async fn refresh_credential(&self) -> Result<String, ApiError> {
        let waiter = {
            let mut gate = lock_gate(&self.inner.refresh);
            if gate.in_flight {
                let (tx, rx) = oneshot::channel();
                gate.pending.push(tx);
                Some(rx)
            } else {
                gate.in_flight = true;
                None
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(ApiError::SessionExpired),
            };
        }

        let outcome = self.perform_refresh().await;

        let pending = {
            let mut gate = lock_gate(&self.inner.refresh);
            gate.in_flight = false;
            std::mem::take(&mut gate.pending)
        };
        match &outcome {
            Ok(token) => {
                tracing::debug!(waiters = pending.len(), "credential refreshed");
                for waiter in pending {
                    let _ = waiter.send(Ok(token.clone()));
                }
            }
            Err(err) => {
                tracing::warn!(waiters = pending.len(), "credential refresh failed: {err}");
                for waiter in pending {
                    let _ = waiter.send(Err(err.clone()));
                }
                if let Err(clear_err) = self.inner.credentials.clear() {
                    tracing::warn!("failed to clear credential: {clear_err}");
                }
                let _ = self.inner.session_tx.send(SessionState::LoggedOut);
            }
        }
        outcome
    }

    async fn perform_refresh(&self) -> Result<String, ApiError> {
        tracing::debug!("access credential rejected; refreshing");
        let response = self
            .inner
            .http
            .post(self.url(REFRESH_ENDPOINT))
            .send()
            .await
            .map_err(ApiError::from_reqwest);
        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(_) | Err(_) => return Err(ApiError::SessionExpired),
        };
        let payload: crate::models::LoginResponse = response
            .json()
            .await
            .map_err(|_| ApiError::SessionExpired)?;
        self.inner
            .credentials
            .store(&payload.access_token)
            .map_err(|err| ApiError::Credential(err.to_string()))?;
        Ok(payload.access_token)
    }
}

fn is_auth_endpoint(path: &str) -> bool {
    path == LOGIN_ENDPOINT || path == REFRESH_ENDPOINT
}

fn lock_gate(gate: &Mutex<RefreshGate>) -> std::sync::MutexGuard<'_, RefreshGate> {
    match gate.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn read_body(response: reqwest::Response) -> Result<ResponseBody, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            detail,
        });
    }

    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));
    if is_json {
        let value = response
            .json::<Value>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        Ok(ResponseBody::Json(value))
    } else {
        let text = response
            .text()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        Ok(ResponseBody::Text(text))
    }
}

/// Login failures come back as JSON `{ "detail": ... }`; fall back to the
/// raw body when they do not.
async fn login_failure_detail(response: reqwest::Response) -> String {
    let raw = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => value
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(raw),
        Err(_) => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn auth_endpoints_are_exempt_from_refresh() {
        assert!(is_auth_endpoint("/login"));
        assert!(is_auth_endpoint("/refresh"));
        assert!(!is_auth_endpoint("/logout"));
        assert!(!is_auth_endpoint("/users/me/profile"));
    }

    #[test]
    fn json_body_decodes_into_typed_values() {
        let body = ResponseBody::Json(serde_json::json!({"access_token": "abc"}));
        let decoded: crate::models::LoginResponse = body.into_json().expect("decode");
        assert_eq!(decoded.access_token, "abc");
    }

    #[test]
    fn text_body_refuses_typed_decoding() {
        let body = ResponseBody::Text("pong".to_string());
        let err = body.into_json::<Value>().expect_err("should fail");
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
