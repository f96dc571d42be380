//! The authenticated request executor.
//!
//! [`ApiClient::execute`] attaches the credentials of the configured
//! [`ApiVariant`], sends the call and inspects the provider's error envelope.
//! A recoverable code triggers one repair (token renewal or device session
//! creation) followed by exactly one more attempt. Everything else, including a
//! second failure after a repair, is returned to the caller.

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ApiVariant, ClientConfig};
use crate::envelope::{ErrorEnvelope, Recovery};
use crate::error::RequestError;
use crate::hook::{SIGNED_USER_AGENT, SignatureHook};
use crate::model::AccountId;
use crate::session::SessionStore;
use crate::store::Secret;
use crate::token::TokenProvider;

const CANARY: &str = "client=Android,app=adrive,version=v6.0.1";
const ORIGIN: &str = "https://www.alipan.com";
const REFERER: &str = "https://alipan.com/";

/// Device metadata announced when creating a session.
const DEVICE_NAME: &str = "samsung";
const MODEL_NAME: &str = "SM-G9810";

/// One logical API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,

    /// Extra headers; they replace the defaults of the same name.
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Credentials attached to a single attempt.
struct AuthMaterial {
    access_token: Secret,

    /// Device id and current signature, legacy variant only.
    device: Option<(String, String)>,
}

enum Attempt {
    Success(Vec<u8>),
    Failed(ErrorEnvelope),
}

/// Build the HTTP client used for every provider call.
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, RequestError> {
    Ok(reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?)
}

/// Executes authenticated calls for one account.
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: Arc<dyn TokenProvider>,
    sessions: Arc<SessionStore>,
    hook: Option<SignatureHook>,
}

impl ApiClient {
    /// Create a client with its own HTTP connection pool.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn TokenProvider>,
        sessions: Arc<SessionStore>,
    ) -> Result<Self, RequestError> {
        let http = build_http_client(&config)?;
        Ok(Self::with_http(http, config, credentials, sessions))
    }

    pub fn with_http(
        http: reqwest::Client,
        config: ClientConfig,
        credentials: Arc<dyn TokenProvider>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let hook = config
            .hook_address
            .as_deref()
            .filter(|address| !address.is_empty())
            .map(|address| SignatureHook::new(http.clone(), address));
        Self {
            http,
            config,
            credentials,
            sessions,
            hook,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn account(&self) -> &AccountId {
        self.credentials.account()
    }

    pub fn credentials(&self) -> &Arc<dyn TokenProvider> {
        &self.credentials
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn hook(&self) -> Option<&SignatureHook> {
        self.hook.as_ref()
    }

    /// Run a call, repairing credentials at most once.
    ///
    /// Returns the raw body of the successful response.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RequestError> {
        let variant = self.config.variant;
        let mut recovered = false;

        loop {
            if cancel.is_cancelled() {
                return Err(RequestError::Cancelled);
            }

            let auth = self.auth_material().await?;
            let token_missing = auth.access_token.is_empty();

            let envelope = match self.send(request, &auth, cancel).await? {
                Attempt::Success(body) => return Ok(body),
                Attempt::Failed(envelope) => envelope,
            };

            let recovery = envelope.classify(variant, token_missing);
            if recovered || recovery == Recovery::None {
                return Err(envelope.into());
            }
            if cancel.is_cancelled() {
                return Err(RequestError::Cancelled);
            }

            tracing::info!(
                "Recovering from {} for {} ({:?})",
                envelope.code,
                self.account(),
                recovery
            );
            match recovery {
                Recovery::RefreshToken => {
                    self.credentials
                        .refresh_if_stale(&auth.access_token)
                        .await?;
                }
                Recovery::CreateSession => self.create_session(cancel).await?,
                Recovery::None => return Err(envelope.into()),
            }
            recovered = true;
        }
    }

    /// Run a call and decode its JSON body.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T, RequestError> {
        let body = self.execute(request, cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Run a call carrying a v2 signature from the signing hook.
    ///
    /// Headers already on `request` take precedence over the signing headers.
    pub async fn execute_signed(
        &self,
        mut request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RequestError> {
        let hook = self.hook.as_ref().ok_or_else(|| RequestError::Hook {
            message: "no hook address configured".to_string(),
        })?;

        let device_id = {
            let handle = self.sessions.ensure(self.account());
            let state = handle.lock().await;
            state.device_id().to_string()
        };
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = Uuid::new_v4().to_string();
        let signature = hook.sign_v2(&device_id, &timestamp, &nonce).await?;

        let mut headers = vec![
            ("x-signature-v2".to_string(), signature),
            ("x-nonce".to_string(), nonce),
            ("x-timestamp".to_string(), timestamp),
            ("User-Agent".to_string(), SIGNED_USER_AGENT.to_string()),
        ];
        headers.append(&mut request.headers);
        request.headers = headers;

        self.execute(&request, cancel).await
    }

    /// Sign and register a new device session.
    ///
    /// The account's session state stays locked for the whole cycle, so
    /// concurrent callers run one after the other and observe one retry
    /// counter. The fourth consecutive call after three failures fails with
    /// [`SessionError::RetriesExhausted`](crate::SessionError::RetriesExhausted)
    /// without reaching the provider.
    ///
    /// A cancelled attempt is not counted. Transport failures are.
    pub async fn create_session(&self, cancel: &CancellationToken) -> Result<(), RequestError> {
        let account = self.account().clone();
        let handle = self.sessions.ensure(&account);
        let mut state = handle.lock().await;

        state.sign(&account)?;
        state.begin_attempt()?;

        let credentials = self.credentials.credentials().await?;
        let request = ApiRequest::post(format!(
            "{}/users/v1/users/device/create_session",
            self.config.endpoints.api
        ))
        .json(json!({
            "deviceName": DEVICE_NAME,
            "modelName": MODEL_NAME,
            "nonce": 0,
            "pubKey": state.public_key_hex(),
            "refreshToken": credentials.refresh_token.expose(),
        }));
        let auth = AuthMaterial {
            access_token: credentials.access_token.clone(),
            device: Some((state.device_id().to_string(), state.signature().to_string())),
        };

        match self.send(&request, &auth, cancel).await {
            Ok(Attempt::Success(_)) => {
                state.reset_attempts();
                tracing::info!("Device session created for {}", account);
                Ok(())
            }
            Ok(Attempt::Failed(envelope)) => {
                tracing::warn!(
                    "Device session creation failed for {} (attempt {}): {}",
                    account,
                    state.retry_count(),
                    envelope.message
                );
                Err(envelope.into())
            }
            Err(RequestError::Cancelled) => {
                state.abandon_attempt();
                Err(RequestError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(
                    "Device session creation failed for {} (attempt {}): {}",
                    account,
                    state.retry_count(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn auth_material(&self) -> Result<AuthMaterial, RequestError> {
        let access_token = self.credentials.access_token().await?;
        let device = match self.config.variant {
            ApiVariant::DeviceSession => {
                let account = self.account();
                let handle = self.sessions.ensure(account);
                let mut state = handle.lock().await;
                let signature = state.sign(account)?.to_string();
                Some((state.device_id().to_string(), signature))
            }
            ApiVariant::Open => None,
        };
        Ok(AuthMaterial {
            access_token,
            device,
        })
    }

    fn headers(&self, request: &ApiRequest, auth: &AuthMaterial) -> Result<HeaderMap, RequestError> {
        let token = auth.access_token.expose();
        let mut defaults: Vec<(&str, String)> = Vec::new();

        match self.config.variant {
            ApiVariant::DeviceSession => {
                let (device_id, signature) = auth.device.clone().unwrap_or_default();
                defaults.push(("authorization", format!("Bearer\t{}", token)));
                defaults.push(("content-type", "application/json".to_string()));
                defaults.push(("origin", ORIGIN.to_string()));
                defaults.push(("referer", REFERER.to_string()));
                defaults.push(("x-signature", signature));
                defaults.push(("x-canary", CANARY.to_string()));
                defaults.push(("x-device-id", device_id));
            }
            ApiVariant::Open => {
                defaults.push(("authorization", format!("Bearer {}", token)));
                if request.method == Method::POST {
                    defaults.push(("content-type", "application/json".to_string()));
                }
            }
        }
        defaults.push(("x-request-id", Uuid::new_v4().to_string()));

        let mut headers = HeaderMap::new();
        let extra = request
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()));
        for (name, value) in defaults.into_iter().chain(extra) {
            let name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| RequestError::InvalidRequest {
                    message: format!("invalid header name {}: {}", name, e),
                })?;
            let value =
                HeaderValue::from_str(&value).map_err(|e| RequestError::InvalidRequest {
                    message: format!("invalid value for header {}: {}", name, e),
                })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn body(&self, request: &ApiRequest) -> Result<Option<Vec<u8>>, RequestError> {
        match (&request.body, self.config.variant) {
            (Some(body), _) => Ok(Some(serde_json::to_vec(body)?)),
            (None, ApiVariant::DeviceSession) => Ok(Some(b"{}".to_vec())),
            (None, ApiVariant::Open) => Ok(None),
        }
    }

    /// One round trip without any recovery.
    async fn send(
        &self,
        request: &ApiRequest,
        auth: &AuthMaterial,
        cancel: &CancellationToken,
    ) -> Result<Attempt, RequestError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(self.headers(request, auth)?);
        if let Some(body) = self.body(request)? {
            builder = builder.body(body);
        }

        let round_trip = async {
            let response = builder.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };
        let (status, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(RequestError::Cancelled),
            result = round_trip => result?,
        };
        tracing::debug!("{} {} -> {}", request.method, request.url, status);

        if status.is_success() {
            return Ok(Attempt::Success(body.to_vec()));
        }

        let envelope = ErrorEnvelope::parse(&body);
        if envelope.is_error() {
            return Ok(Attempt::Failed(envelope));
        }
        Err(RequestError::BadStatus {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("account", self.account())
            .field("variant", &self.config.variant)
            .field("hook", &self.hook)
            .finish()
    }
}
