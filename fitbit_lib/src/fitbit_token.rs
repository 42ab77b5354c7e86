use async_trait::async_trait;
use log::{debug, error, info};
use maplit::hashmap;
use reqwest::Client;
use serde::Deserialize;
use stack_string::{format_sstr, StackString};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use url::Url;

use scale_lib::{
    credential_store::{CredentialKey, CredentialStore},
    errors::ScaleError as Error,
    scale_config::ScaleConfig,
};

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::seconds(60);

#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: StackString,
    pub refresh_token: StackString,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Notified once for every successful refresh, before the new pair is handed
/// out to any caller.
#[async_trait]
pub trait TokenListener: Send + Sync {
    async fn token_rotated(&self, pair: &TokenPair) -> Result<(), Error>;
}

/// Writes rotated tokens into the credential store.
pub struct CredentialPersister {
    store: Arc<dyn CredentialStore>,
}

const PERSISTED_KEYS: [CredentialKey; 2] = [
    CredentialKey::FitbitAccessToken,
    CredentialKey::FitbitRefreshToken,
];

impl CredentialPersister {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Keys a rotation would write that the store does not hold; updates to
    /// these are dropped.
    pub async fn missing_keys(&self) -> Result<Vec<CredentialKey>, Error> {
        let values = self.store.read_all().await?;
        Ok(PERSISTED_KEYS
            .into_iter()
            .filter(|key| !values.contains_key(key.as_str()))
            .collect())
    }
}

#[async_trait]
impl TokenListener for CredentialPersister {
    async fn token_rotated(&self, pair: &TokenPair) -> Result<(), Error> {
        let [access_key, refresh_key] = PERSISTED_KEYS;
        self.store
            .update(&[
                (access_key.as_str(), pair.access_token.as_str()),
                (refresh_key.as_str(), pair.refresh_token.as_str()),
            ])
            .await
    }
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: Option<StackString>,
    refresh_token: Option<StackString>,
    expires_in: Option<i64>,
    user_id: Option<StackString>,
}

struct TokenState {
    pair: TokenPair,
    expires_at: Option<OffsetDateTime>,
}

impl TokenState {
    /// An unknown expiry counts as expired, so the first use always refreshes.
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at
            .map_or(true, |expires_at| now + EXPIRY_MARGIN >= expires_at)
    }
}

/// Owns the Fitbit OAuth2 token pair for the duration of a run.
pub struct TokenManager {
    client: Client,
    token_url: Url,
    client_id: StackString,
    client_secret: Option<StackString>,
    state: Mutex<TokenState>,
    listener: Option<Arc<dyn TokenListener>>,
    persistence_failed: AtomicBool,
}

impl TokenManager {
    pub fn new(
        client: Client,
        token_url: Url,
        client_id: impl Into<StackString>,
        client_secret: Option<StackString>,
        pair: TokenPair,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.filter(|s| !s.is_empty()),
            state: Mutex::new(TokenState {
                pair,
                expires_at: None,
            }),
            listener: None,
            persistence_failed: AtomicBool::new(false),
        }
    }

    pub fn from_config(client: Client, config: &ScaleConfig) -> Result<Self, Error> {
        let token_url = config.fitbit_endpoint.join("oauth2/token")?;
        let pair = TokenPair {
            access_token: config.fitbit_access_token.clone().unwrap_or_default(),
            refresh_token: config.fitbit_refresh_token.clone(),
        };
        Ok(Self::new(
            client,
            token_url,
            config.fitbit_client_id.clone(),
            config.fitbit_client_secret.clone(),
            pair,
        ))
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn TokenListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Returns an access token usable right now, refreshing first if needed.
    pub async fn ensure_valid_token(&self) -> Result<StackString, Error> {
        let mut state = self.state.lock().await;
        if state.is_expired(OffsetDateTime::now_utc()) {
            debug!("fitbit access token expired or unknown, refreshing");
            self.refresh_locked(&mut state).await?;
        }
        Ok(state.pair.access_token.clone())
    }

    /// Unconditional refresh-token grant.
    pub async fn refresh(&self) -> Result<TokenPair, Error> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await?;
        Ok(state.pair.clone())
    }

    pub async fn current(&self) -> TokenPair {
        self.state.lock().await.pair.clone()
    }

    /// True if any rotated pair could not be written to the store this run.
    pub fn persistence_failed(&self) -> bool {
        self.persistence_failed.load(Ordering::SeqCst)
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc();
        let (pair, expires_in) = self
            .request_refresh(state.pair.refresh_token.as_str())
            .await?;
        state.pair = pair;
        state.expires_at = expires_in.map(|secs| now + Duration::seconds(secs));
        info!("refreshed fitbit access token");
        self.notify(&state.pair).await;
        Ok(())
    }

    async fn request_refresh(
        &self,
        refresh_token: &str,
    ) -> Result<(TokenPair, Option<i64>), Error> {
        let data = hashmap! {
            "grant_type" => "refresh_token",
            "client_id" => self.client_id.as_str(),
            "refresh_token" => refresh_token,
        };
        let mut request = self.client.post(self.token_url.clone()).form(&data);
        if let Some(client_secret) = &self.client_secret {
            request = request.basic_auth(&self.client_id, Some(client_secret));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| Error::refresh_failed(format_sstr!("request error: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::refresh_failed(format_sstr!("body error: {e}")))?;
        if !status.is_success() {
            return Err(Error::refresh_failed(format_sstr!(
                "status {}: {body}",
                status.as_u16()
            )));
        }
        let auth_resp: AccessTokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::refresh_failed(format_sstr!("invalid response: {e}")))?;
        let access_token = auth_resp
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::refresh_failed("response missing access_token"))?;
        let refresh_token = auth_resp
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::refresh_failed("response missing refresh_token"))?;
        if let Some(user_id) = &auth_resp.user_id {
            debug!("token issued for fitbit user {user_id}");
        }
        Ok((
            TokenPair {
                access_token,
                refresh_token,
            },
            auth_resp.expires_in,
        ))
    }

    async fn notify(&self, pair: &TokenPair) {
        if let Some(listener) = &self.listener {
            if let Err(e) = listener.token_rotated(pair).await {
                error!("failed to persist rotated fitbit tokens, the next run may be locked out: {e}");
                self.persistence_failed.store(true, Ordering::SeqCst);
            }
        }
    }
}
