use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use stack_string::{format_sstr, StackString};
use std::sync::Arc;
use time::{Date, PrimitiveDateTime};
use url::Url;

use scale_lib::{
    errors::ScaleError as Error,
    scale_config::ScaleConfig,
    scale_measurement::{DATE_FORMAT, TIME_FORMAT},
};

use crate::{
    fitbit_body_log::{BodyLogClient, WeightLog},
    fitbit_token::{TokenListener, TokenManager},
};

/// Writes are accepted for any status in `[200, 400)`.
pub fn is_write_success(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

#[derive(Clone)]
pub struct FitbitClient {
    pub client: Client,
    pub endpoint: Url,
    pub tokens: Arc<TokenManager>,
}

impl FitbitClient {
    pub fn new(client: Client, endpoint: Url, tokens: Arc<TokenManager>) -> Self {
        Self {
            client,
            endpoint,
            tokens,
        }
    }

    pub fn from_config(
        config: &ScaleConfig,
        listener: Option<Arc<dyn TokenListener>>,
    ) -> Result<Self, Error> {
        let client = Client::builder().build()?;
        let mut tokens = TokenManager::from_config(client.clone(), config)?;
        if let Some(listener) = listener {
            tokens = tokens.with_listener(listener);
        }
        Ok(Self::new(
            client,
            config.fitbit_endpoint.clone(),
            Arc::new(tokens),
        ))
    }

    /// Send with the current bearer token. A 401 forces one refresh and one
    /// resend of the same request; whatever comes back then is returned.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, Error>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let access_token = self.tokens.ensure_valid_token().await?;
        let resp = build(&self.client)
            .bearer_auth(&access_token)
            .send()
            .await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        warn!(
            "fitbit rejected access token for {}, refreshing and retrying once",
            resp.url().path()
        );
        let pair = self.tokens.refresh().await?;
        build(&self.client)
            .bearer_auth(&pair.access_token)
            .send()
            .await
            .map_err(Into::into)
    }

    async fn create_log_entry(
        &self,
        path: &str,
        param: &str,
        value: f64,
        datetime: PrimitiveDateTime,
    ) -> Result<(), Error> {
        let url = self.endpoint.join(path)?;
        let value = format_sstr!("{value:.2}");
        let date = datetime.format(DATE_FORMAT)?;
        let time = datetime.format(TIME_FORMAT)?;
        let query = [
            (param, value.as_str()),
            ("date", date.as_str()),
            ("time", time.as_str()),
        ];
        let resp = self
            .send_authorized(|client| client.post(url.clone()).query(&query))
            .await?;
        let status = resp.status();
        if is_write_success(status) {
            debug!("{path} {param}={value} {date} {time}: {status}");
            Ok(())
        } else {
            Err(Error::HttpError {
                status_code: status.as_u16(),
                url: url.as_str().into(),
            })
        }
    }
}

#[async_trait]
impl BodyLogClient for FitbitClient {
    async fn get_weight_log(&self, date: Date) -> Result<WeightLog, Error> {
        let date: StackString = date.format(DATE_FORMAT)?.into();
        let url = self
            .endpoint
            .join(&format_sstr!("1/user/-/body/log/weight/date/{date}.json"))?;
        let resp = self.send_authorized(|client| client.get(url.clone())).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpError {
                status_code: status.as_u16(),
                url: url.as_str().into(),
            });
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::DecodeError(format_sstr!("weight log for {date}: {e}")))
    }

    async fn create_weight_entry(
        &self,
        weight: f64,
        datetime: PrimitiveDateTime,
    ) -> Result<(), Error> {
        self.create_log_entry("1/user/-/body/log/weight.json", "weight", weight, datetime)
            .await
    }

    async fn create_body_fat_entry(
        &self,
        fat_pct: f64,
        datetime: PrimitiveDateTime,
    ) -> Result<(), Error> {
        self.create_log_entry("1/user/-/body/log/fat.json", "fat", fat_pct, datetime)
            .await
    }
}
