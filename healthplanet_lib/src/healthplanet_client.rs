use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use stack_string::{format_sstr, StackString};
use std::collections::{btree_map::Entry, BTreeMap};
use time::{
    format_description::BorrowedFormatItem,
    macros::{format_description, offset},
    Duration, OffsetDateTime, PrimitiveDateTime,
};
use url::Url;

use scale_lib::{
    errors::ScaleError as Error,
    scale_config::ScaleConfig,
    scale_measurement::{MeasurementSource, ScaleMeasurement},
};

pub const WEIGHT_TAG: &str = "6021";
pub const FAT_TAG: &str = "6022";

/// The innerscan endpoint refuses windows longer than three months.
pub const MAX_DAYS: i64 = 90;

const QUERY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second]");
const INNERSCAN_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day][hour][minute]");

#[derive(Deserialize, Debug, Clone)]
pub struct InnerScanResponse {
    #[serde(default)]
    pub data: Vec<InnerScanData>,
    pub birth_date: Option<StackString>,
    pub height: Option<StackString>,
    pub sex: Option<StackString>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct InnerScanData {
    pub date: StackString,
    pub keydata: StackString,
    pub model: Option<StackString>,
    pub tag: StackString,
}

/// Parse the `yyyyMMddHHmm` timestamps used by the innerscan API.
pub fn parse_innerscan_datetime(s: &str) -> Result<PrimitiveDateTime, Error> {
    PrimitiveDateTime::parse(s, INNERSCAN_FORMAT)
        .map_err(|e| Error::DecodeError(format_sstr!("invalid innerscan date {s}: {e}")))
}

impl InnerScanResponse {
    /// Group weight and body fat records sharing a timestamp into one
    /// measurement each, ordered by timestamp.
    pub fn aggregate(&self) -> Result<BTreeMap<PrimitiveDateTime, ScaleMeasurement>, Error> {
        let mut measurements = BTreeMap::new();
        for item in &self.data {
            let tag = item.tag.as_str();
            if tag != WEIGHT_TAG && tag != FAT_TAG {
                debug!("ignoring innerscan tag {tag}");
                continue;
            }
            let datetime = parse_innerscan_datetime(&item.date)?;
            let value: f64 = item.keydata.parse().map_err(|e| {
                Error::DecodeError(format_sstr!("invalid keydata {}: {e}", item.keydata))
            })?;
            let measurement = match measurements.entry(datetime) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(ScaleMeasurement::new(datetime)),
            };
            if tag == WEIGHT_TAG {
                measurement.mass = Some(value);
            } else {
                measurement.fat_pct = Some(value);
            }
        }
        Ok(measurements)
    }
}

pub struct HealthPlanetClient {
    client: Client,
    endpoint: Url,
    access_token: StackString,
    days: i64,
}

impl HealthPlanetClient {
    pub fn new(client: Client, endpoint: Url, access_token: impl Into<StackString>) -> Self {
        Self {
            client,
            endpoint,
            access_token: access_token.into(),
            days: 30,
        }
    }

    pub fn from_config(config: &ScaleConfig) -> Result<Self, Error> {
        Ok(Self::new(
            Client::builder().build()?,
            config.healthplanet_endpoint.clone(),
            config.healthplanet_access_token.clone(),
        ))
    }

    /// Length of the reporting window ending now, clamped to `1..=MAX_DAYS`.
    #[must_use]
    pub fn with_days(mut self, days: i64) -> Self {
        self.days = days.clamp(1, MAX_DAYS);
        self
    }

    /// HealthPlanet reports in Japan time.
    fn window(&self) -> Result<(StackString, StackString), Error> {
        let now = OffsetDateTime::now_utc().to_offset(offset!(+9));
        let from = now - Duration::days(self.days);
        Ok((
            from.format(QUERY_FORMAT)?.into(),
            now.format(QUERY_FORMAT)?.into(),
        ))
    }

    pub async fn get_innerscan_data(&self) -> Result<InnerScanResponse, Error> {
        let url = self.endpoint.join("status/innerscan.json")?;
        let (from, to) = self.window()?;
        let tags = format_sstr!("{WEIGHT_TAG},{FAT_TAG}");
        let resp = self
            .client
            .get(url.clone())
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("date", "1"),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("tag", tags.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpError {
                status_code: status.as_u16(),
                url: url.as_str().into(),
            });
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::DecodeError(format_sstr!("innerscan response: {e}")))
    }
}

#[async_trait]
impl MeasurementSource for HealthPlanetClient {
    async fn get_measurements(
        &self,
    ) -> Result<BTreeMap<PrimitiveDateTime, ScaleMeasurement>, Error> {
        let measurements = self.get_innerscan_data().await?.aggregate()?;
        info!(
            "healthplanet returned {} measurements over {} days",
            measurements.len(),
            self.days
        );
        Ok(measurements)
    }
}
