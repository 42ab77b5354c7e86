use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stack_string::StackString;
use time::{Date, PrimitiveDateTime};

use scale_lib::errors::ScaleError as Error;

/// Response of `GET /1/user/-/body/log/weight/date/{date}.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WeightLog {
    #[serde(default)]
    pub weight: Vec<WeightLogEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WeightLogEntry {
    pub bmi: Option<f64>,
    pub date: StackString,
    pub fat: Option<f64>,
    #[serde(rename = "logId")]
    pub log_id: i64,
    pub source: Option<StackString>,
    pub time: StackString,
    pub weight: f64,
}

impl WeightLog {
    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }

    pub fn len(&self) -> usize {
        self.weight.len()
    }
}

/// Reads and writes against the body log of the target account.
#[async_trait]
pub trait BodyLogClient: Send + Sync {
    async fn get_weight_log(&self, date: Date) -> Result<WeightLog, Error>;

    async fn create_weight_entry(
        &self,
        weight: f64,
        datetime: PrimitiveDateTime,
    ) -> Result<(), Error>;

    async fn create_body_fat_entry(
        &self,
        fat_pct: f64,
        datetime: PrimitiveDateTime,
    ) -> Result<(), Error>;
}
