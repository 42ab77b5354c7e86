use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stack_string::{format_sstr, StackString};
use std::{collections::BTreeMap, fmt};
use time::{
    format_description::BorrowedFormatItem, macros::format_description, Date, PrimitiveDateTime,
};

use crate::errors::ScaleError as Error;

pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
pub const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");

/// A single reading from the scale, in the user's local time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleMeasurement {
    pub datetime: PrimitiveDateTime,
    pub mass: Option<f64>,
    pub fat_pct: Option<f64>,
}

fn format_opt(val: Option<f64>) -> StackString {
    val.map_or_else(|| "nil".into(), |v| format_sstr!("{v:.2}"))
}

impl fmt::Display for ScaleMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = self.date_str().map_err(|_| fmt::Error)?;
        let time = self.time_str().map_err(|_| fmt::Error)?;
        write!(
            f,
            "ScaleMeasurement(datetime: {date}T{time}, mass: {} kg, fat: {}%)",
            format_opt(self.mass),
            format_opt(self.fat_pct),
        )
    }
}

impl ScaleMeasurement {
    pub fn new(datetime: PrimitiveDateTime) -> Self {
        Self {
            datetime,
            mass: None,
            fat_pct: None,
        }
    }

    pub fn date(&self) -> Date {
        self.datetime.date()
    }

    pub fn date_str(&self) -> Result<StackString, Error> {
        Ok(self.datetime.format(DATE_FORMAT)?.into())
    }

    pub fn time_str(&self) -> Result<StackString, Error> {
        Ok(self.datetime.format(TIME_FORMAT)?.into())
    }

    /// Nothing to write for this timestamp.
    pub fn is_empty(&self) -> bool {
        self.mass.is_none() && self.fat_pct.is_none()
    }
}

/// Source of scale readings, keyed and ordered by timestamp.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    async fn get_measurements(&self) -> Result<BTreeMap<PrimitiveDateTime, ScaleMeasurement>, Error>;
}
