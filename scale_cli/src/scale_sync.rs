use log::{debug, error, info};
use std::fmt;
use time::PrimitiveDateTime;

use fitbit_lib::fitbit_body_log::BodyLogClient;
use scale_lib::{
    errors::ScaleError as Error,
    scale_measurement::{MeasurementSource, ScaleMeasurement},
};

/// What happened to one timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    /// The target already has at least one entry on this date; nothing was
    /// written for either metric.
    AlreadyPresent {
        datetime: PrimitiveDateTime,
        existing_entries: usize,
    },
    Written {
        datetime: PrimitiveDateTime,
        weight_written: bool,
        fat_written: bool,
    },
    WouldWrite {
        datetime: PrimitiveDateTime,
        mass: Option<f64>,
        fat_pct: Option<f64>,
    },
}

impl SyncOutcome {
    pub fn datetime(&self) -> PrimitiveDateTime {
        match self {
            Self::AlreadyPresent { datetime, .. }
            | Self::Written { datetime, .. }
            | Self::WouldWrite { datetime, .. } => *datetime,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Written {
                weight_written: true,
                ..
            } | Self::Written {
                fat_written: true,
                ..
            }
        )
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPresent {
                datetime,
                existing_entries,
            } => write!(f, "{datetime}: record is found ({existing_entries} entries)"),
            Self::Written {
                datetime,
                weight_written,
                fat_written,
            } => write!(
                f,
                "{datetime}: saved, weight: {weight_written}, fat: {fat_written}"
            ),
            Self::WouldWrite {
                datetime,
                mass,
                fat_pct,
            } => write!(f, "{datetime}: would save, weight: {mass:?}, fat: {fat_pct:?}"),
        }
    }
}

/// Copies measurements from a source into the target body log, one
/// timestamp at a time, skipping any date the target already has data for.
pub struct ScaleSync<'a> {
    source: &'a dyn MeasurementSource,
    target: &'a dyn BodyLogClient,
    dry_run: bool,
}

impl<'a> ScaleSync<'a> {
    pub fn new(source: &'a dyn MeasurementSource, target: &'a dyn BodyLogClient) -> Self {
        Self {
            source,
            target,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// # Errors
    /// The first failed read or write aborts the run; timestamps after it
    /// are not attempted.
    pub async fn run(&self) -> Result<Vec<SyncOutcome>, Error> {
        let measurements = self.source.get_measurements().await?;
        let mut outcomes = Vec::with_capacity(measurements.len());
        for measurement in measurements.values() {
            let outcome = self.sync_measurement(measurement).await?;
            info!("{outcome}");
            outcomes.push(outcome);
        }
        let written = outcomes.iter().filter(|o| o.is_write()).count();
        let present = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::AlreadyPresent { .. }))
            .count();
        info!(
            "done, {} timestamps: {written} written, {present} already present",
            outcomes.len()
        );
        Ok(outcomes)
    }

    /// # Errors
    /// Returns the read error, or the first write error after both writes
    /// have been attempted.
    pub async fn sync_measurement(
        &self,
        measurement: &ScaleMeasurement,
    ) -> Result<SyncOutcome, Error> {
        debug!("{measurement}");
        let datetime = measurement.datetime;
        let existing = self.target.get_weight_log(measurement.date()).await?;
        if !existing.is_empty() {
            return Ok(SyncOutcome::AlreadyPresent {
                datetime,
                existing_entries: existing.len(),
            });
        }
        if measurement.is_empty() {
            return Ok(SyncOutcome::Written {
                datetime,
                weight_written: false,
                fat_written: false,
            });
        }
        if self.dry_run {
            return Ok(SyncOutcome::WouldWrite {
                datetime,
                mass: measurement.mass,
                fat_pct: measurement.fat_pct,
            });
        }

        let weight_result = match measurement.mass {
            Some(mass) => Some(self.target.create_weight_entry(mass, datetime).await),
            None => None,
        };
        let fat_result = match measurement.fat_pct {
            Some(fat_pct) => Some(self.target.create_body_fat_entry(fat_pct, datetime).await),
            None => None,
        };
        let weight_written = matches!(weight_result, Some(Ok(())));
        let fat_written = matches!(fat_result, Some(Ok(())));

        let mut first_error = None;
        for (name, result) in [("weight", weight_result), ("fat", fat_result)] {
            if let Some(Err(e)) = result {
                error!("{datetime}: failed to create {name} log: {e}");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            error!("{datetime}: aborting run, weight: {weight_written}, fat: {fat_written}");
            return Err(e);
        }
        Ok(SyncOutcome::Written {
            datetime,
            weight_written,
            fat_written,
        })
    }
}
