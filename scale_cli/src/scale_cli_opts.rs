use anyhow::{format_err, Error};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::{path::PathBuf, sync::Arc};
use time::{macros::format_description, Date};

use fitbit_lib::{
    fitbit_body_log::BodyLogClient,
    fitbit_client::FitbitClient,
    fitbit_token::{CredentialPersister, TokenListener},
};
use healthplanet_lib::healthplanet_client::HealthPlanetClient;
use scale_lib::{
    credential_store::{CredentialStore, EnvFileStore},
    scale_config::ScaleConfig,
};

use crate::scale_sync::ScaleSync;

fn parse_date(s: &str) -> Result<Date, String> {
    Date::parse(s, format_description!("[year]-[month]-[day]")).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(
    name = "fitbit-scale-sync",
    about = "Copy HealthPlanet weight and body fat measurements into Fitbit"
)]
pub struct ScaleCliOpts {
    /// Credential file, defaults to ~/.config/fitbit_scale_sync/config.env or ./.env
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<ScaleCommand>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ScaleCommand {
    /// Write measurements missing from Fitbit (default)
    Sync {
        #[arg(short, long, default_value_t = 30)]
        days: i64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Force a token refresh and save the new pair
    Refresh,
    /// Show the Fitbit weight log for one day
    Log {
        #[arg(short, long, value_parser = parse_date)]
        date: Date,
    },
}

impl Default for ScaleCommand {
    fn default() -> Self {
        Self::Sync {
            days: 30,
            dry_run: false,
        }
    }
}

impl ScaleCliOpts {
    /// # Errors
    /// Return error if config is incomplete or any step of the command fails
    pub async fn process_args() -> Result<(), Error> {
        Self::parse().run().await
    }

    /// # Errors
    /// Return error if config is incomplete or any step of the command fails
    pub async fn run(self) -> Result<(), Error> {
        let config = ScaleConfig::get_config(self.config.as_deref())?;
        let store: Arc<dyn CredentialStore> =
            Arc::new(EnvFileStore::new(&config.credential_file));
        let persister = CredentialPersister::new(store);
        match persister.missing_keys().await {
            Ok(missing) => {
                for key in missing {
                    warn!(
                        "{key} is not in {}, rotated tokens will not be saved",
                        config.credential_file.display()
                    );
                }
            }
            Err(e) => warn!("rotated tokens will not be saved: {e}"),
        }
        let listener: Arc<dyn TokenListener> = Arc::new(persister);
        let fitbit = FitbitClient::from_config(&config, Some(listener))?;

        let result = Self::run_command(&config, &fitbit, self.command.unwrap_or_default()).await;

        if fitbit.tokens.persistence_failed() {
            error!(
                "rotated tokens were not saved to {}, update FITBIT_REFRESH_TOKEN before the next run",
                config.credential_file.display()
            );
            result?;
            return Err(format_err!("failed to persist rotated fitbit tokens"));
        }
        result
    }

    async fn run_command(
        config: &ScaleConfig,
        fitbit: &FitbitClient,
        command: ScaleCommand,
    ) -> Result<(), Error> {
        match command {
            ScaleCommand::Sync { days, dry_run } => {
                let healthplanet = HealthPlanetClient::from_config(config)?.with_days(days);
                ScaleSync::new(&healthplanet, fitbit)
                    .with_dry_run(dry_run)
                    .run()
                    .await?;
            }
            ScaleCommand::Refresh => {
                fitbit.tokens.refresh().await?;
                info!("fitbit tokens refreshed");
            }
            ScaleCommand::Log { date } => {
                let log = fitbit.get_weight_log(date).await?;
                if log.is_empty() {
                    println!("{date}: no entries");
                }
                for entry in &log.weight {
                    println!(
                        "{} {} weight {:.2} fat {} bmi {} source {} logId {}",
                        entry.date,
                        entry.time,
                        entry.weight,
                        entry.fat.map_or_else(|| "nil".into(), |f| format!("{f:.2}")),
                        entry.bmi.map_or_else(|| "nil".into(), |b| format!("{b:.2}")),
                        entry.source.as_ref().map_or("nil", |s| s.as_str()),
                        entry.log_id,
                    );
                }
            }
        }
        Ok(())
    }
}
