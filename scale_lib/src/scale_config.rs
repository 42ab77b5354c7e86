use serde::Deserialize;
use stack_string::{format_sstr, StackString};
use std::{
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};
use url::Url;

use crate::{credential_store::CredentialKey, errors::ScaleError as Error};

const FITBIT_ENDPOINT: &str = "https://api.fitbit.com";
const HEALTHPLANET_ENDPOINT: &str = "https://www.healthplanet.jp";

/// Raw values as found in the environment, see the dotenvy crate for the
/// credential file format.
#[derive(Default, Debug, Deserialize)]
struct ScaleConfigEnv {
    #[serde(default)]
    fitbit_client_id: StackString,
    fitbit_client_secret: Option<StackString>,
    fitbit_access_token: Option<StackString>,
    #[serde(default)]
    fitbit_refresh_token: StackString,
    #[serde(default)]
    healthplanet_access_token: StackString,
    fitbit_endpoint: Option<Url>,
    healthplanet_endpoint: Option<Url>,
}

/// `ScaleConfigInner` holds the credentials and endpoints, which can be set
/// either through environment variables or the credential file.
#[derive(Debug, PartialEq)]
pub struct ScaleConfigInner {
    pub fitbit_client_id: StackString,
    pub fitbit_client_secret: Option<StackString>,
    pub fitbit_access_token: Option<StackString>,
    pub fitbit_refresh_token: StackString,
    pub healthplanet_access_token: StackString,
    pub fitbit_endpoint: Url,
    pub healthplanet_endpoint: Url,
    /// File the values were loaded from, rewritten when tokens rotate.
    pub credential_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScaleConfig(Arc<ScaleConfigInner>);

impl ScaleConfigInner {
    fn from_env(env: ScaleConfigEnv, credential_file: PathBuf) -> Result<Self, Error> {
        let fitbit_endpoint = match env.fitbit_endpoint {
            Some(url) => url,
            None => FITBIT_ENDPOINT.parse()?,
        };
        let healthplanet_endpoint = match env.healthplanet_endpoint {
            Some(url) => url,
            None => HEALTHPLANET_ENDPOINT.parse()?,
        };
        Self {
            fitbit_client_id: env.fitbit_client_id,
            fitbit_client_secret: env.fitbit_client_secret.filter(|s| !s.is_empty()),
            fitbit_access_token: env.fitbit_access_token.filter(|s| !s.is_empty()),
            fitbit_refresh_token: env.fitbit_refresh_token,
            healthplanet_access_token: env.healthplanet_access_token,
            fitbit_endpoint,
            healthplanet_endpoint,
            credential_file,
        }
        .validate()
    }

    /// Required values are checked here, before anything touches the network.
    fn validate(self) -> Result<Self, Error> {
        let required = [
            (CredentialKey::FitbitClientId, &self.fitbit_client_id),
            (CredentialKey::FitbitRefreshToken, &self.fitbit_refresh_token),
            (
                CredentialKey::HealthPlanetAccessToken,
                &self.healthplanet_access_token,
            ),
        ];
        for (key, val) in required {
            if val.is_empty() {
                return Err(Error::ConfigError(format_sstr!("No {key} specified")));
            }
        }
        Ok(self)
    }
}

impl ScaleConfig {
    /// Pull configuration from a file if it exists,
    /// first look for an explicitly passed file,
    /// then try `${HOME}/.config/fitbit_scale_sync/config.env`,
    /// then fall back on `.env` in the current directory.
    /// The file that was loaded doubles as the credential store.
    pub fn get_config(fname: Option<&Path>) -> Result<Self, Error> {
        let credential_file = Self::find_credential_file(fname)?;
        if credential_file.exists() {
            dotenvy::from_path(&credential_file).map_err(|e| {
                Error::ConfigError(format_sstr!("{}: {e}", credential_file.display()))
            })?;
        }
        let env: ScaleConfigEnv = envy::from_env()?;
        ScaleConfigInner::from_env(env, credential_file).map(|c| Self(Arc::new(c)))
    }

    fn find_credential_file(fname: Option<&Path>) -> Result<PathBuf, Error> {
        if let Some(fname) = fname {
            if fname.exists() {
                return Ok(fname.to_path_buf());
            }
            return Err(Error::ConfigError(format_sstr!(
                "{} does not exist",
                fname.display()
            )));
        }
        let default_fname = dirs::config_dir()
            .map(|d| d.join("fitbit_scale_sync").join("config.env"))
            .filter(|p| p.exists());
        Ok(default_fname.unwrap_or_else(|| Path::new(".env").to_path_buf()))
    }
}

impl Deref for ScaleConfig {
    type Target = ScaleConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
