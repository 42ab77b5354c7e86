use async_trait::async_trait;
use derive_more::Display;
use log::{debug, warn};
use parking_lot::Mutex;
use stack_string::{format_sstr, StackString};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};

use crate::errors::ScaleError as Error;

/// Well known keys held in the credential file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CredentialKey {
    #[display("FITBIT_CLIENT_ID")]
    FitbitClientId,
    #[display("FITBIT_ACCESS_TOKEN")]
    FitbitAccessToken,
    #[display("FITBIT_REFRESH_TOKEN")]
    FitbitRefreshToken,
    #[display("HEALTHPLANET_ACCESS_TOKEN")]
    HealthPlanetAccessToken,
}

impl CredentialKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FitbitClientId => "FITBIT_CLIENT_ID",
            Self::FitbitAccessToken => "FITBIT_ACCESS_TOKEN",
            Self::FitbitRefreshToken => "FITBIT_REFRESH_TOKEN",
            Self::HealthPlanetAccessToken => "HEALTHPLANET_ACCESS_TOKEN",
        }
    }
}

/// Durable key/value storage for credentials.
///
/// `update` only rewrites keys that already exist; keys missing from the
/// store are dropped (with a warning), never appended.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn read_all(&self) -> Result<HashMap<StackString, StackString>, Error>;

    async fn update(&self, entries: &[(&str, &str)]) -> Result<(), Error>;
}

/// `KEY=VALUE` file, one record per line.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut fname = path
        .file_name()
        .map(|f| f.to_os_string())
        .unwrap_or_default();
    fname.push(".tmp");
    path.with_file_name(fname)
}

fn persistence_error(action: &str, path: &Path, e: impl fmt::Display) -> Error {
    Error::PersistenceError(format_sstr!("{action} {}: {e}", path.display()))
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, val) = line.split_once('=')?;
    Some((key.trim(), val.trim()))
}

/// Rewrite every line starting with `KEY=` for each entry, leaving all other
/// lines, their order and their line endings alone. Returns the new text and
/// the keys that had no matching line.
pub fn update_lines<'a>(text: &str, entries: &[(&'a str, &str)]) -> (String, Vec<&'a str>) {
    let mut found = vec![false; entries.len()];
    let mut output = String::with_capacity(text.len());
    for raw in text.split_inclusive('\n') {
        let (line, ending) = if let Some(line) = raw.strip_suffix("\r\n") {
            (line, "\r\n")
        } else if let Some(line) = raw.strip_suffix('\n') {
            (line, "\n")
        } else {
            (raw, "")
        };
        let replacement = entries
            .iter()
            .enumerate()
            .find(|(_, (key, _))| line.strip_prefix(key).is_some_and(|r| r.starts_with('=')));
        if let Some((idx, (key, val))) = replacement {
            found[idx] = true;
            output.push_str(key);
            output.push('=');
            output.push_str(val);
        } else {
            output.push_str(line);
        }
        output.push_str(ending);
    }
    let missing = entries
        .iter()
        .zip(found)
        .filter_map(|((key, _), found)| if found { None } else { Some(*key) })
        .collect();
    (output, missing)
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write `output` next to `target` with the target's permissions, then
    /// rename it over the target.
    async fn replace(target: &Path, output: &str) -> Result<(), Error> {
        let permissions = fs::metadata(target)
            .await
            .map_err(|e| persistence_error("stat", target, e))?
            .permissions();
        let tmp_path = tmp_path(target);
        let result = async {
            let mut f = fs::File::create(&tmp_path)
                .await
                .map_err(|e| persistence_error("create", &tmp_path, e))?;
            fs::set_permissions(&tmp_path, permissions)
                .await
                .map_err(|e| persistence_error("chmod", &tmp_path, e))?;
            f.write_all(output.as_bytes())
                .await
                .map_err(|e| persistence_error("write", &tmp_path, e))?;
            f.flush()
                .await
                .map_err(|e| persistence_error("flush", &tmp_path, e))?;
            f.sync_all()
                .await
                .map_err(|e| persistence_error("sync", &tmp_path, e))?;
            fs::rename(&tmp_path, target)
                .await
                .map_err(|e| persistence_error("rename", target, e))
        }
        .await;
        if result.is_err() {
            fs::remove_file(&tmp_path).await.ok();
        }
        result
    }
}

#[async_trait]
impl CredentialStore for EnvFileStore {
    async fn read_all(&self) -> Result<HashMap<StackString, StackString>, Error> {
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|e| persistence_error("read", &self.path, e))?;
        Ok(text
            .lines()
            .filter_map(parse_line)
            .map(|(k, v)| (k.into(), v.into()))
            .collect())
    }

    async fn update(&self, entries: &[(&str, &str)]) -> Result<(), Error> {
        // follow symlinks so the link itself survives the rename
        let target = fs::canonicalize(&self.path)
            .await
            .map_err(|e| persistence_error("resolve", &self.path, e))?;
        let text = fs::read_to_string(&target)
            .await
            .map_err(|e| persistence_error("read", &target, e))?;
        let (output, missing) = update_lines(&text, entries);
        for key in missing {
            warn!("{key} not present in {}, update dropped", self.path.display());
        }
        Self::replace(&target, &output).await?;
        debug!("updated {} keys in {}", entries.len(), target.display());
        Ok(())
    }
}

/// In-memory store with the same update-only semantics as [`EnvFileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<(StackString, StackString)>>,
}

impl MemoryStore {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, key: &str) -> Option<StackString> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.clone())
    }

    pub fn snapshot(&self) -> Vec<(StackString, StackString)> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn read_all(&self) -> Result<HashMap<StackString, StackString>, Error> {
        Ok(self.entries.lock().iter().cloned().collect())
    }

    async fn update(&self, entries: &[(&str, &str)]) -> Result<(), Error> {
        let mut current = self.entries.lock();
        for (key, val) in entries {
            if let Some((_, v)) = current.iter_mut().find(|(k, _)| k.as_str() == *key) {
                *v = (*val).into();
            } else {
                warn!("{key} not present in memory store, update dropped");
            }
        }
        Ok(())
    }
}
