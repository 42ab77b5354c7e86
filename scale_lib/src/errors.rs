use envy::Error as EnvyError;
use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use stack_string::StackString;
use std::{fmt::Debug, num::ParseFloatError};
use thiserror::Error;
use time::error::{
    ComponentRange as TimeComponentRange, Format as TimeFormatError, Parse as TimeParseError,
};
use url::ParseError as UrlParseError;

#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("ConfigError {0}")]
    ConfigError(StackString),
    #[error("AuthError {reason}: {detail}")]
    AuthError {
        reason: &'static str,
        detail: StackString,
    },
    #[error("HttpError status {status_code} from {url}")]
    HttpError { status_code: u16, url: StackString },
    #[error("DecodeError {0}")]
    DecodeError(StackString),
    #[error("PersistenceError {0}")]
    PersistenceError(StackString),
    #[error("SerdeJsonError {0}")]
    SerdeJsonError(#[from] SerdeJsonError),
    #[error("ReqwestError {0}")]
    ReqwestError(#[from] ReqwestError),
    #[error("EnvyError {0}")]
    EnvyError(#[from] EnvyError),
    #[error("UrlParseError {0}")]
    UrlParseError(#[from] UrlParseError),
    #[error("ParseFloatError {0}")]
    ParseFloatError(#[from] ParseFloatError),
    #[error("io Error {0}")]
    IoError(#[from] std::io::Error),
    #[error("TimeFormatError {0}")]
    TimeFormatError(#[from] TimeFormatError),
    #[error("TimeParseError {0}")]
    TimeParseError(Box<TimeParseError>),
    #[error("TimeComponentRange {0}")]
    TimeComponentRange(Box<TimeComponentRange>),
}

impl ScaleError {
    pub fn refresh_failed(detail: impl Into<StackString>) -> Self {
        Self::AuthError {
            reason: "refresh failed",
            detail: detail.into(),
        }
    }

    /// Numeric status of a non-success response, if this is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<TimeParseError> for ScaleError {
    fn from(value: TimeParseError) -> Self {
        Self::TimeParseError(value.into())
    }
}

impl From<TimeComponentRange> for ScaleError {
    fn from(value: TimeComponentRange) -> Self {
        Self::TimeComponentRange(value.into())
    }
}
