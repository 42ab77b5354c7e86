#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod credential_store;
pub mod errors;
pub mod scale_config;
pub mod scale_measurement;
