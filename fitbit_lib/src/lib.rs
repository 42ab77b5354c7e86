#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod fitbit_body_log;
pub mod fitbit_client;
pub mod fitbit_token;
