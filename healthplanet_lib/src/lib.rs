#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod healthplanet_client;
