#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod scale_cli_opts;
pub mod scale_sync;
