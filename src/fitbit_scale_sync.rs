use anyhow::Error;

use scale_cli::scale_cli_opts::ScaleCliOpts;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    env_logger::init();
    ScaleCliOpts::process_args().await
}
