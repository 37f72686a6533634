use anyhow::Result;
use usage_report::{
    config::{EnvFileSource, DEFAULT_ENV_FILE},
    observability, run,
};

/// Same report, with database credentials read from `.env` in the working directory.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    observability::init_tracing();
    let now = run::local_now();

    let source = EnvFileSource::new(DEFAULT_ENV_FILE);
    run::run_from_source(&source, now).await?;

    Ok(())
}
