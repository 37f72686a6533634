use anyhow::Result;
use usage_report::{config::LayeredTomlSource, observability, run};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    observability::init_tracing();
    let now = run::local_now();

    // User config first, then /etc/usage_report/config.toml
    let source = LayeredTomlSource::from_default_locations();
    run::run_from_source(&source, now).await?;

    Ok(())
}
