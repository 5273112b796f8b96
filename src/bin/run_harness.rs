use std::error::Error;
use std::sync::Arc;

use visual_harness::{
    Config, HttpBackend, Orchestrator, RunPlan, Step, TestIdentity, WebDriverProvider, write_report,
};

/// Hello World visual check: load the target page and capture one window checkpoint.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    config.validate()?;

    let plan = RunPlan::new(
        TestIdentity::new(&config.target.app_name, &config.target.test_name)?,
        vec![
            Step::navigate(&config.target.url),
            Step::checkpoint("Hello World"),
        ],
    )?;

    let provider = Arc::new(WebDriverProvider::new(&config.browser.webdriver_url)?);
    let backend = Arc::new(HttpBackend::new(&config.backend.server_url, &config.backend.api_key)?);
    let orchestrator = Orchestrator::new(provider, backend, config.harness_config());

    let verdict = orchestrator.run(&plan).await;

    println!("Harness finished: {}", verdict.overall);
    for result in &verdict.results {
        println!("Checkpoint: {} -> {}", result.label, result.status);
    }
    if let Some(error) = &verdict.error {
        eprintln!("Harness error: {}", error);
    }

    match write_report(&config.report_dir, &verdict) {
        Ok(path) => println!("Report: {}", path.display()),
        Err(e) => eprintln!("Failed to write report: {}", e),
    }

    std::process::exit(verdict.overall.exit_code());
}
