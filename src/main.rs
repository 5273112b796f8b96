use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use visual_harness::config::Config;
use visual_harness::{
    HttpBackend, Orchestrator, Outcome, RunPlan, Step, TestIdentity, Verdict, WebDriverProvider,
    write_report,
};

/// Visual Harness - visual regression testing against a visual-diff backend
#[derive(Parser, Debug)]
#[command(
    name = "visual-harness",
    about = "Drive a browser to a page and check it against visual baselines",
    after_help = "ENVIRONMENT VARIABLES:\n\
        VISUAL_HARNESS_API_KEY         Visual backend API key\n\
        VISUAL_HARNESS_SERVER_URL      Visual backend base URL\n\
        VISUAL_HARNESS_WEBDRIVER_URL   WebDriver endpoint\n\
        VISUAL_HARNESS_TIMEOUT         Per-call timeout (seconds)\n\
        VISUAL_HARNESS_REPORT_DIR      Directory for verdict reports\n\
        RUST_LOG                       Log filter (default: info)\n\
        \n\
        EXIT CODES:\n\
        0 PASS, 1 FAIL, 2 ERROR"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Where the plan comes from
#[derive(clap::Args, Debug)]
struct PlanArgs {
    /// JSON plan file; overrides --app, --test, --url and --checkpoint
    #[arg(short, long)]
    plan: Option<PathBuf>,

    /// Application name
    #[arg(long, env = "VISUAL_HARNESS_APP_NAME")]
    app: Option<String>,

    /// Test name
    #[arg(long, env = "VISUAL_HARNESS_TEST_NAME")]
    test: Option<String>,

    /// Page to load before the checkpoints
    #[arg(short, long, env = "VISUAL_HARNESS_TARGET_URL")]
    url: Option<String>,

    /// Checkpoint labels, captured in order (default: the test name)
    #[arg(short, long = "checkpoint")]
    checkpoints: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a plan and report its verdict
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Visual backend base URL
        #[arg(long, env = "VISUAL_HARNESS_SERVER_URL")]
        server_url: Option<String>,

        /// Visual backend API key
        #[arg(long, env = "VISUAL_HARNESS_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// WebDriver endpoint
        #[arg(long, env = "VISUAL_HARNESS_WEBDRIVER_URL")]
        webdriver_url: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Count NEW checkpoints as passing (true/false)
        #[arg(long, env = "VISUAL_HARNESS_ACCEPT_NEW", default_value_t = true, action = clap::ArgAction::Set)]
        accept_new: bool,

        /// Directory for the verdict report
        #[arg(long, env = "VISUAL_HARNESS_REPORT_DIR")]
        report_dir: Option<PathBuf>,

        /// Skip writing the verdict report
        #[arg(long)]
        no_report: bool,

        /// Output the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a plan without starting a browser
    Validate {
        #[command(flatten)]
        plan: PlanArgs,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            plan,
            server_url,
            api_key,
            webdriver_url,
            headed,
            accept_new,
            report_dir,
            no_report,
            json,
        }) => {
            let mut config = Config::from_env();
            if let Some(server_url) = server_url {
                config.backend.server_url = server_url;
            }
            if let Some(api_key) = api_key {
                config.backend.api_key = api_key;
            }
            if let Some(webdriver_url) = webdriver_url {
                config.browser.webdriver_url = webdriver_url;
            }
            if headed {
                config.browser.headless = false;
            }
            if let Some(dir) = report_dir {
                config.report_dir = dir;
            }
            config.run.accept_new = accept_new;

            let plan = build_plan(&plan, &config)?;
            config.validate()?;

            let provider = Arc::new(WebDriverProvider::new(&config.browser.webdriver_url)?);
            let backend = Arc::new(HttpBackend::new(
                &config.backend.server_url,
                &config.backend.api_key,
            )?);
            let orchestrator = Orchestrator::new(provider, backend, config.harness_config());

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, closing sessions");
                    on_signal.cancel();
                }
            });

            let (verdict, cancelled) = match orchestrator.run_until_cancelled(&plan, &cancel).await {
                Ok(verdict) => (verdict, false),
                Err(cancelled) => (cancelled.partial, true),
            };

            if !no_report {
                match write_report(&config.report_dir, &verdict) {
                    Ok(path) => info!(path = %path.display(), "Verdict report written"),
                    Err(e) => warn!(error = %e, "Failed to write verdict report"),
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                print_verdict(&verdict);
                if cancelled {
                    println!("Run was cancelled.");
                }
            }

            let code = if cancelled {
                Outcome::Error.exit_code()
            } else {
                verdict.overall.exit_code()
            };
            std::process::exit(code);
        }

        Some(Commands::Validate { plan }) => {
            let config = Config::from_env();
            let plan = build_plan(&plan, &config)?;
            println!("Plan OK: {} ({} steps)", plan.identity(), plan.steps().len());
            for (index, step) in plan.steps().iter().enumerate() {
                match step {
                    Step::Navigate(url) => println!("  {}. navigate {}", index + 1, url),
                    Step::Checkpoint(label) => println!("  {}. checkpoint \"{}\"", index + 1, label),
                }
            }
        }

        None => {
            println!("Visual Harness - visual regression testing against a visual-diff backend");
            println!();
            println!("Usage: visual-harness <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run       Run a plan and report its verdict");
            println!("  validate  Validate a plan without starting a browser");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

/// Build the plan from a plan file, or from flags with config fallbacks
fn build_plan(args: &PlanArgs, config: &Config) -> Result<RunPlan, Box<dyn Error>> {
    if let Some(path) = &args.plan {
        return Ok(RunPlan::load(path)?);
    }

    let app = args.app.clone().unwrap_or_else(|| config.target.app_name.clone());
    let test = args.test.clone().unwrap_or_else(|| config.target.test_name.clone());
    let url = args.url.clone().unwrap_or_else(|| config.target.url.clone());

    let labels = if args.checkpoints.is_empty() {
        vec![test.clone()]
    } else {
        args.checkpoints.clone()
    };

    let mut steps = vec![Step::navigate(url)];
    steps.extend(labels.into_iter().map(Step::checkpoint));

    Ok(RunPlan::new(TestIdentity::new(app, test)?, steps)?)
}

fn print_verdict(verdict: &Verdict) {
    println!(
        "{}/{}: {} ({} ms)",
        verdict.app_name,
        verdict.test_name,
        verdict.overall,
        verdict.duration_ms()
    );
    for result in &verdict.results {
        match &result.detail {
            Some(detail) => println!("  {:<9} {} ({})", result.status.to_string(), result.label, detail),
            None => println!("  {:<9} {}", result.status.to_string(), result.label),
        }
    }
    if let Some(error) = &verdict.error {
        println!("Error: {}", error);
    }
}
