use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use benchup_bench_runner::{run_library_refresh, run_reconciliation, DesiredFleet, RealBench};
use benchup_config::{CommonSiteConfig, Settings};
use benchup_fleet_config::FleetConfig;
use benchup_service_gate::{wait_until_ready, MariaDbProbe, RedisProbe, WaitOptions};

#[derive(Parser)]
#[command(
    name = "benchup",
    version,
    about = "Converges a Frappe bench onto its declared fleet of sites"
)]
struct Cli {
    /// Path to the fleet document (overrides INSTANCE_JSON_SOURCE)
    #[arg(long)]
    instance_config: Option<PathBuf>,

    /// Path to the shared site config (overrides COMMON_CONFIG_SOURCE)
    #[arg(long)]
    common_config: Option<PathBuf>,

    /// Runtime home directory (overrides FRAPPE_HOME)
    #[arg(long)]
    frappe_home: Option<PathBuf>,

    /// Do not wait for the database and redis services
    #[arg(long)]
    no_wait: bool,

    /// Print a line per service probe retry
    #[arg(long)]
    verbose: bool,

    /// Skip the module library refresh after reconciling
    #[arg(long)]
    skip_refresh: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(path) = cli.instance_config {
        settings.instance_config = path;
    }
    if let Some(path) = cli.common_config {
        settings.common_config = path;
    }
    if let Some(path) = cli.frappe_home {
        settings.frappe_home = path;
    }

    let fleet_config = FleetConfig::load(&settings.instance_config)?;
    let services = CommonSiteConfig::load(&settings.common_config)?;

    println!(
        "benchup: {} deployment, {} declared site(s)",
        fleet_config.deployment,
        fleet_config.instance_sites.len()
    );

    let verbose = cli.verbose || settings.probe_verbose;

    let db_wait = WaitOptions::new(settings.wait_for_db && !cli.no_wait, verbose);
    let db_probe = MariaDbProbe::new(
        settings.db.host.clone(),
        settings.db.port.clone(),
        settings.db.user.clone(),
        settings.db.password.clone(),
    );
    wait_until_ready(&db_probe, &db_wait).await;

    let redis_wait = WaitOptions::new(settings.wait_for_redis && !cli.no_wait, verbose);
    for endpoint in services.redis_endpoints() {
        let probe = RedisProbe::from_url(endpoint)?;
        wait_until_ready(&probe, &redis_wait).await;
    }

    let bench = RealBench::from_settings(&settings);
    if !bench.is_initialized() {
        println!(
            "Initializing runtime on branch {}. This can take a while.",
            fleet_config.frappe_branch
        );
        bench.init_runtime(&fleet_config.frappe_branch).await?;
    } else {
        // A fresh init writes its own shared config; only an existing bench
        // picks up the mounted one.
        bench.sync_common_config().await?;
    }

    let fleet = DesiredFleet::from_config(&fleet_config);
    let report = run_reconciliation(&bench, &fleet).await?;

    let refresh_ok = if cli.skip_refresh {
        true
    } else {
        run_library_refresh(&bench, &fleet).await.ok()
    };

    if report.ok() && refresh_ok {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
