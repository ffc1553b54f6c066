use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use backhaul_sleep::api::topology_dto::TopologyDto;
use backhaul_sleep::domain::clock::clock::{SharedClock, SlotClock};
use backhaul_sleep::domain::config::EngineConfig;
use backhaul_sleep::domain::dispatch::control_plane::ControlPlane;
use backhaul_sleep::domain::dispatch::emulated_control_plane::EmulatedControlPlane;
use backhaul_sleep::domain::dispatch::ryu_control_plane::{RyuControlPlane, reference_backhaul_capacity, topology_from_controller};
use backhaul_sleep::domain::energy_manager::EnergyManager;
use backhaul_sleep::domain::forecast::csv_source::CsvReplayForecastSource;
use backhaul_sleep::domain::forecast::forecast::{ForecastSource, capacities_of};
use backhaul_sleep::domain::forecast::http_source::HttpForecastSource;
use backhaul_sleep::domain::metrics::metrics_log::MetricsLog;
use backhaul_sleep::domain::topology::network_topology::NetworkTopology;
use backhaul_sleep::loader::parser::load_config_file;
use backhaul_sleep::{load_network, logger};

#[derive(Parser)]
#[command(name = "energy_manager")]
#[command(about = "Predictive sleep/wake control of backhaul links", long_about = None)]
struct Args {
    /// Topology description (JSON). Without it the topology is discovered from the controller.
    #[arg(short, long)]
    topology: Option<PathBuf>,

    /// Engine configuration (JSON); unset fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the predictor service
    #[arg(long, conflicts_with = "forecast_csv")]
    forecast_url: Option<String>,

    /// Replay forecasts from a traffic CSV instead of querying a predictor
    #[arg(long)]
    forecast_csv: Option<PathBuf>,

    /// Base URL of the Ryu controller REST API. Without it actions go to an emulated control plane.
    #[arg(long)]
    controller_url: Option<String>,

    /// Number of slots to run (default: until Ctrl-C)
    #[arg(short, long)]
    slots: Option<u64>,

    /// Where the sleep plan is written
    #[arg(long, default_value = "output/sleep_plan.json")]
    plan_out: PathBuf,

    /// Where the energy metrics table is written
    #[arg(long, default_value = "output/energy_metrics.csv")]
    metrics_out: PathBuf,

    /// Directory for the log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(&args.log_dir);

    let (topology, config, control_plane) = setup_network(&args).await?;
    let clock: SharedClock = Arc::new(SlotClock::starting_now(config.slot_width_s));
    let source = forecast_source(&args, &topology, clock.clone())?;
    let metrics_log = MetricsLog::init(Some(args.metrics_out.clone())).context("cannot open metrics output")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Ctrl-C received; finishing the current slot and shutting down.");
            ctrl_c.cancel();
        }
    });

    let mut manager = EnergyManager::new(config, topology, source, control_plane, clock)
        .with_plan_output(args.plan_out.clone())
        .with_metrics_log(metrics_log);

    let totals = manager.run(args.slots, cancel).await?;
    log::info!("Done: {} slots processed, {:.1}% energy saved.", totals.slots, totals.savings_ratio() * 100.0);

    Ok(())
}

async fn setup_network(args: &Args) -> anyhow::Result<(NetworkTopology, EngineConfig, Arc<dyn ControlPlane>)> {
    match (&args.topology, &args.controller_url) {
        (Some(topology_path), controller_url) => {
            let (topology, config) = load_network(topology_path, args.config.as_ref())?;
            let control_plane: Arc<dyn ControlPlane> = match controller_url {
                Some(url) => {
                    let (plane, _) = RyuControlPlane::discover(url).await.context("controller discovery failed")?;
                    Arc::new(plane)
                }
                None => {
                    log::info!("No controller URL given; using the emulated control plane.");
                    Arc::new(EmulatedControlPlane::from_topology(&topology))
                }
            };
            Ok((topology, config, control_plane))
        }
        (None, Some(url)) => {
            let (plane, controller_topology) = RyuControlPlane::discover(url).await.context("controller discovery failed")?;
            let dto: TopologyDto = topology_from_controller(&controller_topology, reference_backhaul_capacity);
            let topology = NetworkTopology::try_from(dto)?;
            let config = match &args.config {
                Some(path) => load_config_file(path)?,
                None => EngineConfig::default(),
            };
            Ok((topology, config, Arc::new(plane)))
        }
        (None, None) => bail!("either --topology or --controller-url is required"),
    }
}

fn forecast_source(args: &Args, topology: &NetworkTopology, clock: SharedClock) -> anyhow::Result<Arc<dyn ForecastSource>> {
    let capacities = capacities_of(topology);

    if let Some(url) = &args.forecast_url {
        log::info!("Querying forecasts from {}", url);
        return Ok(Arc::new(HttpForecastSource::new(url, capacities, clock)?));
    }

    if let Some(path) = &args.forecast_csv {
        let source = CsvReplayForecastSource::from_path(path, capacities, clock)?;
        log::info!("Replaying {} hours of traffic from {}", source.hour_count(), path.display());
        return Ok(Arc::new(source));
    }

    bail!("either --forecast-url or --forecast-csv is required")
}
