use anyhow::Context;
use clap::Parser;
use gui_bridge::bridge::{default_bind_address, TelemetryBridge};
use gui_bridge::model::VisualizationModel;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod gui_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Synthetic ride driver for the surface mapping pipeline")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 3000)]
    ticks: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Remote upload endpoint; without one every batch is backed up locally
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    backup_dir: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Pace ticks at the ride's capture interval
    #[arg(long, default_value_t = false)]
    realtime: bool,
    /// Serve the live ride over HTTP until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long, default_value_t = default_bind_address())]
    bind: SocketAddr,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(args.ticks, args.seed)
    };
    if args.endpoint.is_some() {
        workflow_config.pipeline.upload.endpoint = args.endpoint.clone();
    }
    if let Some(dir) = &args.backup_dir {
        workflow_config.pipeline.storage.backup_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        workflow_config.output_dir = Some(dir.clone());
    }
    workflow_config.realtime |= args.realtime;

    let stop = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(stop.clone());

    let bridge = args.serve.then(|| TelemetryBridge::new(args.bind));
    if let Some(bridge) = &bridge {
        bridge.publish_status(&format!("HTTP bridge listening on {}", args.bind));
    }

    let runner = Runner::new(workflow_config.clone());
    let result = runner.execute(&stop, |session| {
        if let Some(bridge) = &bridge {
            bridge.publish(VisualizationModel::from_session(session));
        }
    })?;

    let snapshot = &result.snapshot;
    println!(
        "Ride -> frames {}, distance {:.1} m, segments {}, clusters {}, delivered {}, backed up {}",
        snapshot.frames,
        snapshot.distance_m,
        snapshot.segments,
        snapshot.clusters,
        result.flush.delivered_events,
        result.flush.backed_up_events
    );
    println!(
        "Artifacts -> {} , {}",
        result.route_path.display(),
        result.damages_path.display()
    );

    let report = format!(
        "frames={} distance_m={:.1} segments={} clusters={} delivered={} backed_up={} retained={} degraded={} interrupted={}\n",
        snapshot.frames,
        snapshot.distance_m,
        snapshot.segments,
        snapshot.clusters,
        result.flush.delivered_events,
        result.flush.backed_up_events,
        result.flush.retained_events,
        result.flush.degraded,
        result.interrupted
    );
    let report_path = workflow_config.output_dir().join("ride_summary.log");
    if let Some(parent) = report_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&report_path)
        .with_context(|| format!("opening {}", report_path.display()))?;
    file.write_all(report.as_bytes())?;

    if let Some(bridge) = &bridge {
        if !result.interrupted {
            bridge.publish_status("Ride finished; serving final state (Ctrl+C to stop)...");
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }
    }

    Ok(())
}

/// Raises `stop` on Ctrl+C so the capture loop can exit and flush.
fn spawn_interrupt_watcher(stop: Arc<AtomicBool>) {
    thread::spawn(move || {
        let runtime = match TokioBuilder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("creating runtime for signal handling: {err}");
                return;
            }
        };
        runtime.block_on(async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("awaiting Ctrl+C: {err}");
                return;
            }
            log::info!("interrupt received, finishing ride");
            stop.store(true, Ordering::SeqCst);
        });
    });
}
