use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mediastore::manager::{self, ServerProfile};
use mediastore::vectordb::{Engine, EngineServer};

/// Serves the embedded vector engine over TCP.
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:1865")]
    addr: String,

    #[clap(long, default_value = "vectordb-data")]
    data_dir: PathBuf,

    /// Seconds between segment compactions; 0 disables them.
    #[clap(long, default_value = "600")]
    compaction_interval_secs: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    let profile = ServerProfile::detect();
    info!(
        cores = profile.logical_cores,
        workers = profile.worker_threads,
        strict_durability = profile.strict_durability,
        simd = %profile.simd_level,
        "host profile"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(profile.worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "could not start runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(serve(args, profile))
}

async fn serve(args: Args, profile: ServerProfile) -> ExitCode {
    let engine = match Engine::open(&args.data_dir, profile.strict_durability) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(root = %args.data_dir.display(), error = %e, "could not open engine");
            return ExitCode::FAILURE;
        }
    };

    if args.compaction_interval_secs > 0 {
        let interval = Duration::from_secs(args.compaction_interval_secs);
        if let Err(e) = manager::start_compaction_thread(engine.clone(), interval) {
            error!(error = %e, "could not start compaction thread");
            return ExitCode::FAILURE;
        }
    }

    let server = EngineServer::new(engine);
    tokio::select! {
        served = server.run(&args.addr) => match served {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(addr = %args.addr, error = %e, "server stopped");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            ExitCode::SUCCESS
        }
    }
}
