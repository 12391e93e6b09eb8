use clap::{Parser, Subcommand};
use log::{error, info};
use std::process::ExitCode;

use upmu_receiver::config::ReceiverConfig;
use upmu_receiver::dump::{run_dump, DumpArgs};
use upmu_receiver::server::run_receiver;
use upmu_receiver::simulator::{run_simulator, SimulatorConfig};

#[derive(Debug, Parser)]
#[command(name = "upmu")]
#[command(about = "Receiver and simulator for uPMU telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Accept device connections, store frames and write CSV windows
    Serve(ReceiverConfig),
    /// Stream generated files to a receiver
    Simulate(SimulatorConfig),
    /// Decode a raw payload file
    #[command(arg_required_else_help = true)]
    Dump(DumpArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = Cli::parse();
    let result = match args.command {
        Commands::Serve(config) => {
            info!("Starting receiver");
            run_receiver(config).await
        }
        Commands::Simulate(config) => run_simulator(config).await.map(|_| ()).map_err(Into::into),
        Commands::Dump(args) => run_dump(&args, &mut std::io::stdout().lock()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
