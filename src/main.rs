use apiscope::configuration::config::{CliArgs, Config};
use apiscope::controller::controller_handler::{CaptureMode, Controller};
use clap::Parser;
use log::{error, info};

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    println!(
        "
 █████╗ ██████╗ ██╗███████╗ ██████╗ ██████╗ ██████╗ ███████╗
██╔══██╗██╔══██╗██║██╔════╝██╔════╝██╔═══██╗██╔══██╗██╔════╝
███████║██████╔╝██║███████╗██║     ██║   ██║██████╔╝█████╗
██╔══██║██╔═══╝ ██║╚════██║██║     ██║   ██║██╔═══╝ ██╔══╝
██║  ██║██║     ██║███████║╚██████╗╚██████╔╝██║     ███████╗
╚═╝  ╚═╝╚═╝     ╚═╝╚══════╝ ╚═════╝ ╚═════╝ ╚═╝     ╚══════╝
=============================================================
        Passive HTTP endpoint discovery v{}
=============================================================
",
        env!("CARGO_PKG_VERSION")
    );

    let args = CliArgs::parse();

    info!("Importing configuration from {}", args.config_file.display());
    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_args(&args);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let mode = match args.pcap {
        Some(path) => CaptureMode::Replay(path),
        None => CaptureMode::Live,
    };

    let controller = match Controller::new(config, mode) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    match controller.run().await {
        Ok(report) => info!(
            "Done: {} exchanges recorded, {} endpoints discovered",
            report.written, report.endpoints
        ),
        Err(e) => {
            error!("Error occured in the controller process: {}, exiting...", e);
            std::process::exit(1);
        }
    }
}
