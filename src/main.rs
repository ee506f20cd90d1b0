//! noclist-watch: keeps the workbook cache warm and prints every update.

use clap::Parser;
use noclist_lib::config::{ExcelConfig, DATA_DIR_ENV};
use noclist_lib::excel::{write_sample_workbooks, ChannelSink, ExcelManager, ExcelResult, UiMessage};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "noclist-watch", version, about = "Watch the NOC list workbooks and report changes")]
struct Cli {
    /// Directory holding groups.xlsx and contacts.xlsx
    #[arg(long, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write sample workbooks into the data directory before watching
    #[arg(long)]
    init_samples: bool,

    /// Replace existing workbooks when writing samples
    #[arg(long, requires = "init_samples")]
    overwrite: bool,

    /// Verbosity (-v debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    noclist_lib::logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ExcelResult<()> {
    let mut config = ExcelConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    if cli.init_samples {
        let written = write_sample_workbooks(&config.data_dir, cli.overwrite)?;
        for path in &written {
            info!("Wrote sample workbook: {}", path.display());
        }
    }

    let manager = ExcelManager::new(config);
    let (sink, mut updates) = ChannelSink::channel();
    manager.attach_ui(Arc::new(sink));

    let paths = manager.cache().paths();
    info!(
        "Watching {} and {}",
        paths.groups_path.display(),
        paths.contacts_path.display()
    );
    let _cleanup = manager.start().await;

    loop {
        tokio::select! {
            message = updates.recv() => match message {
                Some(UiMessage::DataUpdated(snapshot)) => info!(
                    groups = snapshot.email_data.len(),
                    contacts = snapshot.contact_data.len(),
                    "Excel data updated"
                ),
                Some(UiMessage::WatchError(message)) => error!("Excel watch stopped: {}", message),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    manager.close_watcher();
    Ok(())
}
