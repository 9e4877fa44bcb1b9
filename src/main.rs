use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use log::debug;

use snapflash::config::{
    DEFAULT_CONFIG_STAGING, DEFAULT_INITIAL_SEQUENCE, DEFAULT_SNAPSHOT_DIR, DEFAULT_SNAPSHOT_STAGING,
};
use snapflash::{FileFlash, SnapshotStore, StoreConfig};

/// Config and snapshot storage on a raw flash partition.
#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// Flash partition or image file.
    #[arg(short, long, env = "SNAPFLASH_DEVICE")]
    device: PathBuf,

    /// Erase unit size of the device, in bytes.
    #[arg(short, long, env = "SNAPFLASH_ERASE_SIZE", default_value_t = 64 * 1024)]
    erase_size: u32,

    /// Staging path of the config archive.
    #[arg(long, default_value = DEFAULT_CONFIG_STAGING)]
    config_staging: PathBuf,

    /// Staging path of the snapshot archive.
    #[arg(long, default_value = DEFAULT_SNAPSHOT_STAGING)]
    snapshot_staging: PathBuf,

    /// Where chain entries are extracted to.
    #[arg(long, default_value = DEFAULT_SNAPSHOT_DIR)]
    snapshot_dir: PathBuf,

    /// Sequence assumed before the first snapshot.
    #[arg(long, default_value_t = DEFAULT_INITIAL_SEQUENCE)]
    initial_sequence: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the staged config archive (forward and sentinel copy).
    WriteConfig,
    /// Extract the current config archive to the staging path.
    ReadConfig,
    /// Append the staged snapshot archive to the chain.
    WriteSnapshot,
    /// Extract one chain entry, or all of them.
    ReadSnapshot {
        /// Erase unit of the entry.
        unit: Option<u32>,
    },
    /// Reset the bookkeeping marker at the start of the device.
    MarkDevice {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
    /// Reconcile the two config copies.
    Sync,
    /// Show the flash layout.
    Info,
}

fn run(args: Args) -> snapflash::Result<()> {
    let config = StoreConfig {
        config_staging: args.config_staging,
        snapshot_staging: args.snapshot_staging,
        snapshot_dir: args.snapshot_dir,
        initial_sequence: args.initial_sequence,
    };
    let device = FileFlash::open(&args.device, args.erase_size)?;
    let mut store = SnapshotStore::new(device, config);

    match args.command {
        Command::WriteConfig => {
            store.write_config()?;
        }
        Command::ReadConfig => {
            let path = store.read_config()?;
            eprintln!("wrote {}", path.display());
        }
        Command::WriteSnapshot => {
            let record = store.write_snapshot()?;
            eprintln!("wrote snapshot at block {}", record.unit);
        }
        Command::ReadSnapshot { unit } => {
            for path in store.read_snapshot(unit)? {
                eprintln!("extracted {}", path.display());
            }
        }
        Command::MarkDevice { yes } => {
            let confirmed = yes
                || Confirm::new()
                    .with_prompt("This will remove all snapshot data stored on the system. Are you sure?")
                    .default(false)
                    .interact()
                    .unwrap_or(false);
            if !confirmed {
                return Err(snapflash::Error::Declined);
            }
            store.mark()?;
            eprintln!("{} - marked", args.device.display());
        }
        Command::Sync => {
            let outcome = store.sync()?;
            debug!("sync: {outcome:?}");
        }
        Command::Info => {
            let layout = store.info()?;
            eprintln!("{layout}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    pretty_env_logger::init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("snapflash: {e}");
            ExitCode::FAILURE
        }
    }
}
