//! Command line tool cloning the icon, icon group and version resources of one executable into another.

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use log::LevelFilter;
use pesync::{ImageStore, Snapshot, SyncError, SyncOptions, SyncReport, Synchronizer, preview};

/// Clone the RT_GROUP_ICON, RT_ICON and RT_VERSION resources of one executable into another.
///
/// Without a destination, the resources of the source are listed.
#[derive(Parser, Debug)]
#[command(name = "pesync", version, about)]
struct Cli {
    /// Source executable
    source: PathBuf,

    /// Destination executable
    dest: Option<PathBuf>,

    /// Print snapshots and comparison details
    #[arg(short, long)]
    verbose: bool,

    /// Show the changes without updating the destination
    #[arg(long)]
    dry_run: bool,

    /// Remove resources from the destination that do not exist in the source
    #[arg(long)]
    remove_extra: bool,

    /// Include the version resource
    #[arg(long)]
    include_version: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", error);
            ExitCode::FAILURE
        }
    }
}

fn init_logger(verbose: bool) {
    env_logger::builder()
        .filter_level(if verbose { LevelFilter::Debug } else { LevelFilter::Warn })
        .parse_default_env()
        .format_timestamp(None)
        .format_module_path(false)
        .format_level(true)
        .format_target(false)
        .write_style(env_logger::WriteStyle::Auto)
        .init();
}

fn run(cli: &Cli) -> Result<(), SyncError> {
    let options = SyncOptions {
        remove_extra: cli.remove_extra,
        dry_run: cli.dry_run,
        ..SyncOptions::with_version(cli.include_version)
    };
    let synchronizer = Synchronizer::new(ImageStore, options);

    let Some(dest) = &cli.dest else {
        let snapshot = synchronizer.describe(&cli.source)?;
        print_snapshot(&snapshot, "resources");
        return Ok(());
    };

    let report = synchronizer.synchronize(&cli.source, dest)?;
    if cli.verbose {
        print_comparison(&report);
    }
    if cli.dry_run {
        println!("dry run");
        println!("would update with:");
        for operation in &report.plan.patch {
            println!("{}", operation);
        }
    }
    if cli.verbose {
        println!("Success!");
    }
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot, header: &str) {
    println!("{}:", header);
    for (key, data) in snapshot.iter() {
        println!("{}: {}", key, preview(data));
    }
}

fn print_comparison(report: &SyncReport) {
    print_snapshot(&report.source, "source");
    print_snapshot(&report.destination, "destination");
    println!("identical resources in source and dest:");
    for key in &report.plan.identical {
        println!("{}", key);
    }
    println!("extra resources in destination:");
    for key in &report.plan.extra {
        println!("{}", key);
    }
}
