use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(about = "Captures rotating previews of scenes and delivers them to remote storage.")]
pub struct CLIArgs {
    #[arg(
        long = "logFile",
        global = true,
        help = "Also write logs (without colors) to this file."
    )]
    pub log_file_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CLICommand,
}

#[derive(Subcommand)]
pub enum CLICommand {
    #[command(name = "run", about = "Capture and deliver one page of items.")]
    Run(RunBatch),

    #[command(
        name = "build-ids",
        about = "Build a sorted JSON list of item IDs from a timestamped log."
    )]
    BuildIds(BuildIds),
}

#[derive(Args, Eq, PartialEq)]
pub struct RunBatch {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to the TOML configuration file."
    )]
    pub configuration_file_path: PathBuf,

    #[arg(long = "page", help = "Overrides the page set in the configuration file.")]
    pub page: Option<usize>,

    #[arg(long = "size", help = "Overrides the page size set in the configuration file.")]
    pub size: Option<usize>,

    #[arg(
        long = "dryRun",
        help = "Capture as usual, but keep artifacts in memory instead of uploading them."
    )]
    pub dry_run: bool,
}

#[derive(Args, Eq, PartialEq)]
pub struct BuildIds {
    #[arg(short = 'i', long = "input", help = "Log file to read IDs from.")]
    pub input_path: PathBuf,

    #[arg(short = 'o', long = "output", help = "Where to write the JSON list of IDs.")]
    pub output_path: PathBuf,
}
