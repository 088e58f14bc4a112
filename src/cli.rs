use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubArgs,

    #[arg(
        short = 'c',
        long = "config",
        help = "Path to the configuration file",
        value_name = "CONFIG",
        default_value = "config.toml",
        global = true
    )]
    pub config: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum SubArgs {
    /// Demultiplex completed runfolders
    #[command(name = "demultiplex")]
    Demultiplex {
        #[command(flatten)]
        args: DemultiplexArgs,
    },
    /// Upload demultiplexed runfolders and set off cloud workflows
    #[command(name = "setoff-workflows")]
    SetoffWorkflows,
    /// Delete runfolders whose data is safely in the cloud
    #[command(name = "wscleaner")]
    Wscleaner {
        #[command(flatten)]
        args: WscleanerArgs,
    },
    /// Validate a single SampleSheet
    #[command(name = "validate-samplesheet")]
    ValidateSamplesheet {
        #[command(flatten)]
        args: ValidateArgs,
    },
    /// Upload a whole runfolder to a cloud project
    #[command(name = "backup-runfolder")]
    BackupRunfolder {
        #[command(flatten)]
        args: BackupArgs,
    },
}

/// Demultiplex every candidate runfolder, or a single one by name
///
/// # Example
///
/// ```text
/// automate_demultiplex -c config.toml demultiplex
/// automate_demultiplex demultiplex 250101_A01229_0001_AXXX
/// ```
///
/// # Note
///
/// * A runfolder given by name is processed even if it is a development run
#[derive(Debug, Parser, Clone)]
pub struct DemultiplexArgs {
    #[arg(help = "Runfolder to process", value_name = "RUNFOLDER_NAME")]
    pub runfolder_name: Option<String>,
}

/// Clean up old runfolders
///
/// # Example
///
/// ```text
/// automate_demultiplex wscleaner --dry-run --min-age 14 --logfile-count 6
/// ```
///
/// # Arguments
///
/// * `dry_run` - Log the runfolders that would be deleted without deleting them
/// * `min_age` - Minimum runfolder age in days, defaults to the config value
/// * `logfile_count` - Expected logfiles in the cloud project, defaults to the config value
#[derive(Debug, Parser, Clone)]
pub struct WscleanerArgs {
    #[arg(long = "dry-run", help = "Do not delete anything")]
    pub dry_run: bool,

    #[arg(long = "min-age", help = "Minimum runfolder age in days", value_name = "DAYS")]
    pub min_age: Option<u64>,

    #[arg(
        long = "logfile-count",
        help = "Expected number of logfiles in the cloud project",
        value_name = "N"
    )]
    pub logfile_count: Option<usize>,
}

#[derive(Debug, Parser, Clone)]
pub struct ValidateArgs {
    #[arg(
        short = 's',
        long = "samplesheet",
        help = "Path to the SampleSheet",
        value_name = "SAMPLESHEET",
        required = true
    )]
    pub samplesheet: PathBuf,

    #[arg(
        short = 'r',
        long = "runfolder",
        help = "Runfolder the SampleSheet belongs to",
        value_name = "RUNFOLDER",
        required = true
    )]
    pub runfolder: String,
}

/// Back up a runfolder
///
/// # Example
///
/// ```text
/// automate_demultiplex backup-runfolder -r 250101_A01229_0001_AXXX -p project-123 --ignore /L00
/// ```
///
/// # Note
///
/// * Without `-a` the auth token is read from the credentials file
/// * Without `-p` the project is looked up by runfolder name
#[derive(Debug, Parser, Clone)]
pub struct BackupArgs {
    #[arg(
        short = 'r',
        long = "runfolder",
        help = "Runfolder name",
        value_name = "RUNFOLDER",
        required = true
    )]
    pub runfolder: String,

    #[arg(short = 'a', long = "auth-token", help = "Cloud auth token", value_name = "TOKEN")]
    pub auth_token: Option<String>,

    #[arg(
        long = "ignore",
        help = "Comma-separated substrings of paths to skip",
        value_name = "PATTERNS"
    )]
    pub ignore: Option<String>,

    #[arg(short = 'p', long = "project", help = "Cloud project id", value_name = "PROJECT")]
    pub project_id: Option<String>,
}
