use anyhow::bail;
use clap::Parser;
use log::{error, info, Level};
use simple_logger::init_with_level;

use automate_demultiplex::{
    cli::{Args, BackupArgs, SubArgs, ValidateArgs, WscleanerArgs},
    config::Config,
    consts::*,
    core::{
        backup::UaCaller,
        cloud::{CloudClient, DxCli},
        emails::SmtpMailer,
        GetRunfolders, RunfolderCleaner, SequencingRuns,
    },
    errors::AutomationError,
    samplesheet::SamplesheetCheck,
    toolbox::{get_credential, git_tag, test_upload_software, timestamp, RunfolderObject},
};

fn main() {
    let start = std::time::Instant::now();
    if let Err(e) = init_with_level(Level::Info) {
        eprintln!("ERROR: could not initialise logging: {}", e);
    }

    let args: Args = Args::parse();

    if let Err(e) = run(args) {
        error!("ERROR: {:?}", e);
        std::process::exit(1);
    }

    let elapsed = start.elapsed();
    info!("Elapsed time: {:.3?}", elapsed);
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::read(&args.config)?;
    info!(
        "INFO: automate_demultiplex {} with config {}",
        git_tag(&config.paths.document_root),
        args.config.display()
    );

    match args.command {
        SubArgs::Demultiplex { args } => {
            GetRunfolders::new(&config).setoff_processing(args.runfolder_name.as_deref())?;
        }
        SubArgs::SetoffWorkflows => {
            let auth = get_credential(&config.credentials.dnanexus_authtoken)?;
            let password = get_credential(&config.credentials.email_password)?;
            let cloud = DxCli::new(&config, &auth);
            let mailer = SmtpMailer::new(&config, &password);
            SequencingRuns::new(&config, &auth, &cloud, &mailer).setoff_processing()?;
        }
        SubArgs::Wscleaner { args } => wscleaner(&config, args)?,
        SubArgs::ValidateSamplesheet { args } => validate_samplesheet(&config, args)?,
        SubArgs::BackupRunfolder { args } => backup_runfolder(&config, args)?,
    }

    Ok(())
}

fn wscleaner(config: &Config, args: WscleanerArgs) -> anyhow::Result<()> {
    let auth = get_credential(&config.credentials.dnanexus_authtoken)?;
    let cloud = DxCli::new(config, &auth);
    let report = RunfolderCleaner::new(
        config,
        &cloud,
        args.dry_run,
        args.min_age.unwrap_or(config.wscleaner.min_age_days),
        args.logfile_count.unwrap_or(config.wscleaner.logfile_count),
    )
    .run()?;

    info!(
        "INFO: {} runfolders passed cleanup checks, {} deleted",
        report.candidates.len(),
        report.deleted.len()
    );
    Ok(())
}

fn validate_samplesheet(config: &Config, args: ValidateArgs) -> anyhow::Result<()> {
    let rf = RunfolderObject::new(&args.runfolder, config, &timestamp());
    let mut logger = rf.logger(SAMPLESHEET_VALIDATOR, &rf.samplesheet_log);
    let report = SamplesheetCheck::new(&args.samplesheet, config).validate(&logger);
    logger.shutdown();

    for (kind, errors) in &report.errors {
        for e in errors {
            info!("{}: {}", kind, e);
        }
    }
    if report.has_disallowed_errors() {
        bail!(
            "SampleSheet {} has errors that prevent demultiplexing",
            args.samplesheet.display()
        );
    }
    info!(
        "INFO: {} samples, tso={}, development run={}",
        report.samples.len(),
        report.tso,
        report.dev_run
    );
    Ok(())
}

fn backup_runfolder(config: &Config, args: BackupArgs) -> anyhow::Result<()> {
    let auth = match args.auth_token {
        Some(token) => token,
        None => get_credential(&config.credentials.dnanexus_authtoken)?,
    };
    let cloud = DxCli::new(config, &auth);
    let rf = RunfolderObject::new(&args.runfolder, config, &timestamp());
    let mut logger = rf.logger(BACKUP_RUNFOLDER, &rf.backup_log);

    if !test_upload_software(config, &logger)? {
        return Err(AutomationError::MissingBinary {
            cmd: config.dnanexus.test_upload_agent_cmd.clone(),
        }
        .into());
    }

    let project_id = match args.project_id {
        Some(id) => id,
        None => {
            let projects = cloud.find_projects(&args.runfolder)?;
            match projects.as_slice() {
                [project] => project.id.clone(),
                _ => bail!(
                    "Expected one cloud project for {}, found {}",
                    args.runfolder,
                    projects.len()
                ),
            }
        }
    };
    let project_name = cloud.project_name(&project_id)?;

    let summary = UaCaller::new(config, &auth, &project_id, &project_name, args.ignore.as_deref())
        .backup(&rf.runfolderpath, &logger, Some(&cloud))?;
    logger.shutdown();

    info!("INFO: backup of {} finished: {:?}", args.runfolder, summary);
    if summary.failed_batches > 0 {
        bail!("{} upload batches failed", summary.failed_batches);
    }
    Ok(())
}
