use std::collections::HashSet;

use crate::config::{render, Config};
use crate::consts::*;
use crate::errors::AutomationError;
use crate::executor::runner::execute_with_stderr_to;
use crate::executor::{execute_subprocess_command, OnFail};
use crate::logger::AdLogger;
use crate::samplesheet::SamplesheetCheck;
use crate::toolbox::{
    create_sentinel, get_runfolder_names, read_lines, timestamp, write_lines, RunfolderObject,
    WriteMode,
};

/// Where a single demultiplex attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemultiplexOutcome {
    /// Not ready or not allowed yet; nothing written except integrity markers
    Skipped(String),
    /// Development run found by directory scan; empty sentinel written
    DevelopmentRun,
    /// TSO run; sentinel holds the TSO marker and the converter was not run
    TsoSkipped,
    Demultiplexed,
}

/// Demultiplex entry point: finds runfolders and sets off each one.
///
/// # Example
///
/// ```rust,ignore
/// let mut runs = GetRunfolders::new(&config);
/// let processed = runs.setoff_processing(None)?;
/// ```
pub struct GetRunfolders<'a> {
    config: &'a Config,
    timestamp: String,
    processed: HashSet<String>,
}

impl<'a> GetRunfolders<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            timestamp: timestamp(),
            processed: HashSet::new(),
        }
    }

    /// Check the converter can be called at all.
    fn preflight(&self) -> anyhow::Result<()> {
        let logger = AdLogger::console(DEMULTIPLEX, &self.timestamp);
        let cmd = &self.config.demultiplex.test_bcl2fastq_cmd;
        let out = execute_subprocess_command(cmd, &logger, OnFail::Continue)?;
        if !out.success() {
            return Err(AutomationError::MissingBinary { cmd: cmd.clone() }.into());
        }
        Ok(())
    }

    /// Process every candidate runfolder, or only `runfolder` when given.
    ///
    /// A runfolder passed by name is in manual mode: development runs are
    /// demultiplexed instead of being parked.
    ///
    /// # Errors
    ///
    /// Fatal per-runfolder failures (sentinel creation, cluster density,
    /// converter) stop the cycle and propagate.
    pub fn setoff_processing(&mut self, runfolder: Option<&str>) -> anyhow::Result<Vec<String>> {
        self.preflight()?;

        let (candidates, manual) = match runfolder {
            Some(name) => (vec![name.to_string()], true),
            None => (get_runfolder_names(self.config)?, false),
        };

        let mut demultiplexed = Vec::new();
        for name in candidates {
            if self.processed.contains(&name) {
                continue;
            }

            let rf = RunfolderObject::new(&name, self.config, &self.timestamp);
            if !rf.runfolderpath.is_dir() {
                log::warn!("WARN: runfolder {} does not exist", rf.runfolderpath.display());
                continue;
            }
            if rf.bcl2fastqlog_file.exists() {
                log::debug!("{} already has {}", name, BCL2FASTQ_OUTPUT);
                continue;
            }

            let outcome = DemultiplexRunfolder::new(&rf, self.config, manual).setoff_workflow()?;
            log::info!("INFO: {} -> {:?}", name, outcome);
            self.processed.insert(name.clone());
            if outcome == DemultiplexOutcome::Demultiplexed || outcome == DemultiplexOutcome::TsoSkipped {
                demultiplexed.push(name);
            }
        }

        log::info!("INFO: runfolders set off this cycle: {:?}", demultiplexed);
        Ok(demultiplexed)
    }
}

/// One demultiplex attempt for one runfolder
pub struct DemultiplexRunfolder<'a> {
    rf: &'a RunfolderObject,
    config: &'a Config,
    manual: bool,
    logger: AdLogger,
    ss_logger: AdLogger,
}

impl<'a> DemultiplexRunfolder<'a> {
    pub fn new(rf: &'a RunfolderObject, config: &'a Config, manual: bool) -> Self {
        let fail = format!("DEMULTIPLEX FAIL: {}", rf.runfolder_name);
        Self {
            logger: rf
                .logger(DEMULTIPLEX, &rf.demultiplex_log)
                .with_flags(&[("fail", fail.as_str())]),
            ss_logger: rf.logger(SAMPLESHEET_VALIDATOR, &rf.samplesheet_log),
            rf,
            config,
            manual,
        }
    }

    /// Run the demultiplex gates in order and, if all pass, the converter.
    ///
    /// The sentinel is always created before any converter or metrics
    /// command runs.
    pub fn setoff_workflow(&mut self) -> anyhow::Result<DemultiplexOutcome> {
        let outcome = self.run_gates();
        self.logger.shutdown();
        self.ss_logger.shutdown();
        outcome
    }

    fn run_gates(&self) -> anyhow::Result<DemultiplexOutcome> {
        let rf = self.rf;
        let report = SamplesheetCheck::new(&rf.samplesheet_path, self.config).validate(&self.ss_logger);

        if !rf.rtacompletefile.exists() {
            self.logger.info(format!(
                "{} not present. Sequencing not complete",
                rf.rtacompletefile.display()
            ));
            return Ok(DemultiplexOutcome::Skipped("sequencing not complete".into()));
        }

        if !self.integrity_check()? {
            return Ok(DemultiplexOutcome::Skipped("integrity check".into()));
        }

        if report.dev_run && !self.manual {
            create_sentinel::<&str>(&rf.bcl2fastqlog_file, &[])?;
            self.logger.warning(format!(
                "Development run {} will not be demultiplexed automatically. Run demultiplex with the runfolder name to process it",
                rf.runfolder_name
            ));
            return Ok(DemultiplexOutcome::DevelopmentRun);
        }

        if report.has_disallowed_errors() {
            let kinds: Vec<&str> = report.disallowed_errors().iter().map(|k| k.as_str()).collect();
            self.logger.error(self.logger.msg(
                "ss_errors",
                &[&rf.samplesheet_path.display(), &kinds.join(", ")],
            ));
            return Ok(DemultiplexOutcome::Skipped("samplesheet errors".into()));
        }

        let first_line: &[&str] = if report.dev_run { &[DEV_MANUAL_MARKER] } else { &[] };
        if let Err(e) = create_sentinel(&rf.bcl2fastqlog_file, first_line) {
            self.logger.error(self.logger.msg(
                "sentinel_fail",
                &[&rf.bcl2fastqlog_file.display(), &e],
            ));
            return Err(e.into());
        }
        self.logger
            .info(self.logger.msg("sentinel_created", &[&rf.bcl2fastqlog_file.display()]));

        self.calculate_cluster_density()?;

        if report.tso {
            write_lines(
                &rf.bcl2fastqlog_file,
                WriteMode::Append,
                &[self.config.demultiplex.tso_skip_marker.as_str()],
            )?;
            self.logger.info(format!(
                "{} is a TSO run. Demultiplexing happens in the cloud",
                rf.runfolder_name
            ));
            return Ok(DemultiplexOutcome::TsoSkipped);
        }

        self.run_converter()?;
        Ok(DemultiplexOutcome::Demultiplexed)
    }

    /// True if demultiplexing may proceed.
    ///
    /// The completion marker is appended before the match marker is checked,
    /// so a failed check is never repeated automatically.
    fn integrity_check(&self) -> anyhow::Result<bool> {
        let rf = self.rf;
        let settings = &self.config.demultiplex;

        if !self.config.general.seq_require_ic.contains(&rf.sequencer_id) {
            return Ok(true);
        }

        if !rf.checksumfile.exists() {
            self.logger.info(format!(
                "{} not present. Integrity check not yet performed",
                rf.checksumfile.display()
            ));
            return Ok(false);
        }

        let lines = read_lines(&rf.checksumfile)?;
        if lines
            .last()
            .is_some_and(|line| line.contains(&settings.checksum_complete))
        {
            self.logger.info(format!(
                "Integrity check for {} already assessed",
                rf.runfolder_name
            ));
            return Ok(false);
        }

        write_lines(
            &rf.checksumfile,
            WriteMode::Append,
            &[settings.checksum_complete.as_str()],
        )?;

        if lines
            .first()
            .is_some_and(|line| line.contains(&settings.checksum_match))
        {
            self.logger.info(format!("Integrity check passed for {}", rf.runfolder_name));
            Ok(true)
        } else {
            self.logger.error(format!(
                "{} Integrity check failed for {}. Demultiplexing will not proceed",
                self.logger.flag("fail"),
                rf.runfolder_name
            ));
            Ok(false)
        }
    }

    fn calculate_cluster_density(&self) -> anyhow::Result<()> {
        let rf = self.rf;
        let novaseq_flag = if self.config.is_novaseq(&rf.runfolder_name) {
            NOVASEQ_FLAG
        } else {
            ""
        };
        let runfolderpath = rf.runfolderpath.to_string_lossy();
        let cmd = render(
            &self.config.demultiplex.cluster_density_cmd,
            &[
                ("runfolderpath", runfolderpath.as_ref()),
                ("runfolder_name", rf.runfolder_name.as_str()),
                ("novaseq_flag", novaseq_flag),
            ],
        );

        let out = execute_subprocess_command(&cmd, &self.logger, OnFail::Continue)?;
        if !out.contains(&self.config.demultiplex.cluster_density_success) {
            self.logger.error(format!(
                "{} Cluster density calculation failed",
                self.logger.flag("fail")
            ));
            return Err(AutomationError::ClusterDensity {
                runfolder: rf.runfolder_name.clone(),
            }
            .into());
        }
        self.logger
            .info(format!("Cluster density calculated for {}", rf.runfolder_name));
        Ok(())
    }

    /// Run the converter with its stderr appended to the sentinel.
    fn run_converter(&self) -> anyhow::Result<()> {
        let rf = self.rf;
        let runfolderpath = rf.runfolderpath.to_string_lossy();
        let samplesheet_path = rf.samplesheet_path.to_string_lossy();
        let cmd = render(
            &self.config.demultiplex.bcl2fastq_cmd,
            &[
                ("runfolderpath", runfolderpath.as_ref()),
                ("samplesheet_path", samplesheet_path.as_ref()),
                ("samplesheet_name", rf.samplesheet_name.as_str()),
            ],
        );

        let out = execute_with_stderr_to(&cmd, &rf.bcl2fastqlog_file, &self.logger, OnFail::Continue)?;
        if !out.success() {
            self.logger.error(format!(
                "{} Converter returned {}",
                self.logger.flag("fail"),
                out.returncode
            ));
            return Err(AutomationError::Demultiplex {
                runfolder: rf.runfolder_name.clone(),
                returncode: out.returncode,
            }
            .into());
        }

        let completed = read_lines(&rf.bcl2fastqlog_file)?
            .last()
            .is_some_and(|line| line.contains(&self.config.demultiplex.bcl2fastq_success));
        if completed {
            self.logger
                .info(format!("Demultiplexing completed for {}", rf.runfolder_name));
        } else {
            self.logger.warning(format!(
                "Converter exited 0 but {} does not end with the success marker",
                rf.bcl2fastqlog_file.display()
            ));
        }
        Ok(())
    }
}
