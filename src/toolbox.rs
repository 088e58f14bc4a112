use anyhow::Context;
use log::warn;

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use crate::config::Config;
use crate::consts::*;
use crate::errors::AutomationError;
use crate::executor::{execute_subprocess_command, OnFail};
use crate::logger::AdLogger;

/// How `write_lines` opens its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Truncate,
}

/// Every path derived from a runfolder name.
///
/// Logfiles and scripts live in the central logfile directory; sentinels
/// and sequencer outputs live inside the runfolder itself.
#[derive(Debug, Clone)]
pub struct RunfolderObject {
    pub runfolder_name: String,
    pub timestamp: String,
    pub sequencer_id: String,
    pub runfolderpath: PathBuf,
    pub rtacompletefile: PathBuf,
    pub checksumfile: PathBuf,
    pub bcl2fastqlog_file: PathBuf,
    pub upload_flagfile: PathBuf,
    pub samplesheet_name: String,
    pub samplesheet_path: PathBuf,
    pub runfolder_samplesheet_path: PathBuf,
    pub fastq_dir: PathBuf,
    pub bcl2fastqstats_file: PathBuf,
    pub lane_metrics_file: PathBuf,
    pub phasing_metrics_file: PathBuf,
    pub demultiplex_log: PathBuf,
    pub samplesheet_log: PathBuf,
    pub setoff_log: PathBuf,
    pub backup_log: PathBuf,
    pub project_script: PathBuf,
    pub dispatch_script: PathBuf,
    pub decision_support_script: PathBuf,
    pub post_run_script: PathBuf,
}

impl RunfolderObject {
    /// Derive all paths for `runfolder_name`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let rf = RunfolderObject::new("250101_A01229_0001_AXXX", &config, "20250101_101010");
    /// assert!(rf.bcl2fastqlog_file.ends_with("bcl2fastq2_output.log"));
    /// ```
    pub fn new(runfolder_name: &str, config: &Config, timestamp: &str) -> Self {
        let runfolderpath = config.paths.runfolders.join(runfolder_name);
        let logdir = &config.paths.ad_logfiles;
        let samplesheet_name = format!("{}{}", runfolder_name, SAMPLESHEET_SUFFIX);
        let log = |suffix: &str| logdir.join(format!("{}_{}", runfolder_name, suffix));
        let timestamped = |suffix: &str| {
            logdir.join(format!("{}_{}_{}", runfolder_name, timestamp, suffix))
        };

        Self {
            runfolder_name: runfolder_name.to_string(),
            timestamp: timestamp.to_string(),
            sequencer_id: runfolder_name.split('_').nth(1).unwrap_or("").to_string(),
            rtacompletefile: runfolderpath.join(RTA_COMPLETE),
            checksumfile: runfolderpath.join(MD5_CHECKSUM),
            bcl2fastqlog_file: runfolderpath.join(BCL2FASTQ_OUTPUT),
            upload_flagfile: runfolderpath.join(UPLOAD_STARTED),
            samplesheet_path: config.paths.samplesheets_dir.join(&samplesheet_name),
            runfolder_samplesheet_path: runfolderpath.join(&samplesheet_name),
            samplesheet_name,
            fastq_dir: runfolderpath.join(FASTQ_SUBDIR),
            bcl2fastqstats_file: runfolderpath.join(STATS_SUBDIR).join(STATS_JSON),
            lane_metrics_file: runfolderpath
                .join(format!("{}.{}", runfolder_name, LANE_METRICS_EXT)),
            phasing_metrics_file: runfolderpath
                .join(format!("{}.{}", runfolder_name, PHASING_METRICS_EXT)),
            demultiplex_log: log(DEMULTIPLEX_LOG),
            samplesheet_log: log(SAMPLESHEET_LOG),
            setoff_log: timestamped(SETOFF_LOG),
            backup_log: timestamped(BACKUP_LOG),
            project_script: log(PROJECT_SCRIPT),
            dispatch_script: log(DISPATCH_SCRIPT),
            decision_support_script: log(DECISION_SUPPORT_SCRIPT),
            post_run_script: log(POST_RUN_SCRIPT),
            runfolderpath,
        }
    }

    /// Logger for one scope of this runfolder, e.g. `demultiplex_<runfolder>`
    pub fn logger(&self, scope: &str, logfile: &Path) -> AdLogger {
        AdLogger::new(
            &format!("{}_{}", scope, self.runfolder_name),
            logfile,
            &self.timestamp,
        )
    }

    /// Local logfiles and scripts for this runfolder, in name order
    pub fn logfiles(&self, logdir: &Path) -> Vec<PathBuf> {
        let prefix = format!("{}_", self.runfolder_name);
        let mut files: Vec<PathBuf> = std::fs::read_dir(logdir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file())
                    .filter(|path| {
                        path.file_name()
                            .and_then(|name| name.to_str())
                            .map(|name| name.starts_with(&prefix))
                            .unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }
}

/// Timestamp used in logfile names
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Names of directories in the runfolders directory matching the runfolder pattern.
///
/// # Example
///
/// ```rust,ignore
/// let names = get_runfolder_names(&config)?;
/// ```
pub fn get_runfolder_names(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(&config.paths.runfolders)
        .with_context(|| {
            format!(
                "Could not read runfolders directory {}",
                config.paths.runfolders.display()
            )
        })?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .filter(|name| config.general.runfolder_pattern.is_match(name))
        .collect();
    names.sort();
    Ok(names)
}

/// Creation time of a path, falling back to modification time where the
/// filesystem does not record birth time
pub fn created_time(path: &Path) -> anyhow::Result<SystemTime> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Could not stat {}", path.display()))?;
    Ok(metadata.created().or_else(|_| metadata.modified())?)
}

/// Age of a path in whole days.
pub fn age_in_days(path: &Path) -> anyhow::Result<u64> {
    let age = SystemTime::now()
        .duration_since(created_time(path)?)
        .unwrap_or_default();
    Ok(age.as_secs() / 86_400)
}

/// Read a text file into lines without line endings.
pub fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
    BufReader::new(file)
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Could not read {}", path.display()))
}

/// Write lines to a file, each terminated by a newline.
///
/// # Example
///
/// ```rust,ignore
/// write_lines(&rf.dispatch_script, WriteMode::Append, &["DEPENDS_LIST=\"\""])?;
/// ```
pub fn write_lines<S: AsRef<str>>(path: &Path, mode: WriteMode, lines: &[S]) -> anyhow::Result<()> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        WriteMode::Append => options.append(true),
        WriteMode::Truncate => options.write(true).truncate(true),
    };

    let mut file = options
        .open(path)
        .with_context(|| format!("Could not open {} for writing", path.display()))?;
    for line in lines {
        writeln!(file, "{}", line.as_ref())?;
    }
    Ok(())
}

/// First line of a credentials file, trimmed.
pub fn get_credential(path: &Path) -> anyhow::Result<String> {
    let credential = read_lines(path)
        .ok()
        .and_then(|lines| lines.into_iter().next())
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .ok_or_else(|| AutomationError::MissingCredentials {
            path: path.to_path_buf(),
        })?;
    Ok(credential)
}

/// Release tag of the deployed code, falling back to the crate version.
pub fn git_tag(document_root: &Path) -> String {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always"])
        .current_dir(document_root)
        .output();

    match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => {
            warn!(
                "WARN: could not resolve git tag in {}, using crate version",
                document_root.display()
            );
            format!("v{}", env!("CARGO_PKG_VERSION"))
        }
    }
}

/// Check the upload agent can be invoked.
pub fn test_upload_software(config: &Config, logger: &AdLogger) -> anyhow::Result<bool> {
    let cmd = crate::config::render(
        &config.dnanexus.test_upload_agent_cmd,
        &[("upload_agent", config.paths.upload_agent.to_string_lossy().as_ref())],
    );
    let out = execute_subprocess_command(&cmd, logger, OnFail::Continue)?;
    Ok(out.success())
}

/// Exclusively create a file containing `lines`, failing if it already exists.
pub fn create_sentinel<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<(), AutomationError> {
    let to_error = |source| AutomationError::SentinelCreation {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(to_error)?;
    for line in lines {
        writeln!(file, "{}", line.as_ref()).map_err(to_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_runfolder_paths() {
        let config = test_config();
        let rf = RunfolderObject::new("250101_A01229_0001_AXXX", &config, "20250101_101010");

        assert_eq!(rf.sequencer_id, "A01229");
        assert_eq!(rf.samplesheet_name, "250101_A01229_0001_AXXX_SampleSheet.csv");
        assert!(rf.fastq_dir.ends_with("250101_A01229_0001_AXXX/Data/Intensities/BaseCalls"));
        assert_eq!(
            rf.setoff_log.file_name().unwrap().to_str().unwrap(),
            "250101_A01229_0001_AXXX_20250101_101010_upload_and_setoff.log"
        );
        assert_eq!(
            rf.dispatch_script.file_name().unwrap().to_str().unwrap(),
            "250101_A01229_0001_AXXX_dx_run_commands.sh"
        );
    }

    #[test]
    fn test_write_and_read_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");

        write_lines(&path, WriteMode::Append, &["a", "b"]).unwrap();
        write_lines(&path, WriteMode::Append, &["c"]).unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["a", "b", "c"]);

        write_lines(&path, WriteMode::Truncate, &["z"]).unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["z"]);
    }

    #[test]
    fn test_get_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  secret-token \nsecond line\n").unwrap();

        assert_eq!(get_credential(&path).unwrap(), "secret-token");
        assert!(get_credential(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_create_sentinel_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(UPLOAD_STARTED);

        create_sentinel(&path, &["UPLOAD STARTED: now"]).unwrap();
        assert!(create_sentinel(&path, &["again"]).is_err());
        assert_eq!(read_lines(&path).unwrap(), vec!["UPLOAD STARTED: now"]);
    }

    #[test]
    fn test_age_of_new_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(age_in_days(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_runfolder_logfiles() {
        let config = test_config();
        let dir = tempfile::tempdir().unwrap();
        let rf = RunfolderObject::new("250101_A01229_0001_AXXX", &config, "ts");
        std::fs::write(dir.path().join("250101_A01229_0001_AXXX_demultiplex.log"), "").unwrap();
        std::fs::write(dir.path().join("250101_A01229_0001_AXXX_dx_run_commands.sh"), "").unwrap();
        std::fs::write(dir.path().join("250102_A01229_0002_AYYY_demultiplex.log"), "").unwrap();

        let names: Vec<String> = rf
            .logfiles(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "250101_A01229_0001_AXXX_demultiplex.log",
                "250101_A01229_0001_AXXX_dx_run_commands.sh"
            ]
        );
    }
}
