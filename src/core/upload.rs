use std::path::{Path, PathBuf};

use crate::config::{render, Config};
use crate::consts::*;
use crate::executor::{execute_subprocess_command, OnFail};
use crate::logger::AdLogger;

/// File classes uploaded during setoff, in upload order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    ClusterDensity,
    Fastqs,
    RunfolderSamplesheet,
    TsoSamplesheets,
    Bcl2fastqQc,
    Logfiles,
}

impl FileClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileClass::ClusterDensity => "cd",
            FileClass::Fastqs => "fastqs",
            FileClass::RunfolderSamplesheet => "runfolder_samplesheet",
            FileClass::TsoSamplesheets => "tso_samplesheets",
            FileClass::Bcl2fastqQc => "bcl2fastq_qc",
            FileClass::Logfiles => "logfiles",
        }
    }
}

/// Upload-agent invocations for one set of files going to one cloud folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCommand {
    pub class: FileClass,
    pub folder: String,
    pub files: Vec<PathBuf>,
    pub cmds: Vec<String>,
}

/// Build upload-agent commands for `files`, at most `UPLOAD_BATCH_SIZE` files each.
///
/// # Arguments
///
/// * `config` - Provides the upload agent path and command template.
/// * `auth` - Cloud auth token.
/// * `project_id` - Destination project.
/// * `folder` - Destination folder inside the project.
/// * `files` - Local files to upload.
///
/// # Example
///
/// ```rust,ignore
/// let cmds = upload_cmds(&config, &auth, "project-1", "/QC", &files);
/// assert_eq!(cmds.len(), (files.len() + 99) / 100);
/// ```
pub fn upload_cmds<P: AsRef<Path>>(
    config: &Config,
    auth: &str,
    project_id: &str,
    folder: &str,
    files: &[P],
) -> Vec<String> {
    let agent = config.paths.upload_agent.to_string_lossy();
    let tries = UPLOAD_TRIES.to_string();

    files
        .chunks(UPLOAD_BATCH_SIZE)
        .map(|batch| {
            let batch = batch
                .iter()
                .map(|file| shell_quote(&file.as_ref().to_string_lossy()))
                .collect::<Vec<_>>()
                .join(" ");
            render(
                &config.dnanexus.upload_agent_cmd,
                &[
                    ("upload_agent", agent.as_ref()),
                    ("auth", auth),
                    ("project_id", project_id),
                    ("folder", folder),
                    ("tries", tries.as_str()),
                    ("files", batch.as_str()),
                ],
            )
        })
        .collect()
}

/// Single-quote a path for `bash -c`
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

impl UploadCommand {
    pub fn new(
        class: FileClass,
        config: &Config,
        auth: &str,
        project_id: &str,
        folder: &str,
        files: Vec<PathBuf>,
    ) -> Self {
        let cmds = upload_cmds(config, auth, project_id, folder, &files);
        Self {
            class,
            folder: folder.to_string(),
            files,
            cmds,
        }
    }

    /// Run every batch; returns false if any batch failed.
    ///
    /// Failures are logged and do not stop later batches.
    pub fn execute(&self, logger: &AdLogger) -> anyhow::Result<bool> {
        if self.files.is_empty() {
            logger.warning(format!(
                "No files to upload for class {}",
                self.class.as_str()
            ));
            return Ok(true);
        }

        logger.info(format!(
            "Uploading {} {} files to {}",
            self.files.len(),
            self.class.as_str(),
            self.folder
        ));

        let mut ok = true;
        for cmd in &self.cmds {
            let out = execute_subprocess_command(cmd, logger, OnFail::Continue)?;
            if !out.success() {
                logger.error(logger.msg("upload_fail", &[&self.class.as_str()]));
                ok = false;
            }
        }
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use pretty_assertions::assert_eq;

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/rf/f{}.txt", i))).collect()
    }

    #[test]
    fn test_batching_boundaries() {
        let config = test_config();
        let count = |n| upload_cmds(&config, "tok", "project-1", "/QC", &files(n)).len();

        assert_eq!(count(0), 0);
        assert_eq!(count(100), 1);
        assert_eq!(count(101), 2);
        assert_eq!(count(1000), 10);
    }

    #[test]
    fn test_second_batch_holds_remainder() {
        let config = test_config();
        let cmds = upload_cmds(&config, "tok", "project-1", "/QC", &files(101));

        assert!(cmds[0].contains("/rf/f99.txt"));
        assert!(!cmds[0].contains("/rf/f100.txt"));
        assert!(cmds[1].ends_with("'/rf/f100.txt'"));
        assert!(cmds[1].contains("--tries 100"));
        assert!(cmds[1].contains("--project project-1"));
        assert!(cmds[1].contains("--folder /QC"));
    }

    #[test]
    fn test_paths_are_quoted() {
        let config = test_config();
        let files = vec![
            PathBuf::from("/rf/Run Notes/summary.txt"),
            PathBuf::from("/rf/it's.csv"),
        ];
        let cmds = upload_cmds(&config, "tok", "project-1", "/QC", &files);

        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].ends_with(r"'/rf/Run Notes/summary.txt' '/rf/it'\''s.csv'"));
    }

    #[test]
    fn test_execute_reports_failure() {
        let mut config = test_config();
        config.dnanexus.upload_agent_cmd = "exit 1 # {files}".to_string();
        let logger = AdLogger::console("upload_test", "ts");

        let upload = UploadCommand::new(FileClass::Logfiles, &config, "tok", "p", "/logs", files(3));
        assert_eq!(upload.cmds.len(), 1);
        assert!(!upload.execute(&logger).unwrap());
    }
}
