use anyhow::{bail, Context};
use itertools::Itertools;

use std::path::PathBuf;

use crate::config::{render, Config};
use crate::consts::*;
use crate::core::backup::UaCaller;
use crate::core::cloud::CloudClient;
use crate::core::dispatch::build_dispatch_commands;
use crate::core::emails::{send_pipeline_emails, Mailer};
use crate::core::samples::{read_samplesheet_samples, CollectRunfolderSamples};
use crate::core::upload::{FileClass, UploadCommand};
use crate::errors::AutomationError;
use crate::executor::{execute_subprocess_command, OnFail};
use crate::logger::AdLogger;
use crate::pipeline::tso500::write_samplesheet_parts;
use crate::pipeline::{DispatchContext, Pipeline};
use crate::toolbox::{
    create_sentinel, get_runfolder_names, read_lines, test_upload_software, timestamp,
    write_lines, RunfolderObject, WriteMode,
};

/// Where one upload-and-setoff attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetoffOutcome {
    NoSamples,
    DevelopmentRun,
    Dispatched { project_id: String },
}

/// Users a new cloud project is shared with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Users {
    pub viewers: Vec<String>,
    pub admins: Vec<String>,
}

impl Users {
    /// Static viewers and admins, plus the dry-lab user of any panel in the run
    pub fn for_run(run: &CollectRunfolderSamples, config: &Config) -> Self {
        let drylab = run
            .samples
            .iter()
            .filter_map(|sample| sample.panel.drylab_dnanexus_id.clone());

        Self {
            viewers: config
                .dnanexus
                .viewers
                .iter()
                .cloned()
                .chain(drylab)
                .unique()
                .collect(),
            admins: config.dnanexus.admins.clone(),
        }
    }

    /// `(user, permission)` pairs, viewers first
    pub fn invitations(&self) -> Vec<(&str, &'static str)> {
        self.viewers
            .iter()
            .map(|user| (user.as_str(), VIEW))
            .chain(self.admins.iter().map(|user| (user.as_str(), ADMINISTER)))
            .collect()
    }
}

/// Upload-and-setoff entry point.
///
/// # Example
///
/// ```rust,ignore
/// let cloud = DxCli::new(&config, &auth);
/// let mailer = SmtpMailer::new(&config, &password);
/// let runs = SequencingRuns::new(&config, &auth, &cloud, &mailer);
/// let processed = runs.setoff_processing()?;
/// ```
pub struct SequencingRuns<'a> {
    config: &'a Config,
    auth: String,
    cloud: &'a dyn CloudClient,
    mailer: &'a dyn Mailer,
    timestamp: String,
    git_tag: String,
}

impl<'a> SequencingRuns<'a> {
    pub fn new(
        config: &'a Config,
        auth: &str,
        cloud: &'a dyn CloudClient,
        mailer: &'a dyn Mailer,
    ) -> Self {
        Self {
            config,
            auth: auth.to_string(),
            cloud,
            mailer,
            timestamp: timestamp(),
            git_tag: crate::toolbox::git_tag(&config.paths.document_root),
        }
    }

    /// Demultiplexed (or TSO-marked) and not yet uploaded.
    pub fn requires_processing(&self, rf: &RunfolderObject) -> bool {
        if rf.upload_flagfile.exists() || !rf.bcl2fastqlog_file.exists() {
            return false;
        }

        let settings = &self.config.demultiplex;
        read_lines(&rf.bcl2fastqlog_file)
            .ok()
            .and_then(|lines| lines.last().cloned())
            .is_some_and(|last| {
                last.contains(&settings.bcl2fastq_success) || last.contains(&settings.tso_skip_marker)
            })
    }

    /// Upload and dispatch every runfolder that requires it.
    pub fn setoff_processing(&self) -> anyhow::Result<Vec<String>> {
        let console = AdLogger::console(SETOFF_WORKFLOWS, &self.timestamp);
        if !test_upload_software(self.config, &console)? {
            return Err(AutomationError::MissingBinary {
                cmd: self.config.dnanexus.test_upload_agent_cmd.clone(),
            }
            .into());
        }

        let mut processed = Vec::new();
        let mut failed = Vec::new();
        for name in get_runfolder_names(self.config)? {
            let rf = RunfolderObject::new(&name, self.config, &self.timestamp);
            if !self.requires_processing(&rf) {
                continue;
            }

            match ProcessRunfolder::new(&rf, self).run() {
                Ok(outcome) => {
                    log::info!("INFO: {} -> {:?}", name, outcome);
                    if matches!(outcome, SetoffOutcome::Dispatched { .. }) {
                        processed.push(name);
                    }
                }
                Err(e) => {
                    console.exception(format!("Upload and setoff of {} failed: {:#}", name, e));
                    failed.push(name);
                }
            }
        }

        log::info!("INFO: runfolders uploaded this cycle: {:?}", processed);
        if !failed.is_empty() {
            bail!(
                "Upload and setoff failed for {} after uploading {:?}",
                failed.join(", "),
                processed
            );
        }
        Ok(processed)
    }
}

/// One upload-and-setoff cycle for one runfolder
pub struct ProcessRunfolder<'a> {
    rf: &'a RunfolderObject,
    runs: &'a SequencingRuns<'a>,
    logger: AdLogger,
}

impl<'a> ProcessRunfolder<'a> {
    pub fn new(rf: &'a RunfolderObject, runs: &'a SequencingRuns<'a>) -> Self {
        Self {
            logger: rf.logger(SETOFF_WORKFLOWS, &rf.setoff_log),
            rf,
            runs,
        }
    }

    /// Process the runfolder, release its loggers, then upload the logfiles.
    pub fn run(mut self) -> anyhow::Result<SetoffOutcome> {
        let result = self.process();
        self.logger.shutdown();

        if let Ok((SetoffOutcome::Dispatched { project_id }, logfiles_dir)) = &result {
            self.upload_logfiles(project_id, logfiles_dir)?;
        }
        result.map(|(outcome, _)| outcome)
    }

    fn process(&self) -> anyhow::Result<(SetoffOutcome, String)> {
        let rf = self.rf;
        let config = self.runs.config;
        let auth = self.runs.auth.as_str();

        let rows = read_samplesheet_samples(&rf.samplesheet_path)?;
        if rows.is_empty() {
            self.logger.warning(format!(
                "No samples found for {}. Nothing to upload",
                rf.runfolder_name
            ));
            return Ok((SetoffOutcome::NoSamples, String::new()));
        }

        let panels: Vec<_> = rows
            .iter()
            .filter_map(|(_, panno)| config.panel(panno))
            .collect();
        let dev_pipeline = panels.iter().any(|panel| panel.pipeline == Pipeline::Dev);
        let development_run = dev_pipeline || panels.iter().any(|panel| panel.development_run);
        if development_run && (dev_pipeline || !self.demultiplexed_manually()) {
            self.logger.info(format!(
                "{} is a development run and is not uploaded automatically",
                rf.runfolder_name
            ));
            return Ok((SetoffOutcome::DevelopmentRun, String::new()));
        }

        // upload sentinel precedes pipeline selection
        let started = format!(
            "{}: {}",
            UPLOAD_STARTED_MARKER,
            chrono::Local::now().format(SENTINEL_TIME_FORMAT)
        );
        create_sentinel(&rf.upload_flagfile, &[started])?;
        self.logger
            .info(self.logger.msg("sentinel_created", &[&rf.upload_flagfile.display()]));

        let run = CollectRunfolderSamples::new(rf, config, auth, &self.logger)?;
        let logfiles_dir = run.cloud_paths.logfiles_dir.clone();
        if run.is_empty() {
            self.logger.warning(format!(
                "No samples with a known panel and FASTQs for {}. Nothing to upload",
                rf.runfolder_name
            ));
            return Ok((SetoffOutcome::NoSamples, logfiles_dir));
        }

        if !rf.runfolder_samplesheet_path.exists() {
            std::fs::copy(&rf.samplesheet_path, &rf.runfolder_samplesheet_path).with_context(
                || format!("Could not copy SampleSheet into {}", rf.runfolderpath.display()),
            )?;
        }

        let sdk_source = config.dnanexus.sdk_source.as_str();
        let version = format!("# automate_demultiplex {}", self.runs.git_tag);
        write_lines(
            &rf.dispatch_script,
            WriteMode::Truncate,
            &[SHEBANG, version.as_str(), sdk_source],
        )?;

        let project_id = self.create_project(&run)?;
        self.logger.info(format!(
            "Created project {} ({}) for {}",
            run.proj_name, project_id, rf.runfolder_name
        ));

        let backup = rf.logger(BACKUP_RUNFOLDER, &rf.backup_log);
        let tso_parts = self.pre_pipeline_upload(&run, &project_id, &backup)?;

        if run.pipeline.has_decision_support() {
            write_lines(
                &rf.decision_support_script,
                WriteMode::Truncate,
                &[SHEBANG, sdk_source],
            )?;
        }

        let ctx = DispatchContext {
            config,
            runfolder_name: rf.runfolder_name.clone(),
            proj_name: run.proj_name.clone(),
            auth: auth.to_string(),
            decision_support_script: rf.decision_support_script.clone(),
            tso_parts,
        };
        let cmds = build_dispatch_commands(&run, &ctx, &project_id);
        write_lines(&rf.dispatch_script, WriteMode::Append, &cmds.dispatch)?;
        if run.pipeline.is_tso() {
            write_lines(&rf.post_run_script, WriteMode::Truncate, &[SHEBANG, sdk_source])?;
            write_lines(&rf.post_run_script, WriteMode::Append, &cmds.post_run)?;
        }

        let dispatch = format!("bash {}", rf.dispatch_script.display());
        let out = execute_subprocess_command(&dispatch, &self.logger, OnFail::Continue)?;
        if out.success() {
            self.logger
                .info(format!("Workflows set off for {}", rf.runfolder_name));
        } else {
            self.logger.error(format!(
                "Dispatch script for {} returned {}",
                rf.runfolder_name, out.returncode
            ));
        }

        send_pipeline_emails(&run, config, self.runs.mailer, &self.logger);

        if !run.pipeline.is_tso() {
            UaCaller::new(config, auth, &project_id, &run.proj_name, Some(BCL_LANE_IGNORE))
                .backup(&rf.runfolderpath, &backup, Some(self.runs.cloud))?;
        }

        self.logger
            .info(self.logger.msg("runfolder_done", &[&rf.runfolder_name]));
        Ok((SetoffOutcome::Dispatched { project_id }, logfiles_dir))
    }

    fn demultiplexed_manually(&self) -> bool {
        read_lines(&self.rf.bcl2fastqlog_file)
            .ok()
            .and_then(|lines| lines.into_iter().next())
            .is_some_and(|first| first == DEV_MANUAL_MARKER)
    }

    /// Write and run the project-creation script; return the new project id.
    fn create_project(&self, run: &CollectRunfolderSamples) -> anyhow::Result<String> {
        let rf = self.rf;
        let config = self.runs.config;
        let auth = self.runs.auth.as_str();
        let project_var = format!("${{{}}}", PROJECT_ID);

        let mut lines = vec![
            SHEBANG.to_string(),
            config.dnanexus.sdk_source.clone(),
            format!(
                "{}=\"$({})\"",
                PROJECT_ID,
                render(
                    &config.dnanexus.create_proj,
                    &[
                        ("organisation", config.general.organisation.as_str()),
                        ("proj_name", run.proj_name.as_str()),
                        ("auth", auth),
                    ],
                )
            ),
            format!(
                "echo \"{}={}\" >> {}",
                PROJECT_ID,
                project_var,
                rf.dispatch_script.display()
            ),
        ];
        for (user, permission) in Users::for_run(run, config).invitations() {
            lines.push(render(
                &config.dnanexus.invite_user,
                &[
                    ("project_id", project_var.as_str()),
                    ("user", user),
                    ("permission", permission),
                    ("auth", auth),
                ],
            ));
        }
        lines.push(format!("echo {}", project_var));
        write_lines(&rf.project_script, WriteMode::Truncate, &lines)?;

        let cmd = format!("bash {}", rf.project_script.display());
        let out = execute_subprocess_command(&cmd, &self.logger, OnFail::Continue)?;
        out.stdout
            .lines()
            .last()
            .map(str::trim)
            .filter(|id| out.success() && id.starts_with("project-"))
            .map(String::from)
            .ok_or_else(|| {
                self.logger.error(format!(
                    "Project {} was not created for {}",
                    run.proj_name, rf.runfolder_name
                ));
                AutomationError::ProjectCreation {
                    runfolder: rf.runfolder_name.clone(),
                }
                .into()
            })
    }

    /// Uploads that must land before any workflow is set off.
    ///
    /// TSO runs upload SampleSheet parts and back up the whole runfolder,
    /// BCL files included, since demultiplexing happens in the cloud.
    /// Returns the file names of the uploaded parts.
    fn pre_pipeline_upload(
        &self,
        run: &CollectRunfolderSamples,
        project_id: &str,
        backup: &AdLogger,
    ) -> anyhow::Result<Vec<String>> {
        let rf = self.rf;
        let config = self.runs.config;
        let auth = self.runs.auth.as_str();
        let existing = |paths: Vec<PathBuf>| -> Vec<PathBuf> {
            paths.into_iter().filter(|path| path.exists()).collect()
        };

        let mut uploads = vec![UploadCommand::new(
            FileClass::ClusterDensity,
            config,
            auth,
            project_id,
            QC_DIR,
            existing(vec![rf.lane_metrics_file.clone(), rf.phasing_metrics_file.clone()]),
        )];

        let mut tso_parts = Vec::new();
        if run.pipeline.is_tso() {
            let parts = write_samplesheet_parts(
                &rf.samplesheet_path,
                &rf.runfolderpath,
                &rf.runfolder_name,
                config.general.tso_batch_size,
            )?;
            tso_parts = parts
                .iter()
                .filter_map(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect();
            uploads.push(UploadCommand::new(
                FileClass::TsoSamplesheets,
                config,
                auth,
                project_id,
                &format!("/{}", rf.runfolder_name),
                parts,
            ));
        } else {
            let fastqs_dir = &run.cloud_paths.fastqs_dir;
            let fastqs = run
                .fastq_list
                .iter()
                .chain(run.undetermined_fastqs.iter())
                .cloned()
                .collect();
            uploads.push(UploadCommand::new(
                FileClass::Fastqs,
                config,
                auth,
                project_id,
                fastqs_dir,
                fastqs,
            ));
            uploads.push(UploadCommand::new(
                FileClass::RunfolderSamplesheet,
                config,
                auth,
                project_id,
                fastqs_dir,
                existing(vec![rf.runfolder_samplesheet_path.clone()]),
            ));
            uploads.push(UploadCommand::new(
                FileClass::Bcl2fastqQc,
                config,
                auth,
                project_id,
                &format!("{}/Stats", fastqs_dir),
                existing(vec![rf.bcl2fastqstats_file.clone()]),
            ));
        }

        for upload in &uploads {
            if !upload.execute(&self.logger)? {
                self.logger.warning(format!(
                    "Some {} files were not uploaded for {}",
                    upload.class.as_str(),
                    rf.runfolder_name
                ));
            }
        }

        if run.pipeline.is_tso() {
            UaCaller::new(config, auth, project_id, &run.proj_name, None).backup(
                &rf.runfolderpath,
                backup,
                Some(self.runs.cloud),
            )?;
        }
        Ok(tso_parts)
    }

    /// Upload every local logfile and script for the runfolder, last.
    fn upload_logfiles(&self, project_id: &str, logfiles_dir: &str) -> anyhow::Result<()> {
        let config = self.runs.config;
        let console = AdLogger::console(SETOFF_WORKFLOWS, &self.runs.timestamp);
        let files = self.rf.logfiles(&config.paths.ad_logfiles);

        let upload = UploadCommand::new(
            FileClass::Logfiles,
            config,
            &self.runs.auth,
            project_id,
            logfiles_dir,
            files,
        );
        if !upload.execute(&console)? {
            console.error(console.msg("upload_fail", &[&FileClass::Logfiles.as_str()]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::core::cloud::{CloudFile, CloudProject};
    use crate::core::emails::Email;
    use pretty_assertions::assert_eq;

    struct NoCloud;

    impl CloudClient for NoCloud {
        fn find_projects(&self, _: &str) -> anyhow::Result<Vec<CloudProject>> {
            Ok(Vec::new())
        }
        fn list_files(&self, _: &str) -> anyhow::Result<Vec<CloudFile>> {
            Ok(Vec::new())
        }
        fn project_name(&self, _: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    struct NoMail;

    impl Mailer for NoMail {
        fn send(&self, _: &Email) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn setup(config: &mut Config) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["runfolders", "samplesheets", "logs"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        config.paths.runfolders = dir.path().join("runfolders");
        config.paths.samplesheets_dir = dir.path().join("samplesheets");
        config.paths.ad_logfiles = dir.path().join("logs");
        dir
    }

    #[test]
    fn test_requires_processing() {
        let mut config = test_config();
        let _dir = setup(&mut config);
        let runs = SequencingRuns::new(&config, "tok", &NoCloud, &NoMail);
        let rf = RunfolderObject::new("250101_A01229_0001_AXXX", &config, "ts");
        std::fs::create_dir_all(&rf.runfolderpath).unwrap();

        assert!(!runs.requires_processing(&rf));

        std::fs::write(&rf.bcl2fastqlog_file, "converting\n").unwrap();
        assert!(!runs.requires_processing(&rf));

        std::fs::write(
            &rf.bcl2fastqlog_file,
            format!("converting\n{}\n", config.demultiplex.bcl2fastq_success),
        )
        .unwrap();
        assert!(runs.requires_processing(&rf));

        std::fs::write(&rf.upload_flagfile, "UPLOAD STARTED: x\n").unwrap();
        assert!(!runs.requires_processing(&rf));
    }

    #[test]
    fn test_tso_marker_requires_processing() {
        let mut config = test_config();
        let _dir = setup(&mut config);
        let runs = SequencingRuns::new(&config, "tok", &NoCloud, &NoMail);
        let rf = RunfolderObject::new("250101_A01229_0001_AXXX", &config, "ts");
        std::fs::create_dir_all(&rf.runfolderpath).unwrap();
        std::fs::write(
            &rf.bcl2fastqlog_file,
            format!("{}\n", config.demultiplex.tso_skip_marker),
        )
        .unwrap();

        assert!(runs.requires_processing(&rf));
    }

    #[test]
    fn test_users_include_drylab() {
        let mut config = test_config();
        config
            .panels
            .get_mut("Pan4119")
            .unwrap()
            .drylab_dnanexus_id = Some("user-drylab".to_string());
        let pipeline_samples = vec![
            crate::pipeline::tests::sample(&config, "NGS999_01_DNA1_Pan4119", "Pan4119"),
            crate::pipeline::tests::sample(&config, "NGS999_02_DNA2_Pan4119", "Pan4119"),
        ];
        let run = CollectRunfolderSamples {
            runfolder_name: "rf".into(),
            samples: pipeline_samples,
            pipeline: crate::pipeline::Pipeline::Pipe,
            development_run: false,
            runtype_suffix: String::new(),
            proj_name: String::new(),
            cloud_paths: crate::core::samples::CloudPaths {
                fastqs_dir: String::new(),
                logfiles_dir: String::new(),
                samplesheet_path: String::new(),
            },
            fastq_list: Vec::new(),
            undetermined_fastqs: Vec::new(),
        };

        let users = Users::for_run(&run, &config);
        assert_eq!(users.viewers.last().map(String::as_str), Some("user-drylab"));
        assert_eq!(
            users.viewers.iter().filter(|u| u.as_str() == "user-drylab").count(),
            1
        );
        let invitations = users.invitations();
        assert_eq!(invitations.len(), users.viewers.len() + users.admins.len());
        assert!(invitations.iter().any(|(_, p)| *p == ADMINISTER));
    }
}
