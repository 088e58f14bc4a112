use chrono::{DateTime, Local};

use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::Config;
use crate::consts::*;
use crate::core::cloud::{CloudClient, CloudProject};
use crate::core::samples::CollectRunfolderSamples;
use crate::logger::AdLogger;
use crate::toolbox::{
    age_in_days, created_time, get_runfolder_names, read_lines, timestamp, RunfolderObject,
};

/// Runfolders that passed every check, and those actually removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub candidates: Vec<String>,
    pub deleted: Vec<String>,
}

/// Deletes local runfolders once their data is safely in the cloud.
///
/// # Example
///
/// ```rust,ignore
/// let cleaner = RunfolderCleaner::new(&config, &cloud, true, 14, 6);
/// let report = cleaner.run()?;
/// ```
pub struct RunfolderCleaner<'a> {
    config: &'a Config,
    cloud: &'a dyn CloudClient,
    dry_run: bool,
    min_age: u64,
    logfile_count: usize,
    timestamp: String,
    logger: AdLogger,
}

impl<'a> RunfolderCleaner<'a> {
    pub fn new(
        config: &'a Config,
        cloud: &'a dyn CloudClient,
        dry_run: bool,
        min_age: u64,
        logfile_count: usize,
    ) -> Self {
        let timestamp = timestamp();
        Self {
            logger: AdLogger::new(
                WSCLEANER,
                &config.paths.ad_logfiles.join(WSCLEANER_LOG),
                &timestamp,
            ),
            config,
            cloud,
            dry_run,
            min_age,
            logfile_count,
            timestamp,
        }
    }

    /// Check every runfolder created after the logfile-layout cutoff and
    /// delete those that pass. Development runs are never deleted.
    pub fn run(&self) -> anyhow::Result<CleanupReport> {
        let cutoff = self.config.wscleaner.logfile_count_changed;
        let mut report = CleanupReport::default();

        for name in get_runfolder_names(self.config)? {
            let rf = RunfolderObject::new(&name, self.config, &self.timestamp);
            let created = DateTime::<Local>::from(created_time(&rf.runfolderpath)?).date_naive();
            if created <= cutoff {
                continue;
            }

            if let Err(reason) = self.check(&rf) {
                self.logger.info(format!("Skipping {}: {}", name, reason));
                continue;
            }
            report.candidates.push(name.clone());

            if self.dry_run {
                self.logger.info(format!("DRY RUN: {} would be deleted", name));
                continue;
            }

            match std::fs::remove_dir_all(&rf.runfolderpath) {
                Ok(()) => {
                    self.logger.info(format!("Deleted {}", rf.runfolderpath.display()));
                    report.deleted.push(name);
                }
                Err(e) => self.logger.error(format!(
                    "Could not delete {}: {}",
                    rf.runfolderpath.display(),
                    e
                )),
            }
        }

        self.logger
            .info(format!("Runfolders deleted this cycle: {:?}", report.deleted));
        Ok(report)
    }

    /// Every deletion precondition, in order. The error is the reason to skip.
    fn check(&self, rf: &RunfolderObject) -> Result<(), String> {
        if !rf.samplesheet_path.exists() {
            return Err(format!("{} not found", rf.samplesheet_path.display()));
        }

        let run = CollectRunfolderSamples::new(rf, self.config, "", &self.logger)
            .map_err(|e| format!("samples could not be collected: {}", e))?;
        if run.development_run {
            return Err("development run".to_string());
        }

        if !rf.rtacompletefile.exists() {
            return Err(format!("{} not present", RTA_COMPLETE));
        }

        let age = age_in_days(&rf.runfolderpath).map_err(|e| e.to_string())?;
        if age < self.min_age {
            return Err(format!("{} days old, minimum is {}", age, self.min_age));
        }

        let project = self.find_project(&rf.runfolder_name)?;
        let files = self
            .cloud
            .list_files(&project.id)
            .map_err(|e| format!("could not list files in {}: {}", project.id, e))?;

        let logfiles = files
            .iter()
            .filter(|file| file.folder.ends_with(LOGFILES_DIR))
            .count();
        if logfiles != self.logfile_count {
            return Err(format!(
                "{} logfiles in {}, expected {}",
                logfiles, project.id, self.logfile_count
            ));
        }

        let upload_log = self
            .upload_log(rf)
            .ok_or_else(|| format!("no {} for {}", BACKUP_LOG, rf.runfolder_name))?;
        let lines = read_lines(&upload_log).map_err(|e| e.to_string())?;
        if lines.iter().any(|line| line.contains(CLOUD_ERROR_LINE)) {
            return Err(format!("{} contains errors", upload_log.display()));
        }

        if !run.pipeline.is_tso() {
            let closed: HashSet<&str> = files
                .iter()
                .filter(|file| file.is_closed())
                .map(|file| file.name.as_str())
                .collect();
            let missing: Vec<String> = run
                .fastq_list
                .iter()
                .filter_map(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .filter(|name| !closed.contains(name.as_str()))
                .collect();
            if !missing.is_empty() {
                return Err(format!("FASTQs not in the cloud: {}", missing.join(", ")));
            }
        }

        Ok(())
    }

    fn find_project(&self, runfolder_name: &str) -> Result<CloudProject, String> {
        let mut projects = self
            .cloud
            .find_projects(runfolder_name)
            .map_err(|e| format!("project search failed: {}", e))?;
        if projects.len() != 1 {
            self.logger.warning(format!(
                "Found {} projects matching {}, expected 1",
                projects.len(),
                runfolder_name
            ));
            return Err("no unique cloud project".to_string());
        }
        projects.pop().ok_or_else(|| "no unique cloud project".to_string())
    }

    /// Newest `<runfolder>_<timestamp>_backup_runfolder.log`
    fn upload_log(&self, rf: &RunfolderObject) -> Option<PathBuf> {
        let suffix = format!("_{}", BACKUP_LOG);
        rf.logfiles(&self.config.paths.ad_logfiles)
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(&suffix))
            })
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::core::cloud::CloudFile;
    use pretty_assertions::assert_eq;

    const RF: &str = "250101_A01229_0001_AXXX";

    struct FakeCloud {
        projects: usize,
        files: Vec<CloudFile>,
    }

    impl CloudClient for FakeCloud {
        fn find_projects(&self, pattern: &str) -> anyhow::Result<Vec<CloudProject>> {
            Ok((0..self.projects)
                .map(|i| CloudProject {
                    id: format!("project-{}", i),
                    name: format!("002_{}_NGS999_CP", pattern),
                })
                .collect())
        }
        fn list_files(&self, _: &str) -> anyhow::Result<Vec<CloudFile>> {
            Ok(self.files.clone())
        }
        fn project_name(&self, _: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    fn cloud(config: &Config, fastq_state: &str) -> FakeCloud {
        let mut files: Vec<CloudFile> = (0..config.wscleaner.logfile_count)
            .map(|i| CloudFile {
                name: format!("log{}.log", i),
                folder: format!("/002_{}_NGS999_CP/{}", RF, LOGFILES_DIR),
                state: "closed".into(),
            })
            .collect();
        for read in ["R1", "R2"] {
            files.push(CloudFile {
                name: format!("NGS999_01_DNA1_Pan4119_S1_{}_001.fastq.gz", read),
                folder: "/Data/Intensities/BaseCalls".into(),
                state: fastq_state.into(),
            });
        }
        FakeCloud { projects: 1, files }
    }

    fn setup(config: &mut Config) -> (tempfile::TempDir, RunfolderObject) {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["runfolders", "samplesheets", "logs"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        config.paths.runfolders = dir.path().join("runfolders");
        config.paths.samplesheets_dir = dir.path().join("samplesheets");
        config.paths.ad_logfiles = dir.path().join("logs");

        let rf = RunfolderObject::new(RF, config, "20250101_000000");
        std::fs::create_dir_all(&rf.fastq_dir).unwrap();
        std::fs::write(&rf.rtacompletefile, "").unwrap();
        for read in ["R1", "R2"] {
            std::fs::write(
                rf.fastq_dir
                    .join(format!("NGS999_01_DNA1_Pan4119_S1_{}_001.fastq.gz", read)),
                "fq",
            )
            .unwrap();
        }
        std::fs::write(
            &rf.samplesheet_path,
            "[Data]\nSample_ID,Sample_Name,index\nNGS999_01_DNA1_Pan4119,NGS999_01_DNA1_Pan4119,ACGT\n",
        )
        .unwrap();
        std::fs::write(&rf.backup_log, "2025-01-01 - backup - INFO - done\n").unwrap();
        (dir, rf)
    }

    #[test]
    fn test_dry_run_leaves_runfolder() {
        let mut config = test_config();
        let (_dir, rf) = setup(&mut config);
        let cloud = cloud(&config, "closed");

        let report = RunfolderCleaner::new(&config, &cloud, true, 0, config.wscleaner.logfile_count)
            .run()
            .unwrap();
        assert_eq!(report.candidates, vec![RF.to_string()]);
        assert!(report.deleted.is_empty());
        assert!(rf.runfolderpath.exists());
    }

    #[test]
    fn test_deletes_once() {
        let mut config = test_config();
        let (_dir, rf) = setup(&mut config);
        let cloud = cloud(&config, "closed");
        let cleaner = RunfolderCleaner::new(&config, &cloud, false, 0, config.wscleaner.logfile_count);

        assert_eq!(cleaner.run().unwrap().deleted, vec![RF.to_string()]);
        assert!(!rf.runfolderpath.exists());
        assert!(cleaner.run().unwrap().deleted.is_empty());
    }

    #[test]
    fn test_open_fastqs_block_deletion() {
        let mut config = test_config();
        let (_dir, rf) = setup(&mut config);
        let cloud = cloud(&config, "open");

        let report = RunfolderCleaner::new(&config, &cloud, false, 0, config.wscleaner.logfile_count)
            .run()
            .unwrap();
        assert!(report.candidates.is_empty());
        assert!(rf.runfolderpath.exists());
    }

    #[test]
    fn test_error_lines_block_deletion() {
        let mut config = test_config();
        let (_dir, rf) = setup(&mut config);
        std::fs::write(&rf.backup_log, "2025-01-01 - backup - ERROR - Upload of x failed\n").unwrap();
        let cloud = cloud(&config, "closed");

        let report = RunfolderCleaner::new(&config, &cloud, false, 0, config.wscleaner.logfile_count)
            .run()
            .unwrap();
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn test_project_must_be_unique_and_old_enough() {
        let mut config = test_config();
        let (_dir, rf) = setup(&mut config);
        let mut two = cloud(&config, "closed");
        two.projects = 2;

        let count = config.wscleaner.logfile_count;
        assert!(RunfolderCleaner::new(&config, &two, false, 0, count).run().unwrap().deleted.is_empty());

        let one = cloud(&config, "closed");
        assert!(RunfolderCleaner::new(&config, &one, false, 10, count).run().unwrap().deleted.is_empty());
        assert!(rf.runfolderpath.exists());
    }

    #[test]
    fn test_development_runs_are_kept() {
        let mut config = test_config();
        let (_dir, rf) = setup(&mut config);
        std::fs::write(
            &rf.samplesheet_path,
            "[Data]\nSample_ID,Sample_Name,index\nNGS999_01_DNA1_Pan5180,NGS999_01_DNA1_Pan5180,ACGT\n",
        )
        .unwrap();
        let cloud = cloud(&config, "closed");

        let report = RunfolderCleaner::new(&config, &cloud, false, 0, config.wscleaner.logfile_count)
            .run()
            .unwrap();
        assert!(report.deleted.is_empty());
        assert!(rf.runfolderpath.exists());
    }
}
