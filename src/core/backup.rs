use walkdir::WalkDir;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::cloud::CloudClient;
use crate::core::upload::upload_cmds;
use crate::executor::{execute_subprocess_command, OnFail};
use crate::logger::AdLogger;

/// Outcome of a runfolder backup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub local_files: usize,
    pub cloud_files: Option<usize>,
    pub ignored_in_cloud: Option<usize>,
    pub failed_batches: usize,
}

/// Uploads a whole runfolder to a cloud project, directory by directory.
///
/// # Example
///
/// ```rust,ignore
/// let caller = UaCaller::new(&config, &auth, &project_id, &project_name, Some("/L00"));
/// let summary = caller.backup(&rf.runfolderpath, &logger, Some(&cloud))?;
/// ```
pub struct UaCaller<'a> {
    config: &'a Config,
    auth: String,
    project_id: String,
    folder_prefix: String,
    ignore: Vec<String>,
}

impl<'a> UaCaller<'a> {
    /// # Arguments
    ///
    /// * `project_name` - Cloud project name; its runfolder part becomes the folder prefix.
    /// * `ignore` - Comma-separated substrings; matching paths are skipped (case-insensitive).
    pub fn new(
        config: &'a Config,
        auth: &str,
        project_id: &str,
        project_name: &str,
        ignore: Option<&str>,
    ) -> Self {
        Self {
            config,
            auth: auth.to_string(),
            project_id: project_id.to_string(),
            folder_prefix: format!("/{}", runfolder_from_project(config, project_name)),
            ignore: parse_ignore(ignore),
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let path = path.to_string_lossy().to_lowercase();
        self.ignore.iter().any(|pattern| path.contains(pattern.as_str()))
    }

    /// Files to upload, grouped by parent directory, ignore patterns removed
    pub fn files_by_dir(&self, runfolder: &Path) -> BTreeMap<PathBuf, Vec<PathBuf>> {
        let mut dirs: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for entry in WalkDir::new(runfolder)
            .sort_by_file_name()
            .into_iter()
            .flatten()
            .filter(|entry| entry.file_type().is_file())
        {
            let path = entry.into_path();
            if self.is_ignored(&path) {
                continue;
            }
            if let Some(parent) = path.parent() {
                dirs.entry(parent.to_path_buf()).or_default().push(path);
            }
        }
        dirs
    }

    /// Cloud folder mirroring a local directory of the runfolder
    pub fn cloud_folder(&self, runfolder: &Path, dir: &Path) -> String {
        let relative = dir
            .strip_prefix(runfolder)
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_default();
        if relative.is_empty() {
            self.folder_prefix.clone()
        } else {
            format!("{}/{}", self.folder_prefix, relative)
        }
    }

    /// Upload every non-ignored file, then count local against cloud files.
    pub fn backup(
        &self,
        runfolder: &Path,
        logger: &AdLogger,
        cloud: Option<&dyn CloudClient>,
    ) -> anyhow::Result<BackupSummary> {
        logger.info(format!(
            "Backing up {} to {}:{}",
            runfolder.display(),
            self.project_id,
            self.folder_prefix
        ));

        let mut summary = BackupSummary::default();
        for (dir, files) in self.files_by_dir(runfolder) {
            summary.local_files += files.len();
            let folder = self.cloud_folder(runfolder, &dir);

            for cmd in upload_cmds(self.config, &self.auth, &self.project_id, &folder, &files) {
                let out = execute_subprocess_command(&cmd, logger, OnFail::Continue)?;
                if !out.success() {
                    logger.error(logger.msg("upload_fail", &[&dir.display()]));
                    summary.failed_batches += 1;
                }
            }
        }

        logger.info(format!(
            "{} local files in {} (ignoring {:?})",
            summary.local_files,
            runfolder.display(),
            self.ignore
        ));

        if let Some(cloud) = cloud {
            match cloud.list_files(&self.project_id) {
                Ok(files) => {
                    let in_folder: Vec<_> = files
                        .iter()
                        .filter(|file| file.folder.starts_with(&self.folder_prefix))
                        .collect();
                    let ignored = in_folder
                        .iter()
                        .filter(|file| {
                            let path = format!("{}/{}", file.folder, file.name).to_lowercase();
                            self.ignore.iter().any(|pattern| path.contains(pattern.as_str()))
                        })
                        .count();

                    logger.info(format!(
                        "{} files in {}:{}",
                        in_folder.len(),
                        self.project_id,
                        self.folder_prefix
                    ));
                    if ignored > 0 {
                        logger.warning(format!(
                            "{} files matching ignore patterns were found in the cloud project",
                            ignored
                        ));
                    }
                    summary.cloud_files = Some(in_folder.len());
                    summary.ignored_in_cloud = Some(ignored);
                }
                Err(e) => logger.warning(format!("Could not count cloud files: {}", e)),
            }
        }

        if summary.cloud_files.is_some_and(|n| n != summary.local_files) {
            logger.warning(format!(
                "File count mismatch after backup: {} local, {:?} cloud",
                summary.local_files, summary.cloud_files
            ));
        }

        Ok(summary)
    }
}

/// Runfolder name embedded in a project name: prefix stripped, first four `_` fields kept.
pub fn runfolder_from_project(config: &Config, project_name: &str) -> String {
    project_name
        .strip_prefix(config.general.prod_prefix.as_str())
        .unwrap_or(project_name)
        .split('_')
        .take(4)
        .collect::<Vec<_>>()
        .join("_")
}

fn parse_ignore(ignore: Option<&str>) -> Vec<String> {
    ignore
        .map(|ignore| {
            ignore
                .split(',')
                .map(|pattern| pattern.trim().to_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
