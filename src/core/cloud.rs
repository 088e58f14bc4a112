use anyhow::{bail, Context};
use serde::Deserialize;

use crate::config::{render, Config};
use crate::executor::{execute_subprocess_command, OnFail};
use crate::logger::AdLogger;

/// A cloud project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudProject {
    pub id: String,
    pub name: String,
}

/// A file object inside a cloud project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudFile {
    pub name: String,
    pub folder: String,
    pub state: String,
}

impl CloudFile {
    pub fn is_closed(&self) -> bool {
        self.state == "closed"
    }
}

/// Read-only introspection of the cloud platform
pub trait CloudClient {
    /// Projects whose name matches `name_pattern` as a regex
    fn find_projects(&self, name_pattern: &str) -> anyhow::Result<Vec<CloudProject>>;

    /// Every file object in a project
    fn list_files(&self, project_id: &str) -> anyhow::Result<Vec<CloudFile>>;

    fn project_name(&self, project_id: &str) -> anyhow::Result<String>;
}

#[derive(Deserialize, Debug)]
struct DxProject {
    id: String,
    #[serde(default)]
    describe: Option<DxDescribe>,
}

#[derive(Deserialize, Debug)]
struct DxData {
    describe: DxDescribe,
}

#[derive(Deserialize, Debug, Default)]
struct DxDescribe {
    #[serde(default)]
    name: String,
    #[serde(default)]
    folder: String,
    #[serde(default)]
    state: String,
}

/// `CloudClient` backed by the dx command line tool.
///
/// Commands come from the `[dnanexus]` config templates and are run through
/// the subprocess runner; `--json` output is parsed with serde.
pub struct DxCli<'a> {
    config: &'a Config,
    auth: String,
    logger: AdLogger,
}

impl<'a> DxCli<'a> {
    pub fn new(config: &'a Config, auth: &str) -> Self {
        Self {
            config,
            auth: auth.to_string(),
            logger: AdLogger::console("dx_cli", &crate::toolbox::timestamp()),
        }
    }

    fn run(&self, template: &str, fields: &[(&str, &str)]) -> anyhow::Result<String> {
        let mut fields = fields.to_vec();
        fields.push(("auth", self.auth.as_str()));
        let cmd = format!(
            "{} && {}",
            self.config.dnanexus.sdk_source,
            render(template, &fields)
        );

        let out = execute_subprocess_command(&cmd, &self.logger, OnFail::Continue)?;
        if !out.success() {
            bail!("Cloud CLI command failed with return code {}", out.returncode);
        }
        Ok(out.stdout)
    }
}

impl CloudClient for DxCli<'_> {
    fn find_projects(&self, name_pattern: &str) -> anyhow::Result<Vec<CloudProject>> {
        let stdout = self.run(
            &self.config.dnanexus.find_proj_id,
            &[("pattern", name_pattern)],
        )?;
        let projects: Vec<DxProject> =
            serde_json::from_str(&stdout).context("Could not parse project search output")?;

        Ok(projects
            .into_iter()
            .map(|project| CloudProject {
                name: project.describe.map(|d| d.name).unwrap_or_default(),
                id: project.id,
            })
            .collect())
    }

    fn list_files(&self, project_id: &str) -> anyhow::Result<Vec<CloudFile>> {
        let stdout = self.run(
            &self.config.dnanexus.find_data,
            &[("project_id", project_id)],
        )?;
        let files: Vec<DxData> =
            serde_json::from_str(&stdout).context("Could not parse data search output")?;

        Ok(files
            .into_iter()
            .map(|file| CloudFile {
                name: file.describe.name,
                folder: file.describe.folder,
                state: file.describe.state,
            })
            .collect())
    }

    fn project_name(&self, project_id: &str) -> anyhow::Result<String> {
        let stdout = self.run(
            &self.config.dnanexus.proj_name_from_id,
            &[("project_id", project_id)],
        )?;
        Ok(stdout.trim().to_string())
    }
}
