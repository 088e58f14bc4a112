use anyhow::Context;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub mod panels;

pub use panels::{CongenicaProject, PanelSettings, Polyedge, Throughput};

use crate::pipeline::Pipeline;

/// Process-wide configuration, read once from a TOML file.
///
/// # Example
///
/// ```text
/// [general]
/// organisation = "org-lab_prod"
/// prod_prefix = "002_"
///
/// [panels.Pan4119]
/// panel_name = "VCP2 STG"
/// pipeline = "pipe"
/// ```
///
/// ```rust,ignore
/// let config = Config::read(PathBuf::from("config.toml")).unwrap();
/// let panel = config.panel("Pan4119");
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub general: General,
    pub paths: Paths,
    pub credentials: Credentials,
    pub demultiplex: DemultiplexSettings,
    pub dnanexus: DnanexusSettings,
    pub sql: SqlSettings,
    pub email: EmailSettings,
    pub wscleaner: WscleanerSettings,
    #[serde(default)]
    pub panels: BTreeMap<String, PanelSettings>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct General {
    pub organisation: String,
    pub prod_prefix: String,
    #[serde(deserialize_with = "deserialize_regex")]
    pub runfolder_pattern: Regex,
    #[serde(deserialize_with = "deserialize_regex")]
    pub samplesheet_name_pattern: Regex,
    #[serde(deserialize_with = "deserialize_regex")]
    pub sample_name_pattern: Regex,
    #[serde(deserialize_with = "deserialize_regex")]
    pub wes_batch_pattern: Regex,
    pub sequencer_ids: Vec<String>,
    /// Sequencers whose runfolders must pass the md5 integrity check
    pub seq_require_ic: Vec<String>,
    pub novaseq_id: String,
    pub runtypes: Vec<String>,
    pub ntc_ids: Vec<String>,
    pub reference_sample_ids: Vec<String>,
    pub tso_batch_size: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Paths {
    pub runfolders: PathBuf,
    pub samplesheets_dir: PathBuf,
    pub ad_logfiles: PathBuf,
    pub document_root: PathBuf,
    pub upload_agent: PathBuf,
    pub bedfile_folder: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Credentials {
    pub dnanexus_authtoken: PathBuf,
    pub email_password: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DemultiplexSettings {
    pub bcl2fastq_cmd: String,
    pub test_bcl2fastq_cmd: String,
    pub bcl2fastq_success: String,
    pub cluster_density_cmd: String,
    pub cluster_density_success: String,
    pub checksum_match: String,
    pub checksum_complete: String,
    pub tso_skip_marker: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DnanexusSettings {
    pub sdk_source: String,
    pub create_proj: String,
    pub invite_user: String,
    pub find_proj_id: String,
    pub proj_name_from_id: String,
    pub find_data: String,
    pub upload_agent_cmd: String,
    pub test_upload_agent_cmd: String,
    pub decision_support_inputs_cmd: String,
    pub viewers: Vec<String>,
    pub admins: Vec<String>,
    pub congenica_credentials: String,
    pub congenica_ir_template: String,
    pub tso_novaseq_option: String,
    pub apps: DxApps,
    pub stages: DxStages,
    pub instances: DxInstances,
}

/// Cloud app and workflow identifiers
#[derive(Deserialize, Debug, Clone)]
pub struct DxApps {
    pub wes_workflow: String,
    pub custom_panels_workflow: String,
    pub snp_workflow: String,
    pub fastqc_app: String,
    pub tso500_app: String,
    pub peddy_app: String,
    pub multiqc_app: String,
    pub upload_multiqc_app: String,
    pub duty_csv_app: String,
    pub ed_readcount_app: String,
    pub ed_cnvcalling_app: String,
    pub rpkm_app: String,
    pub sambamba_app: String,
    pub sompy_app: String,
    pub congenica_app: String,
    pub congenica_sftp_app: String,
    pub qiagen_upload_app: String,
}

/// Workflow stage identifiers used to address stage inputs
#[derive(Deserialize, Debug, Clone)]
pub struct DxStages {
    pub fastqc: String,
    pub sentieon: String,
    pub bwa: String,
    pub picard: String,
    pub sambamba: String,
    pub vcfeval: String,
    pub fhprs: String,
    pub polyedge: String,
    pub gatk: String,
    pub filter_vcf: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DxInstances {
    pub bwa: String,
    pub picard: String,
    pub filter_vcf: String,
    pub sambamba: String,
    pub gatk_fh: String,
    pub gatk_default: String,
    pub tso_high_throughput: String,
    pub tso_low_throughput: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SqlSettings {
    pub customrun_query: String,
    pub oncology_query: String,
    pub wes_query: String,
    /// Pipeline name -> pipeline version id recorded by the LIMS
    pub pipeline_versions: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub user: String,
    pub bioinformatics_recipient: String,
    pub wes_samplenames_recipient: String,
    pub oncology_ops_recipient: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WscleanerSettings {
    /// Runfolders created before this date predate the current logfile layout
    #[serde(deserialize_with = "deserialize_date")]
    pub logfile_count_changed: NaiveDate,
    pub min_age_days: u64,
    pub logfile_count: usize,
}

impl Config {
    /// Read a configuration file and return a Config struct.
    ///
    /// # Arguments
    ///
    /// * `config` - A path to the TOML configuration file.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::read(PathBuf::from("config.toml"));
    /// ```
    pub fn read<P: AsRef<Path>>(config: P) -> anyhow::Result<Self> {
        let mut file = File::open(config.as_ref())
            .with_context(|| format!("Could not open config {}", config.as_ref().display()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Self::parse(&contents)
    }

    /// Parse a configuration from TOML text.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents).context("Could not parse config")?;
        Ok(config)
    }

    pub fn panel(&self, pannumber: &str) -> Option<&PanelSettings> {
        self.panels.get(pannumber)
    }

    /// Pan numbers accepted by the SampleSheet validator
    pub fn allowed_panels(&self) -> BTreeSet<String> {
        self.panels.keys().cloned().collect()
    }

    pub fn tso_panels(&self) -> BTreeSet<String> {
        self.pannos_where(|panel| panel.pipeline == Pipeline::Tso500)
    }

    pub fn development_panels(&self) -> BTreeSet<String> {
        self.pannos_where(|panel| panel.development_run || panel.pipeline == Pipeline::Dev)
    }

    /// Core capture panel -> pan numbers analysed against it
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let vcp = config.vcp_panels();
    /// assert_eq!(vcp["vcp2"], vec!["Pan4119", "Pan4121"]);
    /// ```
    pub fn vcp_panels(&self) -> BTreeMap<String, Vec<String>> {
        let mut vcp: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (panno, panel) in &self.panels {
            if let Some(core) = &panel.core_panel {
                vcp.entry(core.clone()).or_default().push(panno.clone());
            }
        }
        vcp
    }

    /// Pan numbers that receive exome-depth CNV calling
    pub fn ed_pannos(&self) -> BTreeSet<String> {
        self.pannos_where(|panel| panel.core_panel.is_some() && panel.ed_cnvcalling_bedfile.is_some())
    }

    fn pannos_where<F: Fn(&PanelSettings) -> bool>(&self, predicate: F) -> BTreeSet<String> {
        self.panels
            .iter()
            .filter(|(_, panel)| predicate(panel))
            .map(|(panno, _)| panno.clone())
            .collect()
    }

    pub fn pipeline_version(&self, pipeline: Pipeline) -> &str {
        self.sql
            .pipeline_versions
            .get(pipeline.as_str())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_novaseq(&self, runfolder_name: &str) -> bool {
        runfolder_name.contains(&self.general.novaseq_id)
    }
}

/// Render a command template, substituting `{key}` fields.
///
/// Placeholders without a value are left untouched so shell
/// variables such as `${PROJECT_ID}` survive rendering.
///
/// # Example
///
/// ```rust,ignore
/// let cmd = render("dx describe {id} --name", &[("id", "project-123")]);
/// assert_eq!(cmd, "dx describe project-123 --name");
/// ```
pub fn render(template: &str, fields: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in fields {
        rendered = rendered.replace(&format!("{{{}}}", key), value);
    }
    rendered
}

fn default_priority() -> u8 {
    1
}

fn deserialize_regex<'de, D>(deserializer: D) -> Result<Regex, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let pattern = String::deserialize(deserializer)?;
    Regex::new(&pattern).map_err(serde::de::Error::custom)
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let date = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(serde::de::Error::custom)
}
