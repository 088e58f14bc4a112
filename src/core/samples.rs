use anyhow::Context;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{render, Config, PanelSettings};
use crate::consts::*;
use crate::errors::AutomationError;
use crate::logger::AdLogger;
use crate::pipeline::{DispatchContext, Pipeline};
use crate::samplesheet::{find_panno, parse_data_section};
use crate::toolbox::RunfolderObject;

lazy_static! {
    static ref FASTQ_SAMPLE: Regex =
        Regex::new(r"^(?P<sample>.+?)_S\d+_(?:L\d{3}_)?R[12]_001\.fastq\.gz$").unwrap();
}

/// One read of a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqFile {
    pub name: String,
    pub local_path: Option<PathBuf>,
    pub cloud_path: String,
}

/// Everything derived for one sample of a run
#[derive(Debug, Clone)]
pub struct SampleObject {
    pub sample_name: String,
    pub pannumber: String,
    pub pipeline: Pipeline,
    pub panel: PanelSettings,
    pub primary_identifier: String,
    pub secondary_identifier: Option<String>,
    pub fastqs: BTreeMap<String, FastqFile>,
    pub pos_control: bool,
    pub neg_control: bool,
    pub workflow_cmd: String,
    pub decision_support_cmd: Option<String>,
    pub query: Option<String>,
}

impl SampleObject {
    pub fn is_control(&self) -> bool {
        self.pos_control || self.neg_control
    }

    pub fn local_fastqs(&self) -> Vec<&Path> {
        self.fastqs
            .values()
            .filter_map(|fastq| fastq.local_path.as_deref())
            .collect()
    }
}

/// Cloud locations for a run's project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudPaths {
    pub fastqs_dir: String,
    pub logfiles_dir: String,
    pub samplesheet_path: String,
}

/// Samples of one runfolder plus run-wide attributes.
///
/// # Example
///
/// ```rust,ignore
/// let run = CollectRunfolderSamples::new(&rf, &config, &auth, &logger)?;
/// println!("{} -> {}", run.proj_name, run.pipeline);
/// ```
#[derive(Debug, Clone)]
pub struct CollectRunfolderSamples {
    pub runfolder_name: String,
    pub samples: Vec<SampleObject>,
    pub pipeline: Pipeline,
    pub development_run: bool,
    pub runtype_suffix: String,
    pub proj_name: String,
    pub cloud_paths: CloudPaths,
    pub fastq_list: Vec<PathBuf>,
    pub undetermined_fastqs: Vec<PathBuf>,
}

/// Sample names and their pan numbers from the `[Data]` section, in SampleSheet order.
///
/// Rows without a `Pan\d+` token are dropped.
pub fn read_samplesheet_samples(samplesheet: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(samplesheet)
        .with_context(|| format!("Could not read {}", samplesheet.display()))?;
    let Some(section) = parse_data_section(&contents)? else {
        return Ok(Vec::new());
    };

    Ok(section
        .rows
        .into_iter()
        .filter_map(|row| {
            let panno = find_panno(&row.sample_name)?.to_string();
            Some((row.sample_name, panno))
        })
        .unique_by(|(name, _)| name.clone())
        .collect())
}

impl CollectRunfolderSamples {
    /// Collect the samples of a runfolder and derive run-wide attributes.
    ///
    /// # Arguments
    ///
    /// * `rf` - Runfolder paths.
    /// * `config` - Process configuration.
    /// * `auth` - Cloud auth token, embedded in generated commands.
    /// * `logger` - Scope logger.
    ///
    /// # Errors
    ///
    /// `AutomationError::MixedPipelines` if the samples belong to more than one pipeline.
    pub fn new(
        rf: &RunfolderObject,
        config: &Config,
        auth: &str,
        logger: &AdLogger,
    ) -> anyhow::Result<Self> {
        let rows = read_samplesheet_samples(&rf.samplesheet_path)?;

        let mut known = Vec::new();
        for (name, panno) in rows {
            match config.panel(&panno) {
                Some(panel) => known.push((name, panno, panel)),
                None => logger.error(format!(
                    "Sample {} has pan number {} which is not in the panel catalogue. Skipping sample",
                    name, panno
                )),
            }
        }

        let pipeline = run_pipeline(&rf.runfolder_name, known.iter().map(|(_, _, p)| p.pipeline))?;
        let development_run = known
            .iter()
            .any(|(_, _, panel)| panel.development_run || panel.pipeline == Pipeline::Dev);

        let names: Vec<&str> = known.iter().map(|(name, _, _)| name.as_str()).collect();
        let runtype_suffix = runtype_suffix(&names, pipeline, config);
        let proj_name = format!(
            "{}{}_{}",
            config.general.prod_prefix, rf.runfolder_name, runtype_suffix
        );
        let fastqs_dir = if pipeline.is_tso() {
            TSO_FASTQS_DIR.to_string()
        } else {
            format!("/{}", FASTQ_SUBDIR)
        };
        let cloud_paths = CloudPaths {
            samplesheet_path: format!("{}/{}", fastqs_dir, rf.samplesheet_name),
            logfiles_dir: format!("/{}/{}", proj_name, LOGFILES_DIR),
            fastqs_dir,
        };

        let ctx = DispatchContext {
            config,
            runfolder_name: rf.runfolder_name.clone(),
            proj_name: proj_name.clone(),
            auth: auth.to_string(),
            decision_support_script: rf.decision_support_script.clone(),
            tso_parts: Vec::new(),
        };
        let local_fastqs = list_fastqs(&rf.fastq_dir);

        let mut samples = Vec::new();
        for (index, (name, panno, panel)) in known.iter().enumerate() {
            let fastqs = if pipeline.is_tso() {
                tso_fastqs(name, index + 1)
            } else {
                match resolve_fastqs(name, &local_fastqs, &cloud_paths.fastqs_dir) {
                    Some(fastqs) => fastqs,
                    None => {
                        logger.warning(format!(
                            "FASTQs for sample {} were not found in {}. Sample excluded from this run",
                            name,
                            rf.fastq_dir.display()
                        ));
                        continue;
                    }
                }
            };
            samples.push(SampleObject::new(name, panno, panel, fastqs, &ctx));
        }

        let mut run = Self {
            runfolder_name: rf.runfolder_name.clone(),
            samples,
            pipeline,
            development_run,
            runtype_suffix,
            proj_name,
            cloud_paths,
            fastq_list: Vec::new(),
            undetermined_fastqs: Vec::new(),
        };

        let mut unmatched = Vec::new();
        if !pipeline.is_tso() {
            unmatched = run.validate_fastqs(&local_fastqs, &ctx, logger);
            run.undetermined_fastqs = local_fastqs
                .iter()
                .filter(|path| file_name(path).starts_with(UNDETERMINED))
                .cloned()
                .collect();
        }
        run.fastq_list = run
            .samples
            .iter()
            .flat_map(|sample| sample.local_fastqs())
            .map(Path::to_path_buf)
            .chain(unmatched)
            .collect();

        Ok(run)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_names(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.sample_name.as_str()).collect()
    }

    pub fn pannumbers(&self) -> Vec<&str> {
        self.samples
            .iter()
            .map(|s| s.pannumber.as_str())
            .unique()
            .sorted()
            .collect()
    }

    /// Per-sample SQL updates, or the single run-level update for WES
    pub fn queries(&self, config: &Config) -> Vec<String> {
        if self.pipeline == Pipeline::Wes {
            let ids = self
                .samples
                .iter()
                .filter(|s| !s.is_control())
                .map(|s| format!("'{}'", s.primary_identifier))
                .unique()
                .join(", ");
            if ids.is_empty() {
                return Vec::new();
            }
            return vec![render(
                &config.sql.wes_query,
                &[("identifiers", ids.as_str()), ("runfolder", self.runfolder_name.as_str())],
            )];
        }

        self.samples.iter().filter_map(|s| s.query.clone()).collect()
    }

    /// Cross-check the FASTQ directory against the SampleSheet.
    ///
    /// A FASTQ with no matching sample is logged and added under the inferred
    /// sample name, provided its pan number is in the catalogue. FASTQs no
    /// sample can be built for are returned so they are still uploaded.
    fn validate_fastqs(
        &mut self,
        local_fastqs: &[PathBuf],
        ctx: &DispatchContext,
        logger: &AdLogger,
    ) -> Vec<PathBuf> {
        let config = ctx.config;
        let mut unmatched = Vec::new();

        for path in local_fastqs {
            let name = file_name(path);
            if name.starts_with(UNDETERMINED) {
                continue;
            }

            let inferred = FASTQ_SAMPLE
                .captures(name)
                .and_then(|caps| caps.name("sample"))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| name.trim_end_matches(FASTQ_GZ).to_string());
            if self.samples.iter().any(|s| s.sample_name == inferred) {
                continue;
            }

            logger.error(format!(
                "FASTQ {} does not match any sample in the SampleSheet (inferred sample {})",
                name, inferred
            ));

            let Some((panno, panel)) = find_panno(&inferred)
                .and_then(|panno| config.panel(panno).map(|panel| (panno.to_string(), panel)))
            else {
                logger.warning(format!(
                    "FASTQ {} has no known pan number. Uploaded without a workflow",
                    name
                ));
                unmatched.push(path.clone());
                continue;
            };

            if !config.general.sample_name_pattern.is_match(&inferred) {
                logger.error(format!(
                    "Sample {} does not match the sample naming schema",
                    inferred
                ));
            }

            match resolve_fastqs(&inferred, local_fastqs, &self.cloud_paths.fastqs_dir) {
                Some(fastqs) => {
                    logger.warning(format!("Adding sample {} found in the FASTQ directory", inferred));
                    self.samples
                        .push(SampleObject::new(&inferred, &panno, panel, fastqs, ctx));
                }
                None => {
                    logger.warning(format!(
                        "Sample {} is missing a read. {} uploaded without a workflow",
                        inferred, name
                    ));
                    unmatched.push(path.clone());
                }
            }
        }

        unmatched
    }
}

impl SampleObject {
    /// Derive a sample and its generated commands.
    pub fn new(
        sample_name: &str,
        pannumber: &str,
        panel: &PanelSettings,
        fastqs: BTreeMap<String, FastqFile>,
        ctx: &DispatchContext,
    ) -> Self {
        let config = ctx.config;
        let general = &config.general;
        let pipeline = panel.pipeline;

        let neg_control = general.ntc_ids.iter().any(|id| sample_name.contains(id.as_str()));
        let pos_control = general
            .reference_sample_ids
            .iter()
            .any(|id| sample_name.contains(&format!("_{}_", id)));

        let parts: Vec<&str> = sample_name.split('_').collect();
        let primary_identifier = parts.get(2).copied().unwrap_or_default().to_string();
        let secondary_identifier = if pipeline.is_oncology() && !(pos_control || neg_control) {
            parts.get(3).map(|id| id.to_string())
        } else {
            None
        };

        let mut sample = Self {
            sample_name: sample_name.to_string(),
            pannumber: pannumber.to_string(),
            pipeline,
            panel: panel.clone(),
            primary_identifier,
            secondary_identifier,
            fastqs,
            pos_control,
            neg_control,
            workflow_cmd: String::new(),
            decision_support_cmd: None,
            query: None,
        };

        if let Some(variant) = pipeline.variant() {
            sample.workflow_cmd = variant.sample_cmd(&sample, ctx);
        }
        sample.decision_support_cmd = crate::core::dispatch::decision_support_cmd(&sample, ctx);
        sample.query = sample.sql_query(config, &ctx.runfolder_name);
        sample
    }

    fn sql_query(&self, config: &Config, runfolder_name: &str) -> Option<String> {
        if self.is_control() {
            return None;
        }

        let version = config.pipeline_version(self.pipeline);
        match self.pipeline {
            Pipeline::Tso500 | Pipeline::Archerdx => Some(render(
                &config.sql.oncology_query,
                &[
                    ("primary", self.primary_identifier.as_str()),
                    ("secondary", self.secondary_identifier.as_deref().unwrap_or("")),
                    ("runfolder", runfolder_name),
                    ("pipeline_version", version),
                    ("panel_id", PanelSettings::panel_id(&self.pannumber)),
                ],
            )),
            Pipeline::Pipe | Pipeline::Snp => Some(render(
                &config.sql.customrun_query,
                &[
                    ("primary", self.primary_identifier.as_str()),
                    ("pipeline_version", version),
                    ("runfolder", runfolder_name),
                ],
            )),
            Pipeline::Wes | Pipeline::Dev => None,
        }
    }
}

/// The single pipeline shared by every sample.
fn run_pipeline<I: IntoIterator<Item = Pipeline>>(
    runfolder_name: &str,
    pipelines: I,
) -> anyhow::Result<Pipeline> {
    let counts = pipelines.into_iter().counts();
    if counts.len() > 1 {
        return Err(AutomationError::MixedPipelines {
            runfolder: runfolder_name.to_string(),
            pipelines: counts.keys().sorted().join(", "),
        }
        .into());
    }

    // INFO: an empty SampleSheet yields an empty run, the pipeline is irrelevant
    Ok(counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(pipeline, _)| pipeline)
        .unwrap_or(Pipeline::Dev))
}

/// Library preps, WES batches (WES only), then the run type token, joined by `_`.
///
/// # Example
///
/// ```rust,ignore
/// let suffix = runtype_suffix(&["NGS999_01_DNA1_Pan4119"], Pipeline::Pipe, &config);
/// assert_eq!(suffix, "NGS999_CP");
/// ```
pub fn runtype_suffix(names: &[&str], pipeline: Pipeline, config: &Config) -> String {
    let general = &config.general;
    let mut tokens: Vec<String> = names
        .iter()
        .filter_map(|name| general.sample_name_pattern.captures(name))
        .filter_map(|caps| caps.name("libprep").map(|m| m.as_str().to_string()))
        .unique()
        .sorted()
        .collect();

    if pipeline == Pipeline::Wes {
        tokens.extend(
            names
                .iter()
                .filter_map(|name| general.wes_batch_pattern.find(name))
                .map(|m| m.as_str().to_string())
                .unique()
                .sorted(),
        );
    }

    tokens.push(pipeline.runtype().to_string());
    tokens.join("_")
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|name| name.to_str()).unwrap_or("")
}

/// `*.fastq.gz` files in the FASTQ directory, sorted by name
pub fn list_fastqs(fastq_dir: &Path) -> Vec<PathBuf> {
    let mut fastqs: Vec<PathBuf> = std::fs::read_dir(fastq_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && file_name(path).ends_with(FASTQ_GZ))
                .collect()
        })
        .unwrap_or_default();
    fastqs.sort();
    fastqs
}

/// Match both reads of a sample in the FASTQ directory, or `None` if either is missing.
fn resolve_fastqs(
    sample_name: &str,
    local_fastqs: &[PathBuf],
    fastqs_dir: &str,
) -> Option<BTreeMap<String, FastqFile>> {
    let prefix = format!("{}_", sample_name);
    let mut fastqs = BTreeMap::new();

    for read in READS {
        let marker = format!("_{}_", read);
        let path = local_fastqs.iter().find(|path| {
            let name = file_name(path);
            name.starts_with(&prefix) && name.contains(&marker)
        })?;
        let name = file_name(path).to_string();
        fastqs.insert(
            read.to_string(),
            FastqFile {
                cloud_path: format!("{}/{}", fastqs_dir, name),
                name,
                local_path: Some(path.clone()),
            },
        );
    }

    Some(fastqs)
}

/// Cloud-side FASTQ names for a TSO sample; sample numbers follow SampleSheet order
fn tso_fastqs(sample_name: &str, sample_number: usize) -> BTreeMap<String, FastqFile> {
    READS
        .iter()
        .map(|read| {
            let name = format!("{}_S{}_{}_001{}", sample_name, sample_number, read, FASTQ_GZ);
            (
                read.to_string(),
                FastqFile {
                    cloud_path: format!("{}/{}/{}", TSO_FASTQS_DIR, sample_name, name),
                    name,
                    local_path: None,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use pretty_assertions::assert_eq;

    const RF: &str = "250101_A01229_0001_AXXX";

    fn setup(rows: &[&str], fastqs: &[&str]) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.paths.runfolders = dir.path().join("runfolders");
        config.paths.samplesheets_dir = dir.path().join("samplesheets");
        config.paths.ad_logfiles = dir.path().join("logs");
        for path in [
            &config.paths.samplesheets_dir,
            &config.paths.ad_logfiles,
        ] {
            std::fs::create_dir_all(path).unwrap();
        }
        let fastq_dir = config.paths.runfolders.join(RF).join(FASTQ_SUBDIR);
        std::fs::create_dir_all(&fastq_dir).unwrap();

        let mut sheet = String::from("[Header]\nInvestigator Name,lab\n[Data]\nSample_ID,Sample_Name,index\n");
        for row in rows {
            sheet.push_str(&format!("{},{},ACGT\n", row, row));
        }
        std::fs::write(
            config.paths.samplesheets_dir.join(format!("{}_SampleSheet.csv", RF)),
            sheet,
        )
        .unwrap();
        for fastq in fastqs {
            std::fs::write(fastq_dir.join(fastq), "@r\nACGT\n+\nFFFF\n").unwrap();
        }

        (dir, config)
    }

    fn collect(config: &Config) -> anyhow::Result<CollectRunfolderSamples> {
        let rf = RunfolderObject::new(RF, config, "ts");
        CollectRunfolderSamples::new(&rf, config, "tok", &AdLogger::console("samples_test", "ts"))
    }

    #[test]
    fn test_collect_pipe_run() {
        let (_dir, config) = setup(
            &["NGS999_01_DNA1_Pan4119", "NGS999_02_NA12878_Pan4119"],
            &[
                "NGS999_01_DNA1_Pan4119_S1_R1_001.fastq.gz",
                "NGS999_01_DNA1_Pan4119_S1_R2_001.fastq.gz",
                "NGS999_02_NA12878_Pan4119_S2_R1_001.fastq.gz",
                "NGS999_02_NA12878_Pan4119_S2_R2_001.fastq.gz",
                "Undetermined_S0_R1_001.fastq.gz",
            ],
        );

        let run = collect(&config).unwrap();
        assert_eq!(run.pipeline, Pipeline::Pipe);
        assert_eq!(run.runtype_suffix, "NGS999_CP");
        assert_eq!(
            run.proj_name,
            format!("{}{}_NGS999_CP", config.general.prod_prefix, RF)
        );
        assert_eq!(run.samples.len(), 2);
        assert_eq!(run.fastq_list.len(), 4);
        assert_eq!(run.undetermined_fastqs.len(), 1);
        assert_eq!(
            run.cloud_paths.logfiles_dir,
            format!("/{}/automated_scripts_logfiles", run.proj_name)
        );

        let control = &run.samples[1];
        assert!(control.pos_control);
        assert!(control.query.is_none());
        assert!(control.decision_support_cmd.is_none());
        assert_eq!(run.samples[0].primary_identifier, "DNA1");
        assert!(run.samples[0].query.as_deref().unwrap().contains("DNA1"));
        assert_eq!(run.queries(&config).len(), 1);
    }

    #[test]
    fn test_missing_read_excludes_sample() {
        let (_dir, config) = setup(
            &["NGS999_01_DNA1_Pan4119"],
            &["NGS999_01_DNA1_Pan4119_S1_R1_001.fastq.gz"],
        );

        let run = collect(&config).unwrap();
        assert!(run.is_empty());
    }

    #[test]
    fn test_unlisted_fastq_is_added() {
        let (_dir, config) = setup(
            &["NGS999_01_DNA1_Pan4119"],
            &[
                "NGS999_01_DNA1_Pan4119_S1_R1_001.fastq.gz",
                "NGS999_01_DNA1_Pan4119_S1_R2_001.fastq.gz",
                "NGS999_03_DNA3_Pan4119_S3_R1_001.fastq.gz",
                "NGS999_03_DNA3_Pan4119_S3_R2_001.fastq.gz",
                "stray_S9_R1_001.fastq.gz",
            ],
        );

        let run = collect(&config).unwrap();
        assert_eq!(run.sample_names(), vec!["NGS999_01_DNA1_Pan4119", "NGS999_03_DNA3_Pan4119"]);
        assert_eq!(run.fastq_list.len(), 5);
    }

    #[test]
    fn test_fastq_without_panel_is_still_uploaded() {
        let (_dir, config) = setup(
            &["NGS999_01_DNA1_Pan4119"],
            &[
                "NGS999_01_DNA1_Pan4119_S1_R1_001.fastq.gz",
                "NGS999_01_DNA1_Pan4119_S1_R2_001.fastq.gz",
                "NGS999_04_DNA4_Pan9999_S4_R1_001.fastq.gz",
                "stray_S9_R1_001.fastq.gz",
            ],
        );

        let run = collect(&config).unwrap();
        assert_eq!(run.sample_names(), vec!["NGS999_01_DNA1_Pan4119"]);

        let uploaded: Vec<&str> = run.fastq_list.iter().map(|path| file_name(path)).collect();
        assert_eq!(uploaded.len(), 4);
        assert!(uploaded.contains(&"NGS999_04_DNA4_Pan9999_S4_R1_001.fastq.gz"));
        assert!(uploaded.contains(&"stray_S9_R1_001.fastq.gz"));
    }

    #[test]
    fn test_mixed_pipelines_rejected() {
        let (_dir, config) = setup(
            &["NGS999_01_DNA1_Pan4119", "TSO24001_02_100002_200002_Pan5085"],
            &[],
        );

        let err = collect(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AutomationError>(),
            Some(AutomationError::MixedPipelines { .. })
        ));
    }

    #[test]
    fn test_tso_samples_have_cloud_fastqs_only() {
        let (_dir, config) = setup(
            &["TSO24001_01_100001_200001_Pan5085", "TSO24001_02_NTCcon1_Pan5085"],
            &[],
        );

        let run = collect(&config).unwrap();
        assert_eq!(run.pipeline, Pipeline::Tso500);
        assert_eq!(run.cloud_paths.fastqs_dir, TSO_FASTQS_DIR);
        assert!(run.fastq_list.is_empty());

        let sample = &run.samples[0];
        assert_eq!(sample.secondary_identifier.as_deref(), Some("200001"));
        assert_eq!(
            sample.fastqs["R2"].cloud_path,
            format!(
                "{}/TSO24001_01_100001_200001_Pan5085/TSO24001_01_100001_200001_Pan5085_S1_R2_001.fastq.gz",
                TSO_FASTQS_DIR
            )
        );
        assert!(run.samples[1].neg_control);
        assert_eq!(run.samples[1].secondary_identifier, None);
        assert_eq!(run.queries(&config).len(), 1);
    }

    #[test]
    fn test_wes_suffix_and_query() {
        let (_dir, config) = setup(
            &["NGS998_01_DNA2_WES47_Pan493", "NGS998_02_DNA3_WES47_Pan493"],
            &[
                "NGS998_01_DNA2_WES47_Pan493_S1_R1_001.fastq.gz",
                "NGS998_01_DNA2_WES47_Pan493_S1_R2_001.fastq.gz",
                "NGS998_02_DNA3_WES47_Pan493_S2_R1_001.fastq.gz",
                "NGS998_02_DNA3_WES47_Pan493_S2_R2_001.fastq.gz",
            ],
        );

        let run = collect(&config).unwrap();
        assert_eq!(run.runtype_suffix, "NGS998_WES47_WES");
        let queries = run.queries(&config);
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("'DNA2', 'DNA3'"));
    }
}
