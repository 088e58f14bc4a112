use serde::Deserialize;

use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::core::samples::SampleObject;

pub mod archerdx;
pub mod custom_panels;
pub mod snp;
pub mod tso500;
pub mod wes;

/// Analysis pipeline a panel is processed with
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Wes,
    Pipe,
    Snp,
    Archerdx,
    Tso500,
    Dev,
}

impl Pipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Wes => "wes",
            Pipeline::Pipe => "pipe",
            Pipeline::Snp => "snp",
            Pipeline::Archerdx => "archerdx",
            Pipeline::Tso500 => "tso500",
            Pipeline::Dev => "dev",
        }
    }

    /// Token closing the cloud project name
    pub fn runtype(&self) -> &'static str {
        match self {
            Pipeline::Wes => "WES",
            Pipeline::Pipe => "CP",
            Pipeline::Snp => "SNP",
            Pipeline::Archerdx => "ADX",
            Pipeline::Tso500 => "TSO500",
            Pipeline::Dev => "DEV",
        }
    }

    pub fn is_tso(&self) -> bool {
        *self == Pipeline::Tso500
    }

    pub fn is_oncology(&self) -> bool {
        matches!(self, Pipeline::Tso500 | Pipeline::Archerdx)
    }

    /// Pipelines whose results are uploaded to a decision-support tool
    pub fn has_decision_support(&self) -> bool {
        matches!(self, Pipeline::Wes | Pipeline::Pipe | Pipeline::Tso500)
    }

    /// Command builders for this pipeline. Development panels have none.
    pub fn variant(&self) -> Option<&'static dyn PipelineVariant> {
        match self {
            Pipeline::Wes => Some(&wes::Wes),
            Pipeline::Pipe => Some(&custom_panels::CustomPanels),
            Pipeline::Snp => Some(&snp::Snp),
            Pipeline::Archerdx => Some(&archerdx::ArcherDx),
            Pipeline::Tso500 => Some(&tso500::Tso500),
            Pipeline::Dev => None,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run-level values shared by every generated cloud command
#[derive(Debug, Clone)]
pub struct DispatchContext<'a> {
    pub config: &'a Config,
    pub runfolder_name: String,
    pub proj_name: String,
    pub auth: String,
    pub decision_support_script: PathBuf,
    /// SampleSheet part files uploaded for a TSO run
    pub tso_parts: Vec<String>,
}

impl<'a> DispatchContext<'a> {
    pub fn novaseq(&self) -> bool {
        self.config.is_novaseq(&self.runfolder_name)
    }
}

/// Per-pipeline command generation
pub trait PipelineVariant: Sync {
    /// Per-sample workflow or app dispatch command, without `JOB_ID` capture
    fn sample_cmd(&self, sample: &SampleObject, ctx: &DispatchContext) -> String;

    /// Dispatch-script lines emitted after every sample has been dispatched
    fn runwide_cmds(&self, samples: &[SampleObject], ctx: &DispatchContext) -> Vec<String>;
}

/// Cloud reference to a sample's read, or an empty string if absent
pub(crate) fn read_ref(sample: &SampleObject, read: &str) -> String {
    sample
        .fastqs
        .get(read)
        .map(|fastq| crate::executor::job::project_file(&fastq.cloud_path))
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::core::samples::{FastqFile, SampleObject};
    use std::collections::BTreeMap;

    pub(crate) fn ctx(config: &Config) -> DispatchContext<'_> {
        DispatchContext {
            config,
            runfolder_name: "250101_A01229_0001_AXXX".to_string(),
            proj_name: "002_250101_A01229_0001_AXXX_NGS999_CP".to_string(),
            auth: "tok".to_string(),
            decision_support_script: PathBuf::from("/logs/ds.sh"),
            tso_parts: Vec::new(),
        }
    }

    pub(crate) fn sample(config: &Config, name: &str, panno: &str) -> SampleObject {
        let panel = config.panel(panno).cloned().unwrap();
        let fastqs: BTreeMap<String, FastqFile> = ["R1", "R2"]
            .iter()
            .map(|read| {
                let fastq = format!("{}_S1_{}_001.fastq.gz", name, read);
                (
                    read.to_string(),
                    FastqFile {
                        cloud_path: format!("/Data/Intensities/BaseCalls/{}", fastq),
                        name: fastq,
                        local_path: None,
                    },
                )
            })
            .collect();

        SampleObject {
            sample_name: name.to_string(),
            pannumber: panno.to_string(),
            pipeline: panel.pipeline,
            panel,
            primary_identifier: name.split('_').nth(2).unwrap_or("").to_string(),
            secondary_identifier: None,
            fastqs,
            pos_control: name.contains("_NA12878_"),
            neg_control: name.contains("NTCcon"),
            workflow_cmd: String::new(),
            decision_support_cmd: None,
            query: None,
        }
    }

    #[test]
    fn test_pipeline_tokens() {
        assert_eq!(Pipeline::Pipe.runtype(), "CP");
        assert_eq!(Pipeline::Tso500.to_string(), "tso500");
        assert!(Pipeline::Archerdx.is_oncology());
        assert!(!Pipeline::Snp.has_decision_support());
        assert!(Pipeline::Dev.variant().is_none());
        assert!(Pipeline::Wes.variant().is_some());
    }

    #[test]
    fn test_read_ref() {
        let config = test_config();
        let s = sample(&config, "NGS999_01_DNA1_Pan4119", "Pan4119");
        assert_eq!(
            read_ref(&s, "R2"),
            "${PROJECT_ID}:/Data/Intensities/BaseCalls/NGS999_01_DNA1_Pan4119_S1_R2_001.fastq.gz"
        );
        assert_eq!(read_ref(&s, "R3"), "");
    }
}
