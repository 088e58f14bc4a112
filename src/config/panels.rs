use serde::Deserialize;

use crate::pipeline::Pipeline;

/// Settings for one entry of the panel catalogue, keyed by pan number.
///
/// Bedfile fields are optional; when absent the conventional
/// `<bedfile_folder><panno>data*.bed` names are used.
#[derive(Deserialize, Debug, Clone)]
pub struct PanelSettings {
    pub panel_name: String,
    pub pipeline: Pipeline,
    #[serde(default)]
    pub core_panel: Option<String>,
    #[serde(default)]
    pub capture_type: Option<String>,
    #[serde(default)]
    pub hsmetrics_bedfile: Option<String>,
    #[serde(default)]
    pub sambamba_bedfile: Option<String>,
    #[serde(default)]
    pub variant_calling_bedfile: Option<String>,
    #[serde(default)]
    pub ed_readcount_bedfile: Option<String>,
    #[serde(default)]
    pub ed_cnvcalling_bedfile: Option<String>,
    #[serde(default)]
    pub rpkm_bedfile: Option<String>,
    #[serde(default)]
    pub clinical_coverage_depth: Option<u32>,
    #[serde(default = "default_basecall_qual")]
    pub coverage_min_basecall_qual: u32,
    #[serde(default = "default_mapping_qual")]
    pub coverage_min_mapping_qual: u32,
    #[serde(default)]
    pub gatk_padding: Option<u32>,
    #[serde(default)]
    pub masked_reference: Option<String>,
    #[serde(default)]
    pub congenica_project: Option<CongenicaProject>,
    #[serde(default)]
    pub fh: bool,
    #[serde(default)]
    pub polyedge: Option<Polyedge>,
    #[serde(default)]
    pub throughput: Throughput,
    #[serde(default)]
    pub drylab_dnanexus_id: Option<String>,
    #[serde(default)]
    pub development_run: bool,
}

/// Decision-support destination: a numeric Congenica project or the SFTP route
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CongenicaProject {
    Id(u32),
    Named(String),
}

impl CongenicaProject {
    pub fn is_sftp(&self) -> bool {
        matches!(self, CongenicaProject::Named(name) if name.eq_ignore_ascii_case("SFTP"))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Polyedge {
    pub gene: String,
    pub chrom: String,
    pub poly_start: u64,
    pub poly_end: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Throughput {
    High,
    #[default]
    Low,
}

/// Bedfile paths resolved for one pan number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bedfiles {
    pub hsmetrics: String,
    pub sambamba: String,
    pub variant_calling: String,
    pub ed_readcount: Option<String>,
    pub ed_cnvcalling: Option<String>,
    pub rpkm: Option<String>,
}

impl PanelSettings {
    /// Resolve bedfile references for `panno` against the bedfile folder.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let beds = panel.bedfiles("Pan4119", "project-xyz:/Data/BED/");
    /// assert_eq!(beds.sambamba, "project-xyz:/Data/BED/Pan4119dataSambamba.bed");
    /// ```
    pub fn bedfiles(&self, panno: &str, bedfile_folder: &str) -> Bedfiles {
        let resolve = |name: &Option<String>, default: String| {
            format!(
                "{}{}",
                bedfile_folder,
                name.clone().unwrap_or(default)
            )
        };
        let optional = |name: &Option<String>| {
            name.as_ref()
                .map(|name| format!("{}{}", bedfile_folder, name))
        };

        Bedfiles {
            hsmetrics: resolve(&self.hsmetrics_bedfile, format!("{}data.bed", panno)),
            sambamba: resolve(&self.sambamba_bedfile, format!("{}dataSambamba.bed", panno)),
            variant_calling: resolve(&self.variant_calling_bedfile, format!("{}data.bed", panno)),
            ed_readcount: optional(&self.ed_readcount_bedfile),
            ed_cnvcalling: optional(&self.ed_cnvcalling_bedfile),
            rpkm: optional(&self.rpkm_bedfile),
        }
    }

    /// Numeric part of a pan number, recorded by oncology SQL queries
    pub fn panel_id(panno: &str) -> &str {
        panno.trim_start_matches("Pan")
    }
}

fn default_basecall_qual() -> u32 {
    25
}

fn default_mapping_qual() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn panel(toml_text: &str) -> PanelSettings {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_congenica_project_variants() {
        let sftp = panel("panel_name = \"x\"\npipeline = \"pipe\"\ncongenica_project = \"SFTP\"\n");
        let numeric = panel("panel_name = \"x\"\npipeline = \"pipe\"\ncongenica_project = 4203\n");

        assert!(sftp.congenica_project.unwrap().is_sftp());
        assert_eq!(numeric.congenica_project, Some(CongenicaProject::Id(4203)));
        assert_eq!(numeric.throughput, Throughput::Low);
        assert_eq!(numeric.coverage_min_basecall_qual, 25);
    }

    #[test]
    fn test_bedfile_defaults_and_overrides() {
        let settings = panel(
            "panel_name = \"x\"\npipeline = \"pipe\"\nsambamba_bedfile = \"Pan4397dataSambamba.bed\"\n",
        );
        let beds = settings.bedfiles("Pan4119", "project-bed:/");

        assert_eq!(beds.hsmetrics, "project-bed:/Pan4119data.bed");
        assert_eq!(beds.sambamba, "project-bed:/Pan4397dataSambamba.bed");
        assert_eq!(beds.ed_readcount, None);
        assert_eq!(PanelSettings::panel_id("Pan4119"), "4119");
    }
}
