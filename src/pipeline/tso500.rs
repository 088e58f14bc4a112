use anyhow::Context;

use std::path::{Path, PathBuf};

use crate::config::Throughput;
use crate::consts::*;
use crate::core::samples::SampleObject;
use crate::executor::job::{depends_add, project_file, Job};
use crate::pipeline::archerdx::fastqc_cmd;
use crate::pipeline::{DispatchContext, PipelineVariant};
use crate::toolbox::{read_lines, write_lines, WriteMode};

/// TSO500 solid-tumour panels.
///
/// Demultiplexing and analysis happen in the cloud, one app run per
/// SampleSheet part. Per-sample QC is set off afterwards from the
/// post-run script.
pub struct Tso500;

impl PipelineVariant for Tso500 {
    fn sample_cmd(&self, sample: &SampleObject, ctx: &DispatchContext) -> String {
        fastqc_cmd(sample, ctx)
    }

    /// One TSO500 app run per uploaded SampleSheet part
    fn runwide_cmds(&self, samples: &[SampleObject], ctx: &DispatchContext) -> Vec<String> {
        let options = if ctx.novaseq() {
            ctx.config.dnanexus.tso_novaseq_option.as_str()
        } else {
            ""
        };
        let instances = &ctx.config.dnanexus.instances;
        let instance = if samples
            .iter()
            .any(|sample| sample.panel.throughput == Throughput::High)
        {
            &instances.tso_high_throughput
        } else {
            &instances.tso_low_throughput
        };

        let mut lines = Vec::new();
        for part in &ctx.tso_parts {
            let job = Job::run(&ctx.config.dnanexus.apps.tso500_app)
                .input(
                    "samplesheet",
                    project_file(&format!("/{}/{}", ctx.runfolder_name, part)),
                )
                .input("project_name", format!("${{{}}}", PROJECT_NAME))
                .input("runfolder_name", format!("${{{}}}", RUNFOLDER_NAME))
                .input("analysis_options", format!("\"{}\"", options))
                .arg(&format!("--instance-type {}", instance))
                .auth(&ctx.auth)
                .capture();
            lines.push(job);
            lines.push(depends_add(DEPENDS_LIST));
        }

        lines
    }
}

/// Names of the SampleSheet parts for a run of `n_samples`, `batch_size` per part.
///
/// # Example
///
/// ```rust,ignore
/// let parts = samplesheet_parts("250101_A01229_0001_AXXX", 12, 9);
/// assert_eq!(parts[1], "250101_A01229_0001_AXXX_SampleSheetPart2of2.csv");
/// ```
pub fn samplesheet_parts(runfolder_name: &str, n_samples: usize, batch_size: usize) -> Vec<String> {
    let n_parts = n_samples.div_ceil(batch_size.max(1));
    (1..=n_parts)
        .map(|i| {
            format!(
                "{}_{}{}of{}.csv",
                runfolder_name, TSO_SAMPLESHEET_PART, i, n_parts
            )
        })
        .collect()
}

/// Split a SampleSheet into parts of at most `batch_size` samples.
///
/// Every part keeps the full header, up to and including the `Sample_ID`
/// column row of the `[Data]` section. Parts are written to `dest`.
///
/// # Example
///
/// ```rust,ignore
/// let parts = write_samplesheet_parts(&rf.samplesheet_path, &rf.runfolderpath, &rf.runfolder_name, 9)?;
/// ```
pub fn write_samplesheet_parts(
    samplesheet: &Path,
    dest: &Path,
    runfolder_name: &str,
    batch_size: usize,
) -> anyhow::Result<Vec<PathBuf>> {
    let lines = read_lines(samplesheet)?;
    let columns = lines
        .iter()
        .position(|line| line.starts_with("Sample_ID"))
        .with_context(|| format!("No [Data] column row in {}", samplesheet.display()))?;

    let (header, rows) = lines.split_at(columns + 1);
    let rows: Vec<&String> = rows
        .iter()
        .filter(|row| !row.trim_matches(|c: char| c == ',' || c.is_whitespace()).is_empty())
        .collect();

    let names = samplesheet_parts(runfolder_name, rows.len(), batch_size);
    let mut written = Vec::with_capacity(names.len());
    for (name, batch) in names.iter().zip(rows.chunks(batch_size.max(1))) {
        let path = dest.join(name);
        let part: Vec<&str> = header
            .iter()
            .map(String::as_str)
            .chain(batch.iter().map(|row| row.as_str()))
            .collect();
        write_lines(&path, WriteMode::Truncate, &part)?;
        written.push(path);
    }

    Ok(written)
}

/// Post-run QC lines for one TSO run.
///
/// Returns the per-sample FastQC and sompy lines, and separately the
/// sambamba coverage lines which are emitted after MultiQC. Negative
/// controls are not added to the depends list.
pub fn post_run_sample_cmds(
    samples: &[SampleObject],
    ctx: &DispatchContext,
) -> (Vec<String>, Vec<String>) {
    let apps = &ctx.config.dnanexus.apps;
    let mut lines = Vec::new();
    let mut sambamba = Vec::new();

    for sample in samples {
        let name = &sample.sample_name;
        lines.push(format!("{}=$({})", JOB_ID, sample.workflow_cmd));
        lines.push(depends_add(DEPENDS_LIST));

        let beds = sample
            .panel
            .bedfiles(&sample.pannumber, &ctx.config.paths.bedfile_folder);
        let mut coverage = Job::run(&apps.sambamba_app)
            .name(name)
            .input(
                "bamfile",
                project_file(&format!("{}/{}/{}.bam", TSO_BAM_DIR, name, name)),
            )
            .input("sambamba_bed", &beds.sambamba)
            .input("min_base_qual", sample.panel.coverage_min_basecall_qual)
            .input("min_mapping_qual", sample.panel.coverage_min_mapping_qual)
            .input("additional_filter_commands", SAMBAMBA_FILTER);
        if let Some(depth) = sample.panel.clinical_coverage_depth {
            coverage = coverage.input("coverage_level", depth);
        }
        sambamba.push(coverage.dest(QC_DIR).auth(&ctx.auth).capture());
        if !sample.neg_control {
            sambamba.push(depends_add(DEPENDS_LIST));
        }

        if sample.pos_control {
            let sompy = Job::run(&apps.sompy_app)
                .name(name)
                .input(
                    "queryVCF",
                    project_file(&format!(
                        "{}/{}/{}_MergedSmallVariants.genome.vcf",
                        TSO_RESULTS_DIR, name, name
                    )),
                )
                .input("TSO", true)
                .dest(QC_DIR)
                .auth(&ctx.auth)
                .capture();
            lines.push(sompy);
            lines.push(depends_add(DEPENDS_LIST));
        }
    }

    (lines, sambamba)
}
