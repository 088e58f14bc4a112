use itertools::Itertools;

use crate::consts::*;
use crate::core::samples::SampleObject;
use crate::executor::job::{depends_add, depends_merge, project_file, Job};
use crate::pipeline::{read_ref, DispatchContext, PipelineVariant};

/// Custom-panels germline workflow
pub struct CustomPanels;

/// Depends-list variable collecting jobs of one core capture panel
pub fn cp_depends(core_panel: &str) -> String {
    format!("{}{}", CP_DEPENDS_PREFIX, core_panel.to_uppercase())
}

impl PipelineVariant for CustomPanels {
    /// Build the custom-panels workflow call.
    ///
    /// Stage switches follow the panel: vcfeval only runs for positive
    /// controls, FH-PRS only for FH panels, polyedge only where configured.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let cmd = CustomPanels.sample_cmd(&sample, &ctx);
    /// assert!(cmd.contains("-istage-vcfeval.skip=true"));
    /// ```
    fn sample_cmd(&self, sample: &SampleObject, ctx: &DispatchContext) -> String {
        let dx = &ctx.config.dnanexus;
        let stages = &dx.stages;
        let instances = &dx.instances;
        let panel = &sample.panel;
        let beds = panel.bedfiles(&sample.pannumber, &ctx.config.paths.bedfile_folder);
        let (r1, r2) = (read_ref(sample, "R1"), read_ref(sample, "R2"));
        let name = &sample.sample_name;

        let mut job = Job::run(&dx.apps.custom_panels_workflow)
            .name(name)
            .stage_input(&stages.fastqc, "reads", &r1)
            .stage_input(&stages.fastqc, "reads", &r2)
            .stage_input(&stages.bwa, "reads_fastqgz", &r1)
            .stage_input(&stages.bwa, "reads2_fastqgz", &r2)
            .stage_input(&stages.bwa, "read_group_sample", name);
        if let Some(reference) = &panel.masked_reference {
            job = job.stage_input(&stages.bwa, "genomeindex_targz", reference);
        }

        job = job
            .stage_input(&stages.sambamba, "sambamba_bed", &beds.sambamba)
            .stage_input(&stages.sambamba, "min_base_qual", panel.coverage_min_basecall_qual)
            .stage_input(&stages.sambamba, "min_mapping_qual", panel.coverage_min_mapping_qual)
            .stage_input(&stages.sambamba, "additional_filter_commands", SAMBAMBA_FILTER)
            .stage_input(&stages.sambamba, "exclude_duplicates", true)
            .stage_input(&stages.sambamba, "exclude_failed_quality_control", true)
            .stage_input(&stages.sambamba, "merge_overlapping_mate_reads", true);
        if let Some(depth) = panel.clinical_coverage_depth {
            job = job.stage_input(&stages.sambamba, "coverage_level", depth);
        }

        job = job
            .stage_input(&stages.vcfeval, "prefix", name)
            .stage_input(&stages.vcfeval, "skip", !sample.pos_control)
            .stage_input(&stages.fhprs, "skip", !panel.fh);
        if panel.fh {
            job = job
                .stage_input(&stages.gatk, "output_mode", FH_GATK_OUTPUT)
                .stage_input(&stages.fhprs, "extra_args", FH_TIMEOUT_ARGS);
        }

        job = match &panel.polyedge {
            Some(polyedge) => job
                .stage_input(&stages.polyedge, "gene", &polyedge.gene)
                .stage_input(&stages.polyedge, "chrom", &polyedge.chrom)
                .stage_input(&stages.polyedge, "poly_start", polyedge.poly_start)
                .stage_input(&stages.polyedge, "poly_end", polyedge.poly_end)
                .stage_input(&stages.polyedge, "skip", false),
            None => job.stage_input(&stages.polyedge, "skip", true),
        };

        job = job
            .stage_input(&stages.picard, "vendor_exome_bedfile", &beds.hsmetrics)
            .stage_input(
                &stages.picard,
                "Capture_panel",
                panel.capture_type.as_deref().unwrap_or("Hybridisation"),
            );
        if let Some(padding) = panel.gatk_padding {
            job = job.stage_input(&stages.gatk, "padding", padding);
        }

        let gatk_instance = if panel.fh {
            &instances.gatk_fh
        } else {
            &instances.gatk_default
        };

        job.stage_input(&stages.filter_vcf, "bedfile", &beds.variant_calling)
            .instance_type(&stages.bwa, &instances.bwa)
            .instance_type(&stages.picard, &instances.picard)
            .instance_type(&stages.filter_vcf, &instances.filter_vcf)
            .instance_type(&stages.sambamba, &instances.sambamba)
            .instance_type(&stages.gatk, gatk_instance)
            .dest("/")
            .auth(&ctx.auth)
            .cmd()
            .to_string()
    }

    /// Exome-depth CNV calling and RPKM per core capture panel.
    ///
    /// Only core panels with at least `MIN_SAMPLES_FOR_CNV` samples in the
    /// run get CNV jobs. The GATK depends list is merged into the main list
    /// at the end.
    fn runwide_cmds(&self, samples: &[SampleObject], ctx: &DispatchContext) -> Vec<String> {
        let config = ctx.config;
        let folder = &config.paths.bedfile_folder;
        let ed_pannos = config.ed_pannos();
        let mut lines = Vec::new();

        for (core_panel, pannos) in config.vcp_panels() {
            if !CORE_PANELS.contains(&core_panel.as_str()) {
                continue;
            }

            let in_panel: Vec<&SampleObject> = samples
                .iter()
                .filter(|s| pannos.contains(&s.pannumber))
                .collect();
            if in_panel.len() < MIN_SAMPLES_FOR_CNV {
                continue;
            }

            let run_pannos: Vec<&str> = in_panel
                .iter()
                .map(|s| s.pannumber.as_str())
                .unique()
                .sorted()
                .collect();
            let ed_run_pannos: Vec<&str> = run_pannos
                .iter()
                .filter(|panno| ed_pannos.contains(**panno))
                .copied()
                .collect();
            let readcount_file = format!("{}/{}_readCount.RData", EXOMEDEPTH_DIR, core_panel);

            // readcount bed is shared by every subpanel of the core panel
            let readcount_bed = pannos
                .iter()
                .filter_map(|panno| config.panel(panno))
                .find_map(|panel| panel.ed_readcount_bedfile.clone());

            if let Some(bed) = readcount_bed.filter(|_| !ed_run_pannos.is_empty()) {
                let readcount = Job::run(&config.dnanexus.apps.ed_readcount_app)
                    .input("bedfile", format!("{}{}", folder, bed))
                    .input("bamfile_pannumbers", run_pannos.join(","))
                    .input("output_file", &readcount_file)
                    .depends_on(DEPENDS_LIST_GATK)
                    .auth(&ctx.auth)
                    .capture();
                lines.push(readcount);
                lines.push(depends_add(DEPENDS_LIST_EDREADCOUNT));

                for panno in &ed_run_pannos {
                    let Some(panel) = config.panel(panno) else {
                        continue;
                    };
                    let beds = panel.bedfiles(panno, folder);
                    let Some(subpanel_bed) = beds.ed_cnvcalling else {
                        continue;
                    };

                    let cnv = Job::run(&config.dnanexus.apps.ed_cnvcalling_app)
                        .name(&format!("{}_{}", core_panel, panno))
                        .input("readcount_file", project_file(&readcount_file))
                        .input("subpanel_bed", subpanel_bed)
                        .input("bamfile_pannumbers", panno)
                        .depends_on(DEPENDS_LIST_EDREADCOUNT)
                        .auth(&ctx.auth)
                        .capture();
                    lines.push(cnv);
                    lines.push(depends_add(DEPENDS_LIST_CNVCALLING));
                }
            }

            let rpkm_bed = pannos
                .iter()
                .filter_map(|panno| config.panel(panno))
                .find_map(|panel| panel.rpkm_bedfile.clone());
            if let Some(bed) = rpkm_bed {
                let rpkm = Job::run(&config.dnanexus.apps.rpkm_app)
                    .input("project_name", format!("${{{}}}", PROJECT_NAME))
                    .input("bedfile", format!("{}{}", folder, bed))
                    .input("bamfile_pannumbers", run_pannos.join(","))
                    .depends_on(DEPENDS_LIST_CNVCALLING)
                    .depends_on(&cp_depends(&core_panel))
                    .auth(&ctx.auth)
                    .capture();
                lines.push(rpkm);
                lines.push(depends_add(DEPENDS_LIST));
            }
        }

        lines.push(depends_merge(DEPENDS_LIST, DEPENDS_LIST_GATK));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::pipeline::tests::{ctx, sample};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stage_switches() {
        let config = test_config();
        let stages = &config.dnanexus.stages;
        let plain = sample(&config, "NGS999_01_DNA1_Pan4119", "Pan4119");
        let control = sample(&config, "NGS999_02_NA12878_Pan4119", "Pan4119");

        let cmd = CustomPanels.sample_cmd(&plain, &ctx(&config));
        assert!(cmd.contains(&format!("-i{}.skip=true", stages.vcfeval)));
        assert!(cmd.contains(&format!("-i{}.skip=true", stages.polyedge)));
        assert!(cmd.contains(&format!("-i{}.prefix=NGS999_01_DNA1_Pan4119", stages.vcfeval)));
        assert!(cmd.contains(&format!(
            "--instance-type {}={}",
            stages.gatk, config.dnanexus.instances.gatk_default
        )));

        let cmd = CustomPanels.sample_cmd(&control, &ctx(&config));
        assert!(cmd.contains(&format!("-i{}.skip=false", stages.vcfeval)));
    }

    #[test]
    fn test_fh_panel_uses_fh_instance() {
        let config = test_config();
        let stages = &config.dnanexus.stages;
        let fh = sample(&config, "NGS999_03_DNA3_Pan4121", "Pan4121");

        let cmd = CustomPanels.sample_cmd(&fh, &ctx(&config));
        assert!(cmd.contains(&format!("-i{}.skip=false", stages.fhprs)));
        assert!(cmd.contains(&format!(
            "--instance-type {}={}",
            stages.gatk, config.dnanexus.instances.gatk_fh
        )));
    }

    #[test]
    fn test_runwide_needs_three_samples() {
        let config = test_config();
        let two: Vec<SampleObject> = (1..=2)
            .map(|i| sample(&config, &format!("NGS999_0{}_DNA{}_Pan4119", i, i), "Pan4119"))
            .collect();

        assert_eq!(
            CustomPanels.runwide_cmds(&two, &ctx(&config)),
            vec![depends_merge(DEPENDS_LIST, DEPENDS_LIST_GATK)]
        );
    }

    #[test]
    fn test_runwide_cnv_chain() {
        let config = test_config();
        let samples: Vec<SampleObject> = (1..=3)
            .map(|i| sample(&config, &format!("NGS999_0{}_DNA{}_Pan4119", i, i), "Pan4119"))
            .collect();

        let lines = CustomPanels.runwide_cmds(&samples, &ctx(&config));
        let apps = &config.dnanexus.apps;

        assert!(lines[0].contains(&apps.ed_readcount_app));
        assert!(lines[0].contains("${DEPENDS_LIST_GATK}"));
        assert_eq!(lines[1], depends_add(DEPENDS_LIST_EDREADCOUNT));
        assert!(lines[2].contains(&apps.ed_cnvcalling_app));
        assert!(lines[2].contains("${DEPENDS_LIST_EDREADCOUNT}"));
        assert_eq!(lines[3], depends_add(DEPENDS_LIST_CNVCALLING));
        assert!(lines[4].contains(&apps.rpkm_app));
        assert!(lines[4].contains("${CP_DEPENDS_VCP2}"));
        assert_eq!(lines.last().unwrap(), &depends_merge(DEPENDS_LIST, DEPENDS_LIST_GATK));
    }
}
