use crate::consts::*;
use crate::core::samples::SampleObject;
use crate::executor::job::{depends_add, Job};
use crate::pipeline::{read_ref, DispatchContext, PipelineVariant};

/// Whole-exome workflow
pub struct Wes;

impl PipelineVariant for Wes {
    /// Build the WES workflow call.
    ///
    /// # Arguments
    ///
    /// * `sample` - Sample to dispatch.
    /// * `ctx` - Run-level dispatch values.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let cmd = Wes.sample_cmd(&sample, &ctx);
    /// assert!(cmd.starts_with("dx run workflow-"));
    /// ```
    fn sample_cmd(&self, sample: &SampleObject, ctx: &DispatchContext) -> String {
        let dx = &ctx.config.dnanexus;
        let beds = sample
            .panel
            .bedfiles(&sample.pannumber, &ctx.config.paths.bedfile_folder);
        let (r1, r2) = (read_ref(sample, "R1"), read_ref(sample, "R2"));

        Job::run(&dx.apps.wes_workflow)
            .name(&sample.sample_name)
            .stage_input(&dx.stages.fastqc, "reads", &r1)
            .stage_input(&dx.stages.fastqc, "reads", &r2)
            .stage_input(&dx.stages.sentieon, "reads_fastqgzs", &r1)
            .stage_input(&dx.stages.sentieon, "reads_fastqgzs", &r2)
            .stage_input(&dx.stages.sentieon, "sample", &sample.sample_name)
            .stage_input(&dx.stages.picard, "vendor_exome_bedfile", &beds.hsmetrics)
            .stage_input(&dx.stages.sambamba, "sambamba_bed", &beds.sambamba)
            .dest("/")
            .auth(&ctx.auth)
            .cmd()
            .to_string()
    }

    /// Peddy relatedness check over the whole project
    fn runwide_cmds(&self, _samples: &[SampleObject], ctx: &DispatchContext) -> Vec<String> {
        let peddy = Job::run(&ctx.config.dnanexus.apps.peddy_app)
            .input("project_id", format!("${{{}}}", PROJECT_ID))
            .depends_on(DEPENDS_LIST)
            .auth(&ctx.auth)
            .capture();

        vec![peddy, depends_add(DEPENDS_LIST)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::pipeline::tests::{ctx, sample};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wes_sample_cmd() {
        let config = test_config();
        let s = sample(&config, "NGS998_01_DNA2_Pan493", "Pan493");
        let cmd = Wes.sample_cmd(&s, &ctx(&config));

        assert!(cmd.starts_with(&format!("dx run {} --priority high -y --name NGS998_01_DNA2_Pan493", config.dnanexus.apps.wes_workflow)));
        assert!(cmd.contains(&format!(
            "-i{}.sample=NGS998_01_DNA2_Pan493",
            config.dnanexus.stages.sentieon
        )));
        assert!(cmd.contains("Pan493dataSambamba.bed"));
        assert!(cmd.ends_with("--auth-token tok"));
    }

    #[test]
    fn test_wes_runwide_is_peddy() {
        let config = test_config();
        let lines = Wes.runwide_cmds(&[], &ctx(&config));

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&format!("JOB_ID=$(dx run {}", config.dnanexus.apps.peddy_app)));
        assert_eq!(lines[1], depends_add(DEPENDS_LIST));
    }
}
