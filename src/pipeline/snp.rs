use crate::core::samples::SampleObject;
use crate::executor::job::Job;
use crate::pipeline::{read_ref, DispatchContext, PipelineVariant};

/// SNP genotyping workflow: FastQC and Sentieon only
pub struct Snp;

impl PipelineVariant for Snp {
    fn sample_cmd(&self, sample: &SampleObject, ctx: &DispatchContext) -> String {
        let dx = &ctx.config.dnanexus;
        let (r1, r2) = (read_ref(sample, "R1"), read_ref(sample, "R2"));

        Job::run(&dx.apps.snp_workflow)
            .name(&sample.sample_name)
            .stage_input(&dx.stages.fastqc, "reads", &r1)
            .stage_input(&dx.stages.fastqc, "reads", &r2)
            .stage_input(&dx.stages.sentieon, "reads_fastqgzs", &r1)
            .stage_input(&dx.stages.sentieon, "reads_fastqgzs", &r2)
            .stage_input(&dx.stages.sentieon, "sample", &sample.sample_name)
            .dest("/")
            .auth(&ctx.auth)
            .cmd()
            .to_string()
    }

    fn runwide_cmds(&self, _samples: &[SampleObject], _ctx: &DispatchContext) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::pipeline::tests::{ctx, sample};

    #[test]
    fn test_snp_sample_cmd() {
        let config = test_config();
        let s = sample(&config, "SNP12_01_DNA1_Pan4009", "Pan4009");
        let cmd = Snp.sample_cmd(&s, &ctx(&config));

        assert!(cmd.contains(&config.dnanexus.apps.snp_workflow));
        assert!(cmd.contains("SNP12_01_DNA1_Pan4009_S1_R1_001.fastq.gz"));
        assert!(Snp.runwide_cmds(&[s], &ctx(&config)).is_empty());
    }
}
