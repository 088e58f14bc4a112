use crate::consts::QC_DIR;
use crate::core::samples::SampleObject;
use crate::executor::job::Job;
use crate::pipeline::{read_ref, DispatchContext, PipelineVariant};

/// ArcherDx fusion panels.
///
/// Only FastQC is dispatched here; the analysis itself is set off
/// downstream from the uploaded FASTQs.
pub struct ArcherDx;

impl PipelineVariant for ArcherDx {
    fn sample_cmd(&self, sample: &SampleObject, ctx: &DispatchContext) -> String {
        fastqc_cmd(sample, ctx)
    }

    fn runwide_cmds(&self, _samples: &[SampleObject], _ctx: &DispatchContext) -> Vec<String> {
        Vec::new()
    }
}

/// FastQC app call over both reads of a sample
pub(crate) fn fastqc_cmd(sample: &SampleObject, ctx: &DispatchContext) -> String {
    Job::run(&ctx.config.dnanexus.apps.fastqc_app)
        .name(&sample.sample_name)
        .input("reads", read_ref(sample, "R1"))
        .input("reads", read_ref(sample, "R2"))
        .dest(QC_DIR)
        .auth(&ctx.auth)
        .cmd()
        .to_string()
}
