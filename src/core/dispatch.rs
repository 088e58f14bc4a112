use crate::config::render;
use crate::consts::*;
use crate::core::samples::{CollectRunfolderSamples, SampleObject};
use crate::executor::job::{depends_add, depends_init, depends_merge, Job};
use crate::pipeline::custom_panels::cp_depends;
use crate::pipeline::tso500::post_run_sample_cmds;
use crate::pipeline::{DispatchContext, Pipeline};

/// Lines destined for each generated script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchCommands {
    pub dispatch: Vec<String>,
    pub post_run: Vec<String>,
}

/// Decision-support upload line for a sample, written to the decision-support
/// script when the dispatch script runs.
///
/// Positive controls never get one. The command is single-quoted so that only
/// `${DSS_INPUTS}` is expanded at dispatch time.
///
/// # Example
///
/// ```rust,ignore
/// let line = decision_support_cmd(&sample, &ctx).unwrap();
/// assert!(line.starts_with("echo 'dx run "));
/// ```
pub fn decision_support_cmd(sample: &SampleObject, ctx: &DispatchContext) -> Option<String> {
    if sample.pos_control {
        return None;
    }

    let dx = &ctx.config.dnanexus;
    let dss_inputs = format!("'\"${{{}}}\"'", DSS_INPUTS);

    let job = if sample.pipeline.is_tso() {
        Job::run(&dx.apps.qiagen_upload_app)
            .name(&format!("QIAGEN_Upload-{}", sample.sample_name))
            .input("sample_name", &sample.sample_name)
            .input(
                "sample_zip_folder",
                format!("{}{}.zip", sample.pannumber, sample.sample_name),
            )
            .auth(&ctx.auth)
    } else {
        let project = sample.panel.congenica_project.as_ref()?;
        if project.is_sftp() {
            Job::run(&dx.apps.congenica_sftp_app)
                .name(&format!("Congenica_SFTP_Upload-{}", sample.sample_name))
                .arg(&dss_inputs)
                .auth(&ctx.auth)
        } else {
            let project = match project {
                crate::config::CongenicaProject::Id(id) => id.to_string(),
                crate::config::CongenicaProject::Named(name) => name.clone(),
            };
            Job::run(&dx.apps.congenica_app)
                .name(&format!("Congenica_Upload-{}", sample.sample_name))
                .input("congenica_project", project)
                .input("credentials", &dx.congenica_credentials)
                .input("IR_template", &dx.congenica_ir_template)
                .input("samplename", &sample.sample_name)
                .arg(&dss_inputs)
                .auth(&ctx.auth)
        }
    };

    Some(format!(
        "echo '{}' >> {}",
        job.cmd(),
        ctx.decision_support_script.display()
    ))
}

/// Build the dispatch script (and, for TSO, the post-run script) for a run.
///
/// # Arguments
///
/// * `run` - Collected samples of the run.
/// * `ctx` - Run-level dispatch values.
/// * `project_id` - Cloud project id, written into the post-run script.
///
/// # Example
///
/// ```rust,ignore
/// let cmds = build_dispatch_commands(&run, &ctx, "project-123");
/// write_lines(&rf.dispatch_script, WriteMode::Append, &cmds.dispatch)?;
/// ```
pub fn build_dispatch_commands(
    run: &CollectRunfolderSamples,
    ctx: &DispatchContext,
    project_id: &str,
) -> DispatchCommands {
    let pipeline = run.pipeline;
    let Some(variant) = pipeline.variant() else {
        return DispatchCommands::default();
    };

    let mut dispatch = preamble(pipeline, ctx);
    let mut post_run = Vec::new();

    if pipeline.is_tso() {
        dispatch.extend(variant.runwide_cmds(&run.samples, ctx));
        dispatch.push(format!(
            "echo \"{0}={1}\" >> {2}",
            PROJECT_ID,
            project_id,
            ctx.decision_support_script.display()
        ));
        dispatch.extend(run.samples.iter().filter_map(|s| s.decision_support_cmd.clone()));

        post_run.push(format!("{}={}", PROJECT_ID, project_id));
        post_run.extend(preamble(pipeline, ctx));
        let (sample_lines, sambamba) = post_run_sample_cmds(&run.samples, ctx);
        post_run.extend(sample_lines);
        post_run.extend(multiqc_cmds(ctx));
        post_run.extend(sambamba);
        post_run.push(duty_csv_cmd(run, ctx));

        return DispatchCommands { dispatch, post_run };
    }

    for sample in &run.samples {
        dispatch.push(format!("{}=$({})", JOB_ID, sample.workflow_cmd));
        dispatch.push(depends_add(DEPENDS_LIST));

        if pipeline == Pipeline::Pipe {
            dispatch.push(depends_add(DEPENDS_LIST_GATK));
            if let Some(core_panel) = &sample.panel.core_panel {
                dispatch.push(depends_add(&cp_depends(core_panel)));
            }
        }

        if matches!(pipeline, Pipeline::Wes | Pipeline::Pipe) {
            if let Some(ds_cmd) = &sample.decision_support_cmd {
                dispatch.push(format!(
                    "{}=$({})",
                    DSS_INPUTS,
                    render(
                        &ctx.config.dnanexus.decision_support_inputs_cmd,
                        &[("pipeline", pipeline.as_str())]
                    )
                ));
                dispatch.push(ds_cmd.clone());
            }
        }
    }

    dispatch.extend(variant.runwide_cmds(&run.samples, ctx));
    dispatch.extend(multiqc_cmds(ctx));
    if pipeline == Pipeline::Pipe {
        dispatch.push(depends_merge(DEPENDS_LIST, DEPENDS_LIST_CNVCALLING));
    }
    dispatch.push(duty_csv_cmd(run, ctx));

    DispatchCommands { dispatch, post_run }
}

fn preamble(pipeline: Pipeline, ctx: &DispatchContext) -> Vec<String> {
    let mut lines = vec![
        format!("{}={}", PROJECT_NAME, ctx.proj_name),
        format!("{}={}", RUNFOLDER_NAME, ctx.runfolder_name),
        depends_init(DEPENDS_LIST),
    ];

    if pipeline == Pipeline::Pipe {
        lines.extend(
            [DEPENDS_LIST_GATK, DEPENDS_LIST_EDREADCOUNT, DEPENDS_LIST_CNVCALLING]
                .iter()
                .map(|var| depends_init(var)),
        );
        lines.extend(CORE_PANELS.iter().map(|panel| depends_init(&cp_depends(panel))));
    }

    lines
}

/// MultiQC over the project, then its report upload
fn multiqc_cmds(ctx: &DispatchContext) -> Vec<String> {
    let apps = &ctx.config.dnanexus.apps;
    let multiqc = Job::run(&apps.multiqc_app)
        .input("project_for_multiqc", format!("${{{}}}", PROJECT_NAME))
        .depends_on(DEPENDS_LIST)
        .auth(&ctx.auth)
        .capture();
    let upload = Job::run(&apps.upload_multiqc_app)
        .input("multiqc_html", format!("${{{}}}:multiqc_report", JOB_ID))
        .input("multiqc_data_input", format!("${{{}}}:multiqc", JOB_ID))
        .depends_on(DEPENDS_LIST)
        .auth(&ctx.auth)
        .capture();

    vec![
        multiqc,
        depends_add(DEPENDS_LIST),
        upload,
        depends_add(DEPENDS_LIST),
    ]
}

fn duty_csv_cmd(run: &CollectRunfolderSamples, ctx: &DispatchContext) -> String {
    Job::run(&ctx.config.dnanexus.apps.duty_csv_app)
        .input("project_name", format!("${{{}}}", PROJECT_NAME))
        .input("runfolder_name", format!("${{{}}}", RUNFOLDER_NAME))
        .input("pipeline", run.pipeline)
        .input("pannumbers", run.pannumbers().join(","))
        .depends_on(DEPENDS_LIST)
        .auth(&ctx.auth)
        .capture()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::config::Config;
    use crate::core::samples::CloudPaths;
    use crate::pipeline::tests::{ctx, sample};
    use pretty_assertions::assert_eq;

    fn run_of(config: &Config, pipeline: Pipeline, samples: Vec<SampleObject>) -> CollectRunfolderSamples {
        let ctx = ctx(config);
        let samples = samples
            .into_iter()
            .map(|mut s| {
                s.workflow_cmd = pipeline.variant().unwrap().sample_cmd(&s, &ctx);
                s.decision_support_cmd = decision_support_cmd(&s, &ctx);
                s
            })
            .collect();

        CollectRunfolderSamples {
            runfolder_name: ctx.runfolder_name.clone(),
            samples,
            pipeline,
            development_run: false,
            runtype_suffix: "NGS999_CP".to_string(),
            proj_name: ctx.proj_name.clone(),
            cloud_paths: CloudPaths {
                fastqs_dir: "/Data/Intensities/BaseCalls".to_string(),
                logfiles_dir: "/p/automated_scripts_logfiles".to_string(),
                samplesheet_path: "/Data/Intensities/BaseCalls/ss.csv".to_string(),
            },
            fastq_list: Vec::new(),
            undetermined_fastqs: Vec::new(),
        }
    }

    #[test]
    fn test_decision_support_variants() {
        let config = test_config();
        let ctx = ctx(&config);

        // Pan4119 uploads over SFTP, Pan4121 to a numeric project
        let sftp = decision_support_cmd(&sample(&config, "NGS999_01_DNA1_Pan4119", "Pan4119"), &ctx)
            .unwrap();
        assert!(sftp.starts_with(&format!(
            "echo 'dx run {} --priority high -y --name Congenica_SFTP_Upload-NGS999_01_DNA1_Pan4119 '\"${{DSS_INPUTS}}\"'",
            config.dnanexus.apps.congenica_sftp_app
        )));
        assert!(sftp.ends_with("--auth-token tok' >> /logs/ds.sh"));

        let numeric = decision_support_cmd(&sample(&config, "NGS999_02_DNA2_Pan4121", "Pan4121"), &ctx)
            .unwrap();
        assert!(numeric.contains("-icongenica_project=4203"));
        assert!(numeric.contains("-isamplename=NGS999_02_DNA2_Pan4121"));

        let control = sample(&config, "NGS999_03_NA12878_Pan4119", "Pan4119");
        assert_eq!(decision_support_cmd(&control, &ctx), None);

        let tso = decision_support_cmd(&sample(&config, "TSO24001_01_100001_200001_Pan5085", "Pan5085"), &ctx)
            .unwrap();
        assert!(tso.contains("-isample_zip_folder=Pan5085TSO24001_01_100001_200001_Pan5085.zip"));
    }

    #[test]
    fn test_pipe_dispatch_order() {
        let config = test_config();
        let run = run_of(
            &config,
            Pipeline::Pipe,
            vec![sample(&config, "NGS999_01_DNA1_Pan4119", "Pan4119")],
        );

        let cmds = build_dispatch_commands(&run, &ctx(&config), "project-1");
        let d = &cmds.dispatch;

        assert_eq!(d[0], format!("PROJECT_NAME={}", run.proj_name));
        assert_eq!(d[1], "RUNFOLDER_NAME=250101_A01229_0001_AXXX");
        assert!(d.contains(&"CP_DEPENDS_VCP2=\"\"".to_string()));

        let sample_at = d.iter().position(|l| l.contains("--name NGS999_01_DNA1_Pan4119")).unwrap();
        assert_eq!(d[sample_at + 1], depends_add(DEPENDS_LIST));
        assert_eq!(d[sample_at + 2], depends_add(DEPENDS_LIST_GATK));
        assert_eq!(d[sample_at + 3], depends_add("CP_DEPENDS_VCP2"));
        assert!(d[sample_at + 4].starts_with("DSS_INPUTS=$("));
        assert!(d[sample_at + 5].starts_with("echo 'dx run"));

        let multiqc = d.iter().position(|l| l.contains(&config.dnanexus.apps.multiqc_app)).unwrap();
        assert!(d[multiqc + 2].contains(&config.dnanexus.apps.upload_multiqc_app));
        assert_eq!(d[d.len() - 2], depends_merge(DEPENDS_LIST, DEPENDS_LIST_CNVCALLING));
        assert!(d[d.len() - 1].contains(&config.dnanexus.apps.duty_csv_app));
        assert!(cmds.post_run.is_empty());
    }

    #[test]
    fn test_snp_has_no_decision_support() {
        let config = test_config();
        let run = run_of(
            &config,
            Pipeline::Snp,
            vec![sample(&config, "SNP12_01_DNA1_Pan4009", "Pan4009")],
        );

        let cmds = build_dispatch_commands(&run, &ctx(&config), "project-1");
        assert!(!cmds.dispatch.iter().any(|l| l.starts_with("DSS_INPUTS")));
        assert_eq!(cmds.dispatch.len(), 3 + 2 + 4 + 1);
    }

    #[test]
    fn test_tso_dispatch_and_post_run() {
        let config = test_config();
        let samples = vec![
            sample(&config, "TSO24001_01_100001_200001_Pan5085", "Pan5085"),
            sample(&config, "TSO24001_02_NA12878_Pan5085", "Pan5085"),
        ];
        let run = run_of(&config, Pipeline::Tso500, samples);
        let mut ctx = ctx(&config);
        ctx.tso_parts = crate::pipeline::tso500::samplesheet_parts(&ctx.runfolder_name, 2, 9);

        let cmds = build_dispatch_commands(&run, &ctx, "project-9");

        let apps = &config.dnanexus.apps;
        assert_eq!(
            cmds.dispatch.iter().filter(|l| l.contains(&apps.tso500_app)).count(),
            1
        );
        assert!(cmds
            .dispatch
            .contains(&"echo \"PROJECT_ID=project-9\" >> /logs/ds.sh".to_string()));
        assert_eq!(
            cmds.dispatch.iter().filter(|l| l.contains(&apps.qiagen_upload_app)).count(),
            1
        );

        let post = &cmds.post_run;
        assert_eq!(post[0], "PROJECT_ID=project-9");
        let multiqc = post.iter().position(|l| l.contains(&apps.multiqc_app)).unwrap();
        let first_sambamba = post.iter().position(|l| l.contains(&apps.sambamba_app)).unwrap();
        let sompy = post.iter().position(|l| l.contains(&apps.sompy_app)).unwrap();
        assert!(sompy < multiqc);
        assert!(multiqc < first_sambamba);
        assert!(post.last().unwrap().contains(&apps.duty_csv_app));
    }
}
