use crate::consts::*;

/// Builder for a cloud CLI `dx run` invocation written into a dispatch script
///
/// # Example
///
/// ```rust,ignore
/// use automate_demultiplex::executor::job::Job;
///
/// let line = Job::run("app-multiqc")
///     .input("project_for_multiqc", "${PROJECT_NAME}")
///     .depends_on(DEPENDS_LIST)
///     .auth("token")
///     .capture();
///
/// assert!(line.starts_with("JOB_ID=$(dx run app-multiqc"));
/// ```
#[derive(Debug, Clone)]
pub struct Job {
    pub cmd: String,
}

impl Job {
    /// Start a `dx run` command for an app or workflow at high priority
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let job = Job::run("workflow-123");
    ///
    /// assert_eq!(job.cmd, "dx run workflow-123 --priority high -y");
    /// ```
    pub fn run(executable: &str) -> Self {
        Self {
            cmd: format!("dx run {} --priority high -y", executable),
        }
    }

    /// Add a raw argument to the job
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let job = Job::run("app-x").arg("--detach");
    ///
    /// assert_eq!(job.cmd, "dx run app-x --priority high -y --detach");
    /// ```
    pub fn arg(mut self, arg: &str) -> Self {
        self.cmd.push(' ');
        self.cmd.push_str(arg);
        self
    }

    /// Add multiple raw arguments to the job
    pub fn args(mut self, args: &[&str]) -> Self {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn name(self, name: &str) -> Self {
        let arg = format!("--name {}", name);
        self.arg(&arg)
    }

    /// Add an app input: `-i<key>=<value>`
    pub fn input<V: std::fmt::Display>(self, key: &str, value: V) -> Self {
        let arg = format!("-i{}={}", key, value);
        self.arg(&arg)
    }

    /// Add a workflow stage input: `-i<stage>.<key>=<value>`
    pub fn stage_input<V: std::fmt::Display>(self, stage: &str, key: &str, value: V) -> Self {
        let arg = format!("-i{}.{}={}", stage, key, value);
        self.arg(&arg)
    }

    pub fn instance_type(self, stage: &str, instance: &str) -> Self {
        let arg = format!("--instance-type {}={}", stage, instance);
        self.arg(&arg)
    }

    /// Make the job wait on every job id collected in a depends-list shell variable
    pub fn depends_on(self, variable: &str) -> Self {
        let arg = format!("${{{}}}", variable);
        self.arg(&arg)
    }

    pub fn dest(self, folder: &str) -> Self {
        let arg = format!("--dest=${{PROJECT_ID}}:{}", folder);
        self.arg(&arg)
    }

    pub fn auth(self, token: &str) -> Self {
        let arg = format!("--brief --auth-token {}", token);
        self.arg(&arg)
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Wrap the command so the resulting job id lands in `$JOB_ID`
    pub fn capture(self) -> String {
        format!("{}=$({})", JOB_ID, self.cmd)
    }
}

/// Shell line appending `$JOB_ID` to a depends-list variable
///
/// # Example
///
/// ```rust,ignore
/// assert_eq!(depends_add("DEPENDS_LIST"), "DEPENDS_LIST=\"${DEPENDS_LIST} -d ${JOB_ID} \"");
/// ```
pub fn depends_add(variable: &str) -> String {
    format!("{0}=\"${{{0}}} -d ${{{1}}} \"", variable, JOB_ID)
}

/// Shell line merging one depends-list variable into another
pub fn depends_merge(into: &str, from: &str) -> String {
    format!("{0}=\"${{{0}}} ${{{1}}}\"", into, from)
}

/// Shell line initialising an empty depends-list variable
pub fn depends_init(variable: &str) -> String {
    format!("{}=\"\"", variable)
}

/// Reference a file inside the current project: `${PROJECT_ID}:<path>`
pub fn project_file(path: &str) -> String {
    format!("${{PROJECT_ID}}:{}", path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_capture() {
        let line = Job::run("app-peddy")
            .input("project_id", "${PROJECT_ID}")
            .depends_on(DEPENDS_LIST)
            .auth("tok")
            .capture();

        assert_eq!(
            line,
            "JOB_ID=$(dx run app-peddy --priority high -y -iproject_id=${PROJECT_ID} ${DEPENDS_LIST} --brief --auth-token tok)"
        );
    }

    #[test]
    fn test_stage_inputs() {
        let job = Job::run("workflow-1")
            .name("S1")
            .stage_input("stage-fastqc", "reads", project_file("/fq/S1_R1.fastq.gz"))
            .instance_type("stage-bwa", "mem1_ssd1_v2_x8");

        assert_eq!(
            job.cmd(),
            "dx run workflow-1 --priority high -y --name S1 -istage-fastqc.reads=${PROJECT_ID}:/fq/S1_R1.fastq.gz --instance-type stage-bwa=mem1_ssd1_v2_x8"
        );
    }

    #[test]
    fn test_depends_lines() {
        assert_eq!(
            depends_add(DEPENDS_LIST_GATK),
            "DEPENDS_LIST_GATK=\"${DEPENDS_LIST_GATK} -d ${JOB_ID} \""
        );
        assert_eq!(
            depends_merge(DEPENDS_LIST, DEPENDS_LIST_GATK),
            "DEPENDS_LIST=\"${DEPENDS_LIST} ${DEPENDS_LIST_GATK}\""
        );
        assert_eq!(depends_init(DEPENDS_LIST), "DEPENDS_LIST=\"\"");
    }
}
