use std::path::PathBuf;

/// Failures that abort processing of a runfolder and end the process with exit code 1
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("Required binary is not callable: {cmd}")]
    MissingBinary { cmd: String },

    #[error("Could not read credentials file {path:?}")]
    MissingCredentials { path: PathBuf },

    #[error("Could not create sentinel file {path:?}")]
    SentinelCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cluster density calculation failed for {runfolder}")]
    ClusterDensity { runfolder: String },

    #[error("Demultiplexing failed for {runfolder} (return code {returncode})")]
    Demultiplex { runfolder: String, returncode: i32 },

    #[error("Cloud project was not created for {runfolder}")]
    ProjectCreation { runfolder: String },

    #[error("Runfolder {runfolder} contains samples from more than one pipeline: {pipelines}")]
    MixedPipelines { runfolder: String, pipelines: String },
}
