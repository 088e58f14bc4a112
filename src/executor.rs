pub mod job;
pub mod runner;

pub use job::Job;
pub use runner::{execute_subprocess_command, CmdOutput, OnFail};
