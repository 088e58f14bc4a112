pub mod cli;
pub mod config;
pub mod consts;
pub mod core;
pub mod errors;
pub mod executor;
pub mod logger;
pub mod pipeline;
pub mod samplesheet;
pub mod toolbox;
