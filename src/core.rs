pub mod backup;
pub mod cloud;
pub mod demultiplex;
pub mod dispatch;
pub mod emails;
pub mod samples;
pub mod setoff;
pub mod upload;
pub mod wscleaner;

pub use demultiplex::GetRunfolders;
pub use setoff::SequencingRuns;
pub use wscleaner::RunfolderCleaner;
