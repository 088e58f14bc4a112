// runfolder sentinels and sequencer files
pub const RTA_COMPLETE: &str = "RTAComplete.txt";
pub const MD5_CHECKSUM: &str = "md5checksum.txt";
pub const BCL2FASTQ_OUTPUT: &str = "bcl2fastq2_output.log";
pub const UPLOAD_STARTED: &str = "DNANexus_upload_started.txt";
pub const SAMPLESHEET_SUFFIX: &str = "_SampleSheet.csv";
pub const FASTQ_SUBDIR: &str = "Data/Intensities/BaseCalls";
pub const STATS_SUBDIR: &str = "Data/Intensities/BaseCalls/Stats";
pub const STATS_JSON: &str = "Stats.json";
pub const LANE_METRICS_EXT: &str = "illumina_lane_metrics";
pub const PHASING_METRICS_EXT: &str = "illumina_phasing_metrics";

// fastq naming
pub const FASTQ_GZ: &str = ".fastq.gz";
pub const UNDETERMINED: &str = "Undetermined";
pub const READS: &[&str] = &["R1", "R2"];

// marker strings
pub const UPLOAD_STARTED_MARKER: &str = "UPLOAD STARTED";
pub const DEV_MANUAL_MARKER: &str = "DEVELOPMENT RUN DEMULTIPLEXED MANUALLY";
pub const CLOUD_ERROR_LINE: &str = "- ERROR -";
pub const MASKED_KEY: &str = "<MASKED_KEY>";

// per-runfolder log and script names
pub const DEMULTIPLEX_LOG: &str = "demultiplex.log";
pub const SAMPLESHEET_LOG: &str = "samplesheet_validator.log";
pub const SETOFF_LOG: &str = "upload_and_setoff.log";
pub const BACKUP_LOG: &str = "backup_runfolder.log";
pub const PROJECT_SCRIPT: &str = "create_nexus_project.sh";
pub const DISPATCH_SCRIPT: &str = "dx_run_commands.sh";
pub const DECISION_SUPPORT_SCRIPT: &str = "decision_support_upload_cmds.sh";
pub const POST_RUN_SCRIPT: &str = "post_run_commands.sh";
pub const WSCLEANER_LOG: &str = "wscleaner.log";

// cloud project layout
pub const QC_DIR: &str = "/QC";
pub const LOGFILES_DIR: &str = "automated_scripts_logfiles";
pub const TSO_FASTQS_DIR: &str = "/analysis_folder/Logs_Intermediates/FastqGeneration";
pub const UPLOAD_BATCH_SIZE: usize = 100;
pub const UPLOAD_TRIES: usize = 100;
pub const BCL_LANE_IGNORE: &str = "/L00";
pub const TSO_BAM_DIR: &str = "/analysis_folder/Logs_Intermediates/StitchedRealigned";
pub const TSO_RESULTS_DIR: &str = "/analysis_folder/Results";
pub const TSO_SAMPLESHEET_PART: &str = "SampleSheetPart";
pub const EXOMEDEPTH_DIR: &str = "/exomedepth_output";

// logger names
pub const DEMULTIPLEX: &str = "demultiplex";
pub const SAMPLESHEET_VALIDATOR: &str = "samplesheet_validator";
pub const SETOFF_WORKFLOWS: &str = "setoff_workflows";
pub const BACKUP_RUNFOLDER: &str = "backup_runfolder";
pub const WSCLEANER: &str = "wscleaner";

// dispatch script shell variables
pub const DEPENDS_LIST: &str = "DEPENDS_LIST";
pub const DEPENDS_LIST_GATK: &str = "DEPENDS_LIST_GATK";
pub const DEPENDS_LIST_EDREADCOUNT: &str = "DEPENDS_LIST_EDREADCOUNT";
pub const DEPENDS_LIST_CNVCALLING: &str = "DEPENDS_LIST_CNVCALLING";
pub const JOB_ID: &str = "JOB_ID";
pub const DSS_INPUTS: &str = "DSS_INPUTS";
pub const CP_DEPENDS_PREFIX: &str = "CP_DEPENDS_";
pub const PROJECT_ID: &str = "PROJECT_ID";
pub const PROJECT_NAME: &str = "PROJECT_NAME";
pub const RUNFOLDER_NAME: &str = "RUNFOLDER_NAME";

// fixed workflow arguments
pub const SAMBAMBA_FILTER: &str = "\"mapping_quality >= 20 and not (unmapped or secondary_alignment)\"";
pub const FH_GATK_OUTPUT: &str = "EMIT_ALL_CONFIDENT_SITES";
pub const FH_TIMEOUT_ARGS: &str = "\"--timeout 2h\"";
pub const NOVASEQ_FLAG: &str = "--IS_NOVASEQ";
pub const SHEBANG: &str = "#!/usr/bin/env bash";

// permissions
pub const VIEW: &str = "VIEW";
pub const ADMINISTER: &str = "ADMINISTER";

// collections
pub const CORE_PANELS: &[&str] = &["vcp1", "vcp2", "vcp3"];
pub const MIN_SAMPLES_FOR_CNV: usize = 3;
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const SENTINEL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
