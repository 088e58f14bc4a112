use lazy_static::lazy_static;
use regex::Regex;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::logger::AdLogger;

lazy_static! {
    static ref PANNO: Regex = Regex::new(r"Pan\d+").unwrap();
    static ref VALID_CHARS: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref LEADING_UPPER: Regex = Regex::new(r"^[A-Z]+").unwrap();
}

pub const REQUIRED_HEADERS: &[&str] = &["Sample_ID", "Sample_Name", "index"];
pub const MIN_SAMPLESHEET_BYTES: u64 = 10;

/// Validation checks, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    SspresentErr,
    SsnameErr,
    SequenceridErr,
    SsemptyErr,
    HeadersErr,
    SamplenameidErr,
    ValidcharsErr,
    SampleErr,
    PannoErr,
    RuntypesErr,
}

/// Errors that prevent demultiplexing
pub const DISALLOWED_ERRORS: &[ErrorKind] = &[
    ErrorKind::SspresentErr,
    ErrorKind::SsnameErr,
    ErrorKind::SsemptyErr,
    ErrorKind::HeadersErr,
    ErrorKind::ValidcharsErr,
];

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SspresentErr => "sspresent_err",
            ErrorKind::SsnameErr => "ssname_err",
            ErrorKind::SequenceridErr => "sequencerid_err",
            ErrorKind::SsemptyErr => "ssempty_err",
            ErrorKind::HeadersErr => "headers_err",
            ErrorKind::SamplenameidErr => "samplenameid_err",
            ErrorKind::ValidcharsErr => "validchars_err",
            ErrorKind::SampleErr => "sample_err",
            ErrorKind::PannoErr => "panno_err",
            ErrorKind::RuntypesErr => "runtypes_err",
        }
    }

    pub fn is_disallowed(&self) -> bool {
        DISALLOWED_ERRORS.contains(self)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleSheetError {
    #[error("SampleSheet is not present: {path:?}")]
    NotPresent { path: PathBuf },

    #[error("SampleSheet name does not match the expected schema: {name}")]
    InvalidName { name: String },

    #[error("Sequencer id {sequencer_id} is not in the list of allowed sequencers")]
    UnknownSequencer { sequencer_id: String },

    #[error("SampleSheet is empty (<= {MIN_SAMPLESHEET_BYTES} bytes): {path:?}")]
    Empty { path: PathBuf },

    #[error("[Data] section is missing required headers: {missing}")]
    MissingHeaders { missing: String },

    #[error("Sample_ID and Sample_Name differ for: {ids}")]
    IdNameMismatch { ids: String },

    #[error("Sample name {sample} contains characters outside [A-Za-z0-9_-]")]
    InvalidCharacters { sample: String },

    #[error("Sample name {sample} does not match the sample naming schema")]
    InvalidSampleName { sample: String },

    #[error("Pan number {panno} in sample {sample} is not in the panel catalogue")]
    UnknownPanno { sample: String, panno: String },

    #[error("Library prep {runtype} in sample {sample} is not an allowed run type")]
    UnknownRuntype { sample: String, runtype: String },
}

impl SampleSheetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SampleSheetError::NotPresent { .. } => ErrorKind::SspresentErr,
            SampleSheetError::InvalidName { .. } => ErrorKind::SsnameErr,
            SampleSheetError::UnknownSequencer { .. } => ErrorKind::SequenceridErr,
            SampleSheetError::Empty { .. } => ErrorKind::SsemptyErr,
            SampleSheetError::MissingHeaders { .. } => ErrorKind::HeadersErr,
            SampleSheetError::IdNameMismatch { .. } => ErrorKind::SamplenameidErr,
            SampleSheetError::InvalidCharacters { .. } => ErrorKind::ValidcharsErr,
            SampleSheetError::InvalidSampleName { .. } => ErrorKind::SampleErr,
            SampleSheetError::UnknownPanno { .. } => ErrorKind::PannoErr,
            SampleSheetError::UnknownRuntype { .. } => ErrorKind::RuntypesErr,
        }
    }
}

/// Outcome of SampleSheet validation
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: BTreeMap<ErrorKind, Vec<SampleSheetError>>,
    pub tso: bool,
    pub dev_run: bool,
    pub samples: Vec<String>,
}

impl ValidationReport {
    fn push(&mut self, error: SampleSheetError) {
        self.errors.entry(error.kind()).or_default().push(error);
    }

    pub fn has(&self, kind: ErrorKind) -> bool {
        self.errors.contains_key(&kind)
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn disallowed_errors(&self) -> Vec<ErrorKind> {
        self.errors
            .keys()
            .filter(|kind| kind.is_disallowed())
            .copied()
            .collect()
    }

    pub fn has_disallowed_errors(&self) -> bool {
        !self.disallowed_errors().is_empty()
    }
}

/// One data row of a SampleSheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    pub sample_id: String,
    pub sample_name: String,
}

/// Parsed `[Data]` section of a SampleSheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSection {
    pub headers: Vec<String>,
    pub rows: Vec<DataRow>,
}

/// Parse the `[Data]` section: the first non-empty line after `[Data]` holds
/// the column headers, the rows run until the next `[Section]` or EOF.
///
/// Returns `None` when there is no `[Data]` section.
pub fn parse_data_section(contents: &str) -> anyhow::Result<Option<DataSection>> {
    let mut lines = contents.lines().skip_while(|line| !line.trim_start().starts_with("[Data]"));
    if lines.next().is_none() {
        return Ok(None);
    }

    let block: Vec<&str> = lines
        .take_while(|line| !line.trim_start().starts_with('['))
        .filter(|line| !line.trim_matches(|c| c == ',' || c == ' ').is_empty())
        .collect();
    if block.is_empty() {
        return Ok(Some(DataSection::default()));
    }

    let joined = block.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(joined.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (id_col, name_col) = (column("Sample_ID"), column("Sample_Name"));

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |col: Option<usize>| {
            col.and_then(|c| record.get(c))
                .unwrap_or("")
                .to_string()
        };
        rows.push(DataRow {
            sample_id: field(id_col),
            sample_name: field(name_col),
        });
    }

    Ok(Some(DataSection { headers, rows }))
}

/// Validates a SampleSheet against the naming schemas and the panel catalogue.
///
/// # Example
///
/// ```rust,ignore
/// let check = SamplesheetCheck::new(&rf.samplesheet_path, &config);
/// let report = check.validate(&logger);
/// if report.has_disallowed_errors() { ... }
/// ```
pub struct SamplesheetCheck<'a> {
    pub samplesheet_path: PathBuf,
    pub allowed_sequencer_ids: BTreeSet<String>,
    pub allowed_panels: BTreeSet<String>,
    pub tso_panels: BTreeSet<String>,
    pub dev_panels: BTreeSet<String>,
    config: &'a Config,
}

impl<'a> SamplesheetCheck<'a> {
    pub fn new(samplesheet_path: &Path, config: &'a Config) -> Self {
        Self {
            samplesheet_path: samplesheet_path.to_path_buf(),
            allowed_sequencer_ids: config.general.sequencer_ids.iter().cloned().collect(),
            allowed_panels: config.allowed_panels(),
            tso_panels: config.tso_panels(),
            dev_panels: config.development_panels(),
            config,
        }
    }

    /// Run every check, accumulating errors by kind.
    pub fn validate(&self, logger: &AdLogger) -> ValidationReport {
        let mut report = ValidationReport::default();
        let path = &self.samplesheet_path;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
            .to_string();

        if !path.exists() {
            report.push(SampleSheetError::NotPresent { path: path.clone() });
        }

        if !self.config.general.samplesheet_name_pattern.is_match(&filename) {
            report.push(SampleSheetError::InvalidName {
                name: filename.clone(),
            });
        }

        let sequencer_id = filename.split('_').nth(1).unwrap_or("").to_string();
        if !self.allowed_sequencer_ids.contains(&sequencer_id) {
            report.push(SampleSheetError::UnknownSequencer { sequencer_id });
        }

        if path.exists() {
            self.check_contents(&mut report, logger);
        }

        for (kind, errors) in &report.errors {
            for error in errors {
                if kind.is_disallowed() {
                    logger.error(format!("{}: {}", kind, error));
                } else {
                    logger.warning(format!("{}: {}", kind, error));
                }
            }
        }
        if report.is_valid() {
            logger.info(format!("SampleSheet {} passed all checks", path.display()));
        }

        report
    }

    fn check_contents(&self, report: &mut ValidationReport, logger: &AdLogger) {
        let path = &self.samplesheet_path;
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size <= MIN_SAMPLESHEET_BYTES {
            report.push(SampleSheetError::Empty { path: path.clone() });
            return;
        }

        let section = match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|contents| parse_data_section(&contents))
        {
            Ok(section) => section,
            Err(e) => {
                logger.exception(format!("Could not parse {}: {}", path.display(), e));
                None
            }
        };

        let Some(section) = section else {
            report.push(SampleSheetError::MissingHeaders {
                missing: "[Data]".to_string(),
            });
            return;
        };

        let missing: Vec<&str> = REQUIRED_HEADERS
            .iter()
            .filter(|header| !section.headers.iter().any(|h| h == *header))
            .copied()
            .collect();
        if !missing.is_empty() {
            report.push(SampleSheetError::MissingHeaders {
                missing: missing.join(", "),
            });
            return;
        }

        let mismatched: Vec<&str> = section
            .rows
            .iter()
            .filter(|row| row.sample_id != row.sample_name)
            .map(|row| row.sample_id.as_str())
            .collect();
        if !mismatched.is_empty() {
            report.push(SampleSheetError::IdNameMismatch {
                ids: mismatched.join(", "),
            });
        }

        for row in &section.rows {
            self.check_sample(&row.sample_name, report);
            report.samples.push(row.sample_name.clone());
        }
    }

    fn check_sample(&self, sample: &str, report: &mut ValidationReport) {
        if !VALID_CHARS.is_match(sample) {
            report.push(SampleSheetError::InvalidCharacters {
                sample: sample.to_string(),
            });
        }

        let captures = self.config.general.sample_name_pattern.captures(sample);
        if captures.is_none() {
            report.push(SampleSheetError::InvalidSampleName {
                sample: sample.to_string(),
            });
        }

        // INFO: fall back to a bare Pan token so TSO/dev detection still works on malformed names
        let panno = captures
            .as_ref()
            .and_then(|caps| caps.name("panno"))
            .map(|m| m.as_str())
            .or_else(|| PANNO.find(sample).map(|m| m.as_str()));

        if let Some(panno) = panno {
            if !self.allowed_panels.contains(panno) {
                report.push(SampleSheetError::UnknownPanno {
                    sample: sample.to_string(),
                    panno: panno.to_string(),
                });
            }
            report.tso |= self.tso_panels.contains(panno);
            report.dev_run |= self.dev_panels.contains(panno);
        } else if captures.is_some() {
            report.push(SampleSheetError::UnknownPanno {
                sample: sample.to_string(),
                panno: String::new(),
            });
        }

        if let Some(libprep) = captures.as_ref().and_then(|caps| caps.name("libprep")) {
            let runtype = LEADING_UPPER
                .find(libprep.as_str())
                .map(|m| m.as_str())
                .unwrap_or("");
            if !self.config.general.runtypes.iter().any(|r| r == runtype) {
                report.push(SampleSheetError::UnknownRuntype {
                    sample: sample.to_string(),
                    runtype: runtype.to_string(),
                });
            }
        }
    }
}

/// Extract the first `Pan\d+` token from a sample name
pub fn find_panno(sample: &str) -> Option<&str> {
    PANNO.find(sample).map(|m| m.as_str())
}
