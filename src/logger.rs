use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Record};
use regex::Regex;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::consts::*;

lazy_static! {
    static ref AUTH_TOKEN: Regex = Regex::new(r"(--auth-token)\s+[^\s)'\x22]+").unwrap();

    /// Message templates shared by all scopes, filled positionally by `AdLogger::msg`
    pub static ref LOG_MSGS: HashMap<&'static str, &'static str> = HashMap::from([
        ("cmd_success", "Command completed successfully (return code {}): {}"),
        ("cmd_fail", "Command failed (return code {}): {}\nSTDOUT: {}\nSTDERR: {}"),
        ("sentinel_created", "Created sentinel file {}"),
        ("sentinel_fail", "Could not create sentinel file {}: {}"),
        ("skip_processed", "Runfolder {} has already been processed. Skipping"),
        ("ss_errors", "SampleSheet {} failed validation: {}"),
        ("upload_fail", "Upload of {} failed"),
        ("runfolder_done", "Processing of runfolder {} complete"),
    ]);
}

/// Replace the value following `--auth-token` with a mask.
///
/// # Example
///
/// ```rust,ignore
/// let line = redact("ua --auth-token abc123 --project p");
/// assert_eq!(line, "ua --auth-token <MASKED_KEY> --project p");
/// ```
pub fn redact(line: &str) -> Cow<'_, str> {
    AUTH_TOKEN.replace_all(line, format!("$1 {}", MASKED_KEY).as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    File,
    Syslog,
    Stream,
}

/// Per-scope logger writing every record to a logfile, syslog and stdout.
///
/// Each sink is an independent `fern` dispatch turned into a boxed
/// `log::Log`, so sinks can be dropped one at a time. Dropping the
/// logger closes every handle.
pub struct AdLogger {
    name: String,
    sinks: Vec<(SinkKind, Box<dyn Log>)>,
    logfile: Option<PathBuf>,
    pub log_flags: HashMap<&'static str, String>,
    pub timestamp: String,
}

impl AdLogger {
    /// Create a logger with file, syslog and stdout sinks.
    ///
    /// The logfile is opened lazily in append mode on the first record.
    ///
    /// # Arguments
    ///
    /// * `name` - Logger name, written into every line.
    /// * `logfile` - Path to the logfile.
    /// * `timestamp` - Timestamp of the scope that owns the logger.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let logger = AdLogger::new("demultiplex_250101_A01229_0001_AXXX", &path, "20250101_101010");
    /// logger.info("Starting");
    /// ```
    pub fn new(name: &str, logfile: &Path, timestamp: &str) -> Self {
        let mut logger = Self::console(name, timestamp);
        logger.logfile = Some(logfile.to_path_buf());

        let file: Box<dyn Write + Send> = Box::new(DelayedFile::new(logfile));
        logger.sinks.insert(0, (SinkKind::File, build_sink(name, file.into())));

        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: name.to_string(),
            pid: std::process::id(),
        };
        match syslog::unix(formatter) {
            Ok(writer) => logger
                .sinks
                .insert(1, (SinkKind::Syslog, build_sink(name, writer.into()))),
            Err(e) => log::warn!("WARN: syslog unavailable for {}: {}", name, e),
        }

        logger
    }

    /// Create a logger that only writes to stdout.
    pub fn console(name: &str, timestamp: &str) -> Self {
        Self {
            name: name.to_string(),
            sinks: vec![(SinkKind::Stream, build_sink(name, io::stdout().into()))],
            logfile: None,
            log_flags: HashMap::new(),
            timestamp: timestamp.to_string(),
        }
    }

    /// Attach per-scope flag strings, looked up with `flag`.
    pub fn with_flags(mut self, flags: &[(&'static str, &str)]) -> Self {
        for (key, value) in flags {
            self.log_flags.insert(key, value.to_string());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logfile(&self) -> Option<&Path> {
        self.logfile.as_deref()
    }

    pub fn flag(&self, key: &str) -> &str {
        self.log_flags.get(key).map(String::as_str).unwrap_or("")
    }

    /// Fill a message template from `LOG_MSGS` positionally.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let msg = logger.msg("sentinel_created", &[&path.display()]);
    /// ```
    pub fn msg(&self, key: &str, args: &[&dyn Display]) -> String {
        let Some(template) = LOG_MSGS.get(key) else {
            return key.to_string();
        };

        let mut args = args.iter();
        let mut message = String::with_capacity(template.len());
        let mut parts = template.split("{}").peekable();
        while let Some(part) = parts.next() {
            message.push_str(part);
            if parts.peek().is_some() {
                match args.next() {
                    Some(arg) => message.push_str(&arg.to_string()),
                    None => message.push_str("{}"),
                }
            }
        }
        message
    }

    pub fn info<M: Display>(&self, message: M) {
        self.emit(Level::Info, &message.to_string());
    }

    pub fn warning<M: Display>(&self, message: M) {
        self.emit(Level::Warn, &message.to_string());
    }

    pub fn error<M: Display>(&self, message: M) {
        self.emit(Level::Error, &message.to_string());
    }

    pub fn exception<M: Display>(&self, message: M) {
        self.emit(Level::Error, &format!("EXCEPTION: {}", message));
    }

    fn emit(&self, level: Level, message: &str) {
        for (_, sink) in &self.sinks {
            sink.log(
                &Record::builder()
                    .args(format_args!("{}", message))
                    .level(level)
                    .target(&self.name)
                    .build(),
            );
        }
    }

    /// Remove and close every sink.
    pub fn shutdown(&mut self) {
        for (_, sink) in &self.sinks {
            sink.flush();
        }
        self.sinks.clear();
    }

    /// Remove only the stdout sink, so that stdout stays clean for callers
    /// consuming structured output.
    pub fn shutdown_streamhandler(&mut self) {
        self.sinks.retain(|(kind, _)| *kind != SinkKind::Stream);
    }

    pub fn is_shutdown(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Drop for AdLogger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AdLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdLogger")
            .field("name", &self.name)
            .field("logfile", &self.logfile)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

fn build_sink(name: &str, output: fern::Output) -> Box<dyn Log> {
    let name = name.to_string();
    let (_, sink) = fern::Dispatch::new()
        .format(move |out, message, record| {
            let line = message.to_string();
            out.finish(format_args!(
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                name,
                record.level(),
                redact(&line)
            ))
        })
        .level(LevelFilter::Info)
        .chain(output)
        .into_log();
    sink
}

/// Append-mode file writer that only touches the filesystem on first write
struct DelayedFile {
    path: PathBuf,
    file: Option<File>,
}

impl DelayedFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
        }
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }

        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "logfile not open"))
    }
}

impl Write for DelayedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_redact_auth_token() {
        assert_eq!(
            redact("ua --auth-token abc123 --project p"),
            "ua --auth-token <MASKED_KEY> --project p"
        );
        assert_eq!(
            redact("JOB_ID=$(dx run app --auth-token abc123)"),
            "JOB_ID=$(dx run app --auth-token <MASKED_KEY>)"
        );
        assert_eq!(redact("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn test_logfile_is_delayed_and_formatted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_demultiplex.log");
        let mut logger = AdLogger::new("demultiplex_run", &path, "20250101_000000");

        assert!(!path.exists());
        logger.info("dx upload --auth-token secret");
        logger.error("something broke");
        logger.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - demultiplex_run - INFO - dx upload --auth-token <MASKED_KEY>"));
        assert!(lines[1].contains(CLOUD_ERROR_LINE));
    }

    #[test]
    fn test_shutdown_releases_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        let mut logger = AdLogger::new("x", &path, "ts");

        logger.shutdown_streamhandler();
        assert!(!logger.is_shutdown());
        logger.shutdown();
        assert!(logger.is_shutdown());

        logger.info("dropped on the floor");
        assert!(!path.exists());
    }

    #[test]
    fn test_msg_templates() {
        let logger = AdLogger::console("x", "ts");
        assert_eq!(
            logger.msg("sentinel_created", &[&"/tmp/flag"]),
            "Created sentinel file /tmp/flag"
        );
        assert_eq!(logger.msg("unknown_key", &[]), "unknown_key");

        let flagged = logger.with_flags(&[("fail", "DEMULTIPLEX FAIL")]);
        assert_eq!(flagged.flag("fail"), "DEMULTIPLEX FAIL");
        assert_eq!(flagged.flag("missing"), "");
    }
}
