//! Newline-delimited JSON request log with size-based rotation.
//!
//! One record per `/analisar` request. Records never contain the analysed
//! text, the model output or the credential; only outcome, timings and sizes.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::config::{RotationConfig, TelemetryConfig};
use crate::pipeline::StageTimings;

/// Size-based rotating writer. Backups are `<path>.1` .. `<path>.<keep>`;
/// the newest backup is optionally gzipped to `<path>.1.gz`.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    rotation: RotationConfig,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            rotation,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.rotation.max_bytes {
            if self.current_size().map(|sz| sz >= limit).unwrap_or(false) {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn backup(&self, idx: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        let keep = self.rotation.keep;
        if keep > 0 {
            for idx in (1..keep).rev() {
                let from = self.backup(idx);
                if from.exists() {
                    fs::rename(&from, self.backup(idx + 1))?;
                }
            }
            fs::rename(&self.path, self.backup(1))?;
            if self.rotation.compress {
                self.compress_newest_backup();
            }
        }
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    fn compress_newest_backup(&self) {
        let newest = self.backup(1);
        let Ok(data) = fs::read(&newest) else {
            return;
        };
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        if gz.write_all(&data).is_err() {
            return;
        }
        if let Ok(buf) = gz.finish() {
            let mut gz_path = newest.clone().into_os_string();
            gz_path.push(".gz");
            if fs::write(PathBuf::from(gz_path), buf).is_ok() {
                let _ = fs::remove_file(&newest);
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: &'static str,
    pub ms: u64,
}

/// One request record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent<'a> {
    pub schema_version: u8,
    pub ts: String,
    pub status: u16,
    /// `ok` or the wire error code.
    pub outcome: &'a str,
    /// Error sub-kind such as `timeout`; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'a str>,
    pub latency_ms: u64,
    pub engine_version: &'a str,
    pub stage_timings: Vec<StageTiming>,
}

impl<'a> RequestEvent<'a> {
    pub fn new(
        status: u16,
        outcome: &'a str,
        kind: Option<&'a str>,
        latency_ms: u64,
        engine_version: &'a str,
        timings: &StageTimings,
    ) -> Self {
        Self {
            schema_version: 1,
            ts: chrono::Utc::now().to_rfc3339(),
            status,
            outcome,
            kind,
            latency_ms,
            engine_version,
            stage_timings: timings
                .iter()
                .map(|(stage, ms)| StageTiming { stage: *stage, ms: *ms })
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct TelemetrySink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl TelemetrySink {
    /// Open the configured log file. A file that cannot be opened disables
    /// the file log with a warning rather than failing startup.
    pub fn from_config(cfg: &TelemetryConfig) -> Self {
        let writer = match cfg.log_file.as_deref() {
            Some(path) => match RotatingWriter::open(path, cfg.rotation.clone()) {
                Ok(w) => Some(Arc::new(Mutex::new(w))),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to open LOG_FILE; request log disabled");
                    None
                }
            },
            None => None,
        };
        Self {
            writer,
            log_stdout: cfg.log_stdout,
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: &RequestEvent<'_>) {
        if let Some(writer) = &self.writer {
            let line = match serde_json::to_string(event) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize request event");
                    return;
                }
            };
            match writer.lock() {
                Ok(mut guard) => match guard.write_line(&line) {
                    Ok(()) => {
                        self.lines_total.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to write request log line");
                        self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                },
                Err(_) => {
                    self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if self.log_stdout {
            tracing::info!(
                target: "telemetry",
                status = event.status,
                outcome = event.outcome,
                kind = ?event.kind,
                latencyMs = event.latency_ms,
                stages = event.stage_timings.len(),
                "request"
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(max_bytes: u64, keep: usize, compress: bool) -> RotationConfig {
        RotationConfig {
            max_bytes: Some(max_bytes),
            keep,
            compress,
        }
    }

    #[test]
    fn rotates_when_limit_reached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.log");
        let mut w = RotatingWriter::open(path.to_str().unwrap(), rotation(32, 2, false)).unwrap();
        for i in 0..6 {
            w.write_line(&format!("{{\"line\":{:02},\"pad\":\"xxxxxxxx\"}}", i)).unwrap();
        }
        assert!(path.exists());
        assert!(dir.path().join("req.log.1").exists());
        assert!(dir.path().join("req.log.2").exists());
        assert!(!dir.path().join("req.log.3").exists());
    }

    #[test]
    fn compresses_newest_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.log");
        let mut w = RotatingWriter::open(path.to_str().unwrap(), rotation(16, 1, true)).unwrap();
        w.write_line("{\"first\":\"aaaaaaaaaaaaaaaa\"}").unwrap();
        w.write_line("{\"second\":true}").unwrap();
        assert!(dir.path().join("req.log.1.gz").exists());
        assert!(!dir.path().join("req.log.1").exists());
        let current = fs::read_to_string(&path).unwrap();
        assert_eq!(current.trim(), "{\"second\":true}");
    }

    #[test]
    fn sink_writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let sink = TelemetrySink::from_config(&TelemetryConfig {
            log_file: Some(path.to_string_lossy().to_string()),
            ..TelemetryConfig::default()
        });
        let timings: StageTimings = vec![("sanitize", 0), ("compile", 0)];
        sink.emit(&RequestEvent::new(400, "ValidationError", Some("empty_string"), 1, "1.0.0", &timings));
        assert_eq!(sink.lines_total(), 1);
        let content = fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(v["outcome"], "ValidationError");
        assert_eq!(v["kind"], "empty_string");
        assert_eq!(v["stageTimings"][1]["stage"], "compile");
    }
}
