use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

/// Region-only segmentation job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomaticJob {
    pub bbox: Vec<f64>,
    pub zoom: i64,
    pub id: String,
    pub project: String,
}

/// Segmentation job guided by point prompts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptJob {
    pub bbox: Vec<f64>,
    pub zoom: i64,
    pub point_coords: Vec<Vec<f64>>,
    pub point_labels: Vec<i64>,
    pub id: String,
    pub project: String,
}

/// The external segmentation routine.
///
/// Calls are blocking and may take a long time; callers run them on a worker thread.
/// `Ok` carries whatever the routine produced, including `{"error": ...}` payloads.
/// `Err` is a fault of the routine itself.
pub trait SegmentationEngine: Send + Sync {
    fn name(&self) -> &str;

    fn detect_segment_objects(&self, job: &AutomaticJob) -> Result<Value>;

    fn detect_segment_point_input_prompts(&self, job: &PromptJob) -> Result<Value>;
}

/// Stand-in used when no segmentation program is configured.
pub struct UnconfiguredEngine;

impl UnconfiguredEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    fn payload() -> Value {
        json!({ "error": "segmentation backend is not configured" })
    }
}

impl SegmentationEngine for UnconfiguredEngine {
    fn name(&self) -> &str {
        "unconfigured"
    }

    fn detect_segment_objects(&self, _job: &AutomaticJob) -> Result<Value> {
        Ok(Self::payload())
    }

    fn detect_segment_point_input_prompts(&self, _job: &PromptJob) -> Result<Value> {
        Ok(Self::payload())
    }
}

/// Runs an external program per call: job JSON on stdin, result JSON on stdout.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: &str, args: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            program: program.to_string(),
            args,
        })
    }

    /// `parts[0]` is the program, the rest its arguments.
    pub fn from_parts(parts: &[String]) -> Result<Arc<Self>> {
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| anyhow!("empty segmentation command"))?;
        Ok(Self::new(program, args.to_vec()))
    }

    fn run<T: Serialize>(&self, mode: &str, job: &T) -> Result<Value> {
        let mut request = serde_json::to_value(job)?;
        if let Value::Object(map) = &mut request {
            map.insert("mode".to_string(), Value::String(mode.to_string()));
        }
        let input = serde_json::to_vec(&request)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start `{}`", self.program))?;

        // Feed stdin from its own thread so a program that writes while it
        // reads cannot deadlock against a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || stdin.write_all(&input))
        });

        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for `{}`", self.program))?;

        match writer.map(|handle| handle.join()) {
            None | Some(Ok(Ok(()))) => {}
            // the program is allowed to stop reading once it has its answer
            Some(Ok(Err(e))) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(program = %self.program, "program closed stdin before reading the whole job");
            }
            Some(Ok(Err(e))) => {
                tracing::warn!(program = %self.program, error = %e, "failed to send job");
            }
            Some(Err(_)) => {
                tracing::warn!(program = %self.program, "stdin writer thread panicked");
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("`{}` did not print a JSON document", self.program))
    }
}

impl SegmentationEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn detect_segment_objects(&self, job: &AutomaticJob) -> Result<Value> {
        self.run("automatic", job)
    }

    fn detect_segment_point_input_prompts(&self, job: &PromptJob) -> Result<Value> {
        self.run("predictor", job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn automatic_job() -> AutomaticJob {
        AutomaticJob {
            bbox: vec![-73.99, 40.73, -73.98, 40.74],
            zoom: 18,
            id: "det-1".into(),
            project: "nyc".into(),
        }
    }

    #[test]
    fn unconfigured_engine_returns_error_payload() {
        let engine = UnconfiguredEngine::new();
        let out = engine.detect_segment_objects(&automatic_job()).unwrap();
        assert!(out.get("error").is_some());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandEngine::from_parts(&[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_sends_job_on_stdin() {
        let engine = CommandEngine::new("sh", vec!["-c".into(), "cat".into()]);
        let echoed = engine.detect_segment_objects(&automatic_job()).unwrap();

        assert_eq!(echoed["mode"], "automatic");
        assert_eq!(echoed["zoom"], 18);
        assert_eq!(echoed["id"], "det-1");
        assert_eq!(echoed["project"], "nyc");
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_passes_prompts() {
        let engine = CommandEngine::new("sh", vec!["-c".into(), "cat".into()]);
        let job = PromptJob {
            bbox: vec![0.0, 0.0, 1.0, 1.0],
            zoom: 16,
            point_coords: vec![vec![0.5, 0.5]],
            point_labels: vec![1],
            id: "det-2".into(),
            project: "nyc".into(),
        };
        let echoed = engine.detect_segment_point_input_prompts(&job).unwrap();

        assert_eq!(echoed["mode"], "predictor");
        assert_eq!(echoed["point_coords"], json!([[0.5, 0.5]]));
        assert_eq!(echoed["point_labels"], json!([1]));
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_relays_error_payloads_as_ok() {
        let engine = CommandEngine::new(
            "sh",
            vec!["-c".into(), r#"cat >/dev/null; echo '{"error": "no mask"}'"#.into()],
        );
        let out = engine.detect_segment_objects(&automatic_job()).unwrap();
        assert_eq!(out, json!({"error": "no mask"}));
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_failures_are_faults() {
        let engine = CommandEngine::new(
            "sh",
            vec!["-c".into(), "cat >/dev/null; echo boom >&2; exit 3".into()],
        );
        let err = engine.detect_segment_objects(&automatic_job()).unwrap_err();
        assert!(err.to_string().contains("boom"));

        let engine = CommandEngine::new("sh", vec!["-c".into(), "cat >/dev/null; echo not-json".into()]);
        assert!(engine.detect_segment_objects(&automatic_job()).is_err());

        let engine = CommandEngine::new("/definitely/not/a/program", vec![]);
        assert!(engine.detect_segment_objects(&automatic_job()).is_err());
    }

    fn large_prompt_job(points: usize) -> PromptJob {
        PromptJob {
            bbox: vec![0.0, 0.0, 1.0, 1.0],
            zoom: 20,
            point_coords: (0..points).map(|i| vec![i as f64 + 0.25, i as f64 + 0.75]).collect(),
            point_labels: (0..points).map(|i| (i % 2) as i64).collect(),
            id: "det-big".into(),
            project: "nyc".into(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_streams_large_jobs() {
        use std::sync::mpsc;
        use std::time::Duration;

        // several hundred KiB, well past one pipe buffer
        let job = large_prompt_job(20_000);
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let engine = CommandEngine::new("sh", vec!["-c".into(), "cat".into()]);
            let _ = tx.send(engine.detect_segment_point_input_prompts(&job));
        });

        let echoed = rx
            .recv_timeout(Duration::from_secs(30))
            .expect("command engine stalled on a large job")
            .unwrap();
        assert_eq!(echoed["point_coords"].as_array().unwrap().len(), 20_000);
        assert_eq!(echoed["point_labels"][19_999], 1);
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_accepts_answer_without_reading_stdin() {
        let engine = CommandEngine::new(
            "sh",
            vec!["-c".into(), r#"echo '{"masks": 1}'"#.into()],
        );
        let out = engine
            .detect_segment_point_input_prompts(&large_prompt_job(20_000))
            .unwrap();
        assert_eq!(out, json!({"masks": 1}));
    }
}
