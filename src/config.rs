use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_PUBLIC_DIR: &str = "public";

/// Process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Prefix for the artifact URLs handed back by `/predictions`.
    pub base_url: String,
    /// One subdirectory per project lives under here.
    pub public_dir: PathBuf,
    /// Upper bound on segmentation calls running at the same time.
    pub max_concurrent_segmentations: usize,
    /// `None` means wait for the segmentation call forever.
    pub segment_timeout: Option<Duration>,
    /// Program + args of the external segmentation routine. Whitespace separates
    /// arguments; single or double quotes keep spaces inside one.
    pub segment_command: Option<Vec<String>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = base_url.trim().trim_end_matches('/').to_string();

        let public_dir = lookup("PUBLIC_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR));

        let max_concurrent_segmentations = match lookup("SEGMENT_MAX_CONCURRENCY") {
            Some(raw) => {
                let n: usize = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("SEGMENT_MAX_CONCURRENCY is not a number: `{}`", raw))?;
                if n == 0 {
                    bail!("SEGMENT_MAX_CONCURRENCY must be greater than zero");
                }
                n
            }
            None => default_worker_count(),
        };

        let segment_timeout = match lookup("SEGMENT_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("SEGMENT_TIMEOUT_SECS is not a number: `{}`", raw))?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        };

        let segment_command = match lookup("SEGMENT_COMMAND") {
            Some(raw) => {
                let parts = split_command(&raw)
                    .with_context(|| format!("SEGMENT_COMMAND cannot be parsed: `{}`", raw))?;
                Some(parts).filter(|parts| !parts.is_empty())
            }
            None => None,
        };

        Ok(Self {
            base_url,
            public_dir,
            max_concurrent_segmentations,
            segment_timeout,
            segment_command,
        })
    }
}

// Same sizing as a typical thread-offload pool: min(32, cpus + 4).
fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(32)
}

/// Splits a command line the way a POSIX shell would for plain words:
/// `'...'` is literal, `"..."` allows `\"` and `\\`, and a bare `\` escapes the next char.
/// No expansion of any kind.
fn split_command(raw: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    parts.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => bail!("unterminated single quote"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => bail!("unterminated double quote"),
                        },
                        Some(c) => current.push(c),
                        None => bail!("unterminated double quote"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => bail!("trailing backslash"),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        parts.push(current);
    }
    Ok(parts)
}
