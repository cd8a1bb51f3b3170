//! Warmup progress reporting.
//!
//! Reports how many missing embeddings have been computed so far during
//! `notes warmup`. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// Receives `(done, total)` after every warmup batch, starting with
/// `(0, total)`.
pub trait WarmupProgress: Send + Sync {
    fn report(&self, done: usize, total: usize);
}

impl<F> WarmupProgress for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn report(&self, done: usize, total: usize) {
        self(done, total)
    }
}

/// Human-friendly progress on stderr: "warmup  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl WarmupProgress for StderrProgress {
    fn report(&self, done: usize, total: usize) {
        let line = format!(
            "warmup  embedding  {} / {} chunks\n",
            format_number(done as u64),
            format_number(total as u64)
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl WarmupProgress for JsonProgress {
    fn report(&self, done: usize, total: usize) {
        let obj = serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "done": done,
            "total": total
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl WarmupProgress for NoProgress {
    fn report(&self, _done: usize, _total: usize) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn WarmupProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
