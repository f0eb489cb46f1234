pub mod add;
pub mod annotate;
pub mod create;
pub mod delete_remote;
pub mod inspect;
pub mod list;
pub mod push;
pub mod remove;
pub mod rm;

use indicatif::{ProgressBar, ProgressStyle};
use mlist_core::{CancelToken, CoreError, ErrorKind, IndexManager};
use mlist_remote::RemoteError;
use mlist_schema::{Index, ManifestEntry};
use std::fmt;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_REMOTE_ERROR: u8 = 4;

/// Everything a subcommand needs.
pub struct Context {
    pub manager: IndexManager,
    pub cancel: CancelToken,
    pub json: bool,
}

/// A message for stderr and the exit code that goes with it.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn config(err: &RemoteError) -> Self {
        Self {
            code: EXIT_FAILURE,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        Self {
            code: exit_code_for(err.kind()),
            message: err.to_string(),
        }
    }
}

pub fn exit_code_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidReference
        | ErrorKind::UnsupportedMediaType
        | ErrorKind::MissingPlatformInfo => EXIT_VALIDATION_ERROR,
        ErrorKind::IndexNotFound
        | ErrorKind::ManifestNotInIndex
        | ErrorKind::Corrupt
        | ErrorKind::SaveFailure => EXIT_STORE_ERROR,
        ErrorKind::ImageNotFound | ErrorKind::PushFailure => EXIT_REMOTE_ERROR,
        ErrorKind::Cancelled | ErrorKind::Config => EXIT_FAILURE,
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, Failure> {
    serde_json::to_string_pretty(value).map_err(|e| Failure {
        code: EXIT_FAILURE,
        message: format!("JSON serialization failed: {e}"),
    })
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

/// A spinner, or a hidden bar when stdout carries JSON.
pub fn progress(json: bool, msg: &str) -> ProgressBar {
    if json {
        ProgressBar::hidden()
    } else {
        spinner(msg)
    }
}

/// Run `op` under a spinner, finishing it with `done` or a failure mark.
pub fn with_spinner<T>(
    json: bool,
    msg: &str,
    done: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, Failure> {
    let pb = progress(json, msg);
    match op() {
        Ok(value) => {
            spin_ok(&pb, done);
            Ok(value)
        }
        Err(e) => {
            spin_fail(&pb, &format!("{msg} failed"));
            Err(e.into())
        }
    }
}

pub fn colorize_platform(entry: &ManifestEntry) -> String {
    use console::Style;
    match entry.platform {
        Some(ref p) if p.is_complete() => Style::new().green().apply_to(p).to_string(),
        Some(ref p) => Style::new().yellow().apply_to(p).to_string(),
        None => Style::new().red().apply_to("(no platform)").to_string(),
    }
}

/// Human-readable listing of an index.
pub fn print_index(name: &str, index: &Index) {
    println!("name:        {name}");
    println!("media_type:  {}", index.media_type);
    println!("manifests:   {}", index.manifests.len());
    for entry in &index.manifests {
        println!(
            "  {}  {:>8}  {}",
            entry.digest.short(),
            entry.size,
            colorize_platform(entry)
        );
    }
}
