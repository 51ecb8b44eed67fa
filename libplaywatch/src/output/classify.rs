//! Line classification for Ansible console output.
//!
//! Every line the backend streams back falls into exactly one [`LineEvent`].
//! Classification never fails: anything that isn't recognized comes back as
//! [`LineEvent::Plain`].

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PLAY_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"PLAY \[(.*?)\]").expect("valid regex"));
static TASK_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"TASK \[(.*?)\]").expect("valid regex"));
static RESULT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(ok|changed|failed|skipped|skipping|unreachable|fatal):\s*(?:\[([^\]]*)\])?(.*)$")
        .expect("valid regex")
});

/// The per-host outcome reported on a result line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Changed,
    Failed,
    Skipped,
    Unreachable,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Ok => "ok",
            ResultStatus::Changed => "changed",
            ResultStatus::Failed => "failed",
            ResultStatus::Skipped => "skipped",
            ResultStatus::Unreachable => "unreachable",
        }
    }

    fn from_keyword(keyword: &str, rest: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "ok" => Some(ResultStatus::Ok),
            "changed" => Some(ResultStatus::Changed),
            "failed" => Some(ResultStatus::Failed),
            "skipped" | "skipping" => Some(ResultStatus::Skipped),
            "unreachable" => Some(ResultStatus::Unreachable),
            // `fatal: [host]: UNREACHABLE! => ...` vs `fatal: [host]: FAILED! => ...`
            "fatal" if rest.contains("UNREACHABLE!") => Some(ResultStatus::Unreachable),
            "fatal" => Some(ResultStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classified line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// `PLAY [name]`
    Play(String),
    /// `TASK [name]`
    Task(String),
    /// The `PLAY RECAP` header.
    Recap,
    /// `status: [host] => detail`. The host is missing on some older
    /// verbosity formats.
    Result {
        status: ResultStatus,
        host: Option<String>,
        detail: Option<String>,
    },
    /// Anything else.
    Plain(String),
}

/// Classify one trimmed, non-empty line.
pub fn classify(line: &str) -> LineEvent {
    if let Some(captures) = PLAY_MARKER.captures(line) {
        return LineEvent::Play(captures[1].to_string());
    }
    if let Some(captures) = TASK_MARKER.captures(line) {
        return LineEvent::Task(captures[1].to_string());
    }
    if line.contains("PLAY RECAP") {
        return LineEvent::Recap;
    }
    if let Some(captures) = RESULT_LINE.captures(line) {
        let rest = captures.get(3).map(|m| m.as_str()).unwrap_or_default();
        if let Some(status) = ResultStatus::from_keyword(&captures[1], rest) {
            let host = captures
                .get(2)
                .map(|m| strip_delegation(m.as_str()))
                .filter(|host| !host.is_empty())
                .map(str::to_string);
            return LineEvent::Result {
                status,
                host,
                detail: result_detail(rest),
            };
        }
    }
    LineEvent::Plain(line.to_string())
}

/// Split `text` into lines, trim them, drop the empty ones and classify the
/// rest in order.
pub fn classify_text(text: &str) -> Vec<LineEvent> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(classify)
        .collect()
}

/// `[web1 -> localhost]` reports a delegated host; the result belongs to the
/// inventory host on the left.
fn strip_delegation(host: &str) -> &str {
    host.split(" -> ").next().unwrap_or(host).trim()
}

fn result_detail(rest: &str) -> Option<String> {
    let detail = match rest.find("=>") {
        Some(index) => rest[index + 2..].trim(),
        None => rest.trim(),
    };
    if detail.is_empty() {
        None
    } else {
        Some(detail.to_string())
    }
}
