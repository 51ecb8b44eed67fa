//! Parsing for the per-host lines that follow `PLAY RECAP`.

use derive_getters::Getters;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RECAP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)\s*:\s*(ok=\d+.*)$").expect("valid regex"));
static RECAP_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w+)=(\d+)").expect("valid regex"));

/// Final tallies Ansible prints for one host, e.g.
/// `web1 : ok=3 changed=1 unreachable=0 failed=0 skipped=2 rescued=0 ignored=0`.
#[derive(Getters, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecapEntry {
    host: String,
    ok: u32,
    changed: u32,
    unreachable: u32,
    failed: u32,
    skipped: u32,
    rescued: u32,
    ignored: u32,
}

impl RecapEntry {
    /// Parse a recap host line. Returns `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let captures = RECAP_LINE.captures(line.trim())?;
        let mut entry = RecapEntry {
            host: captures[1].to_string(),
            ..Default::default()
        };
        for field in RECAP_FIELD.captures_iter(&captures[2]) {
            let value = field[2].parse().unwrap_or(0);
            match &field[1] {
                "ok" => entry.ok = value,
                "changed" => entry.changed = value,
                "unreachable" => entry.unreachable = value,
                "failed" => entry.failed = value,
                "skipped" => entry.skipped = value,
                "rescued" => entry.rescued = value,
                "ignored" => entry.ignored = value,
                _ => {}
            }
        }
        Some(entry)
    }

    /// Whether Ansible considers this host's run a failure.
    pub fn is_failure(&self) -> bool {
        self.failed > 0 || self.unreachable > 0
    }
}
