//! Accumulates classified output lines into a play → task → result tree.
//!
//! The tree is always re-derived from the full cumulative output of a job
//! rather than patched incrementally. Positions identify plays and tasks, so
//! re-parsing the same growing text on every poll can never duplicate a
//! task or count a result twice.

use std::collections::HashMap;
use std::fmt;

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::classify::{classify_text, LineEvent, ResultStatus};
use super::recap::RecapEntry;
use crate::log::*;

pub const UNNAMED_PLAY: &str = "Unnamed Play";
pub const UNNAMED_TASK: &str = "Unnamed Task";
pub const DEFAULT_HOST: &str = "localhost";

/// Identity of a [`Play`]: its name plus how many plays with the same name
/// came before it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayId(String);

impl PlayId {
    fn new(name: &str, ordinal: usize) -> Self {
        Self(format!("{name}#{ordinal}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a [`Task`]: owning play, name and ordinal among same-named
/// tasks of that play.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    fn new(play: &PlayId, name: &str, ordinal: usize) -> Self {
        Self(format!("{play}/{name}#{ordinal}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Displayed status of a task: the most significant outcome seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ok,
    Changed,
    Failed,
    Skipped,
    Unreachable,
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Skipped => 1,
            TaskStatus::Ok => 2,
            TaskStatus::Changed => 3,
            TaskStatus::Failed | TaskStatus::Unreachable => 4,
        }
    }

    /// Fold another host's result into this status. Between `failed` and
    /// `unreachable` the first one observed sticks.
    pub fn absorb(self, result: ResultStatus) -> Self {
        let incoming = TaskStatus::from(result);
        if incoming.rank() > self.rank() {
            incoming
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ok => "ok",
            TaskStatus::Changed => "changed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Unreachable => "unreachable",
        }
    }
}

impl From<ResultStatus> for TaskStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Ok => TaskStatus::Ok,
            ResultStatus::Changed => TaskStatus::Changed,
            ResultStatus::Failed => TaskStatus::Failed,
            ResultStatus::Skipped => TaskStatus::Skipped,
            ResultStatus::Unreachable => TaskStatus::Unreachable,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Play {
    id: PlayId,
    name: String,
    task_ids: Vec<TaskId>,
}

#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    host: String,
    status: ResultStatus,
    detail: Option<String>,
}

#[derive(Getters, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    name: String,
    play_id: PlayId,
    status: TaskStatus,
    results: Vec<TaskResult>,
    /// Plain output lines printed while this task was open.
    lines: Vec<String>,
    first_seen_at: OffsetDateTime,
}

impl Task {
    /// A task counts as completed once any host reported on it.
    pub fn is_completed(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Per-status totals across every result of a job.
#[derive(Getters, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    ok: u32,
    changed: u32,
    failed: u32,
    skipped: u32,
    unreachable: u32,
}

impl Counters {
    pub fn new(ok: u32, changed: u32, failed: u32, skipped: u32, unreachable: u32) -> Self {
        Self {
            ok,
            changed,
            failed,
            skipped,
            unreachable,
        }
    }

    fn record(&mut self, status: ResultStatus) {
        match status {
            ResultStatus::Ok => self.ok += 1,
            ResultStatus::Changed => self.changed += 1,
            ResultStatus::Failed => self.failed += 1,
            ResultStatus::Skipped => self.skipped += 1,
            ResultStatus::Unreachable => self.unreachable += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.ok + self.changed + self.failed + self.skipped + self.unreachable
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Cursor {
    play: Option<usize>,
    task: Option<TaskId>,
    in_recap: bool,
    last_host: Option<String>,
}

/// Everything known about one job's output.
#[derive(Getters, Debug, Clone, Default, PartialEq)]
pub struct ExecutionState {
    plays: Vec<Play>,
    tasks: HashMap<TaskId, Task>,
    counters: Counters,
    raw_output_seen: String,
    terminal: bool,
    /// Host tallies parsed from the recap block.
    recap: Vec<RecapEntry>,
    /// Every plain line printed after `PLAY RECAP`.
    recap_lines: Vec<String>,
    /// Plain lines printed before any task was opened.
    preamble: Vec<String>,
    #[getter(skip)]
    cursor: Cursor,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the whole tree from the complete output text of a job.
    pub fn parse(full_text: &str) -> Self {
        let mut state = Self::new();
        state.apply(classify_text(full_text));
        state.raw_output_seen = full_text.to_string();
        state
    }

    /// Fold classified events into this state.
    pub fn apply<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = LineEvent>,
    {
        for event in events {
            match event {
                LineEvent::Play(name) => self.open_play(&name),
                LineEvent::Task(name) => {
                    self.leave_recap();
                    self.open_task(&name);
                }
                LineEvent::Result {
                    status,
                    host,
                    detail,
                } => self.record_result(status, host, detail),
                LineEvent::Recap => {
                    self.cursor.task = None;
                    self.cursor.in_recap = true;
                }
                LineEvent::Plain(line) => self.record_plain(line),
            }
        }
        self.recount();
    }

    /// Re-derive the tree if `full_text` differs from what was last seen.
    /// First-seen timestamps of tasks that survive the re-parse are kept.
    /// Returns whether anything changed.
    pub fn refresh(&mut self, full_text: &str) -> bool {
        if self.raw_output_seen == full_text {
            return false;
        }
        let mut next = Self::parse(full_text);
        for (id, task) in next.tasks.iter_mut() {
            if let Some(previous) = self.tasks.get(id) {
                task.first_seen_at = previous.first_seen_at;
            }
        }
        next.terminal = self.terminal;
        trace!(
            "execution state: re-parsed {} bytes into {} plays and {} tasks",
            full_text.len(),
            next.plays.len(),
            next.tasks.len()
        );
        *self = next;
        true
    }

    /// The backend reported a final status; no further output is expected.
    pub fn mark_terminal(&mut self) {
        self.terminal = true;
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks in the order they appeared in the output.
    pub fn ordered_tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.plays
            .iter()
            .flat_map(|play| play.task_ids.iter())
            .filter_map(|id| self.tasks.get(id))
    }

    /// Share of tasks with at least one result, as a percentage in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        let total = self.tasks.len();
        if total == 0 {
            return 0.0;
        }
        let completed = self.tasks.values().filter(|t| t.is_completed()).count();
        (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }

    fn open_play(&mut self, name: &str) {
        let ordinal = self.plays.iter().filter(|p| p.name == name).count();
        self.plays.push(Play {
            id: PlayId::new(name, ordinal),
            name: name.to_string(),
            task_ids: vec![],
        });
        self.cursor.play = Some(self.plays.len() - 1);
        self.cursor.task = None;
        self.cursor.in_recap = false;
    }

    fn current_play(&mut self) -> usize {
        match self.cursor.play {
            Some(index) => index,
            None => {
                self.open_play(UNNAMED_PLAY);
                self.plays.len() - 1
            }
        }
    }

    fn open_task(&mut self, name: &str) -> TaskId {
        let play_index = self.current_play();
        let play = &self.plays[play_index];
        let ordinal = play
            .task_ids
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|task| task.name == name)
            .count();
        let id = TaskId::new(&play.id, name, ordinal);
        let task = Task {
            id: id.clone(),
            name: name.to_string(),
            play_id: play.id.clone(),
            status: TaskStatus::Pending,
            results: vec![],
            lines: vec![],
            first_seen_at: OffsetDateTime::now_utc(),
        };
        self.tasks.insert(id.clone(), task);
        self.plays[play_index].task_ids.push(id.clone());
        self.cursor.task = Some(id.clone());
        id
    }

    /// Output after the recap belongs to a fresh section: the next task or
    /// result opens a new play instead of reattaching to the one before.
    fn leave_recap(&mut self) {
        if self.cursor.in_recap {
            self.cursor.in_recap = false;
            self.cursor.play = None;
        }
    }

    fn record_result(&mut self, status: ResultStatus, host: Option<String>, detail: Option<String>) {
        self.leave_recap();
        let task_id = match self.cursor.task.clone() {
            Some(id) => id,
            None => self.open_task(UNNAMED_TASK),
        };
        let host = host
            .or_else(|| self.cursor.last_host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        self.cursor.last_host = Some(host.clone());

        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.status = task.status.absorb(status);
            task.results.push(TaskResult {
                host,
                status,
                detail,
            });
        }
    }

    fn record_plain(&mut self, line: String) {
        if self.cursor.in_recap {
            if let Some(entry) = RecapEntry::parse(&line) {
                self.recap.push(entry);
            }
            self.recap_lines.push(line);
            return;
        }
        match self.cursor.task.as_ref().and_then(|id| self.tasks.get_mut(id)) {
            Some(task) => task.lines.push(line),
            None => self.preamble.push(line),
        }
    }

    /// Counters are always derived from the full result list.
    fn recount(&mut self) {
        let mut counters = Counters::default();
        for result in self.tasks.values().flat_map(|task| task.results.iter()) {
            counters.record(result.status);
        }
        self.counters = counters;
    }
}
