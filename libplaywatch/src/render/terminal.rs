use std::io::{self, Write};

use colored::{ColoredString, Colorize};

use super::{Mutation, NodeKind, ViewTree};
use crate::ipc::http::JobStatus;
use crate::output::{ResultStatus, TaskStatus};

/// Paints the journal of a [`ViewTree`] as append-only terminal lines.
///
/// Created nodes print once; updated tasks print a status line; progress and
/// summary changes print a compact status line. Nothing already written is
/// ever rewritten, so the output scrolls like the job card it replaces.
#[derive(Debug)]
pub struct TerminalPainter<W: Write> {
    out: W,
    color: bool,
    prefix: Option<String>,
}

impl TerminalPainter<io::Stdout> {
    /// Paint to stdout, with colors unless `NO_COLOR` is set.
    pub fn stdout() -> Self {
        let color = std::env::var("NO_COLOR").is_err();
        Self::new(io::stdout(), color)
    }
}

impl<W: Write> TerminalPainter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            prefix: None,
        }
    }

    /// Prefix every line, e.g. with a job id when several jobs share a
    /// terminal.
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Drain `view`'s journal and write one line per mutation.
    pub fn paint(&mut self, view: &mut ViewTree) -> io::Result<()> {
        for mutation in view.drain_journal() {
            let (id, created) = match mutation {
                Mutation::Created(id) => (id, true),
                Mutation::Updated(id) => (id, false),
            };
            let Some(node) = view.node(id) else {
                continue;
            };
            let indent = "  ".repeat(*node.depth());
            let line = match node.kind() {
                NodeKind::Progress { percent } => {
                    format!("progress: {percent:.0}%")
                }
                NodeKind::Summary { counters } => {
                    if counters.total() == 0 {
                        continue;
                    }
                    format!(
                        "{}={} {}={} {}={} {}={} {}={}",
                        self.paint_result(ResultStatus::Ok),
                        counters.ok(),
                        self.paint_result(ResultStatus::Changed),
                        counters.changed(),
                        self.paint_result(ResultStatus::Failed),
                        counters.failed(),
                        self.paint_result(ResultStatus::Skipped),
                        counters.skipped(),
                        self.paint_result(ResultStatus::Unreachable),
                        counters.unreachable(),
                    )
                }
                NodeKind::Play { name } => {
                    format!("{}", self.emphasize(&format!("PLAY [{name}]")))
                }
                NodeKind::Task { name, status } if created => {
                    format!("{indent}TASK [{name}] {}", self.paint_task(*status))
                }
                NodeKind::Task { name, status } => {
                    format!("{indent}[{}] {name}", self.paint_task(*status))
                }
                NodeKind::Result {
                    host,
                    status,
                    detail,
                } => match detail {
                    Some(detail) => {
                        format!("{indent}{}: [{host}] => {detail}", self.paint_result(*status))
                    }
                    None => format!("{indent}{}: [{host}]", self.paint_result(*status)),
                },
                NodeKind::Output { text } => format!("{indent}{text}"),
                NodeKind::Recap => {
                    format!("{}", self.emphasize("PLAY RECAP"))
                }
                NodeKind::Banner { status, message } => {
                    format!("{} {message}", self.paint_job(status))
                }
            };
            match &self.prefix {
                Some(prefix) => writeln!(self.out, "[{prefix}] {line}")?,
                None => writeln!(self.out, "{line}")?,
            }
        }
        self.out.flush()
    }

    /// Write job output verbatim, one prefixed line per output line.
    pub fn write_raw(&mut self, text: &str) -> io::Result<()> {
        for line in text.lines() {
            match &self.prefix {
                Some(prefix) => writeln!(self.out, "[{prefix}] {line}")?,
                None => writeln!(self.out, "{line}")?,
            }
        }
        self.out.flush()
    }

    fn colorize(&self, text: &str, status: TaskStatus) -> ColoredString {
        if !self.color {
            return text.normal();
        }
        match status {
            TaskStatus::Pending => text.dimmed(),
            TaskStatus::Ok => text.green(),
            TaskStatus::Changed => text.yellow(),
            TaskStatus::Skipped => text.cyan(),
            TaskStatus::Failed | TaskStatus::Unreachable => text.red().bold(),
        }
    }

    fn paint_task(&self, status: TaskStatus) -> ColoredString {
        self.colorize(status.as_str(), status)
    }

    fn paint_result(&self, status: ResultStatus) -> ColoredString {
        self.colorize(status.as_str(), TaskStatus::from(status))
    }

    fn paint_job(&self, status: &JobStatus) -> ColoredString {
        let label = format!("* job {status}:");
        if !self.color {
            return label.normal();
        }
        if status.is_success() {
            label.green().bold()
        } else {
            label.red().bold()
        }
    }

    fn emphasize(&self, text: &str) -> ColoredString {
        if self.color {
            text.bold()
        } else {
            text.normal()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ExecutionState;
    use crate::render::{render, render_terminal};

    fn painted(view: &mut ViewTree) -> String {
        let mut painter = TerminalPainter::new(Vec::new(), false);
        painter.paint(view).expect("writing to a vec");
        String::from_utf8(painter.into_inner()).expect("utf-8 output")
    }

    #[test]
    fn test_paint_new_nodes_then_updates() {
        let mut view = ViewTree::new();
        render(&mut view, &ExecutionState::parse("PLAY [Setup]\nTASK [Install pkg]\n"));
        let first = painted(&mut view);
        assert_eq!(
            "progress: 0%\nPLAY [Setup]\n  TASK [Install pkg] pending\n",
            first
        );

        render(
            &mut view,
            &ExecutionState::parse("PLAY [Setup]\nTASK [Install pkg]\nchanged: [host2] => {\"changed\": true}\n"),
        );
        let second = painted(&mut view);
        assert_eq!(
            "progress: 100%\nok=0 changed=1 failed=0 skipped=0 unreachable=0\n  [changed] Install pkg\n    changed: [host2] => {\"changed\": true}\n",
            second
        );

        render(
            &mut view,
            &ExecutionState::parse("PLAY [Setup]\nTASK [Install pkg]\nchanged: [host2] => {\"changed\": true}\n"),
        );
        assert_eq!("", painted(&mut view));
    }

    #[test]
    fn test_paint_output_and_recap_lines() {
        let mut view = ViewTree::new();
        render(
            &mut view,
            &ExecutionState::parse(
                "PLAY [Setup]\nTASK [Install pkg]\nchanged: [web1]\nmsg: restarted nginx\nPLAY RECAP ***\nweb1 : ok=1 changed=1 unreachable=0 failed=0\n",
            ),
        );
        let out = painted(&mut view);
        assert!(out.contains("    msg: restarted nginx\n"));
        assert!(out.contains("PLAY RECAP\n  web1 : ok=1 changed=1 unreachable=0 failed=0\n"));
    }

    #[test]
    fn test_prefix_and_banner() {
        let mut view = ViewTree::new();
        render_terminal(&mut view, &JobStatus::Failed, "playbook failed");
        let mut painter = TerminalPainter::new(Vec::new(), false).with_prefix("job-1");
        painter.paint(&mut view).expect("writing to a vec");
        let out = String::from_utf8(painter.into_inner()).expect("utf-8 output");
        assert_eq!("[job-1] * job failed: playbook failed\n", out);
    }
}
