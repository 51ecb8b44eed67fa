//! Incremental rendering of an [`ExecutionState`] into a retained view tree.
//!
//! A [`ViewTree`] plays the part of a job card: nodes are keyed by the ids
//! of the plays, tasks, results and output lines they show, are created once
//! and never removed, and are only touched when what they display actually
//! changed. Output can be cut mid-line by a poll, so every node whose text
//! comes from a single line is updated in place once the rest arrives.
//! Every creation and update is recorded in a journal that front-ends drain
//! to paint the difference.

use std::collections::HashMap;

use derive_getters::Getters;

use crate::ipc::http::JobStatus;
use crate::output::{Counters, ExecutionState, ResultStatus, TaskStatus};

pub mod terminal;

pub use terminal::TerminalPainter;

pub type NodeId = usize;

const PROGRESS_KEY: &str = "progress";
const SUMMARY_KEY: &str = "summary";
const BANNER_KEY: &str = "banner";
const RECAP_KEY: &str = "recap";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Progress {
        percent: f64,
    },
    Summary {
        counters: Counters,
    },
    Play {
        name: String,
    },
    Task {
        name: String,
        status: TaskStatus,
    },
    Result {
        host: String,
        status: ResultStatus,
        detail: Option<String>,
    },
    /// A plain output line: warnings, `msg` continuations, recap tallies.
    Output {
        text: String,
    },
    Recap,
    Banner {
        status: JobStatus,
        message: String,
    },
}

#[derive(Getters, Debug, Clone)]
pub struct Node {
    id: NodeId,
    key: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: usize,
    kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Created(NodeId),
    Updated(NodeId),
}

#[derive(Getters, Debug, Clone, Default)]
pub struct ViewTree {
    #[getter(skip)]
    nodes: Vec<Node>,
    #[getter(skip)]
    keys: HashMap<String, NodeId>,
    roots: Vec<NodeId>,
    #[getter(skip)]
    journal: Vec<Mutation>,
    /// Total node creations over the lifetime of the tree.
    created: usize,
    /// Total in-place updates over the lifetime of the tree.
    updated: usize,
}

impl ViewTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn find(&self, key: &str) -> Option<&Node> {
        self.keys.get(key).and_then(|id| self.nodes.get(*id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Take every mutation recorded since the last drain.
    pub fn drain_journal(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.journal)
    }

    /// Progress currently shown; 0 until the first render.
    pub fn progress(&self) -> f64 {
        match self.find(PROGRESS_KEY).map(|node| &node.kind) {
            Some(NodeKind::Progress { percent }) => *percent,
            _ => 0.0,
        }
    }

    /// Create the node for `key` unless it already exists.
    fn ensure(&mut self, key: String, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        if let Some(id) = self.keys.get(&key) {
            return *id;
        }
        let id = self.nodes.len();
        let depth = parent
            .and_then(|parent| self.nodes.get(parent))
            .map(|parent| parent.depth + 1)
            .unwrap_or(0);
        self.nodes.push(Node {
            id,
            key: key.clone(),
            parent,
            children: vec![],
            depth,
            kind,
        });
        match parent.and_then(|parent| self.nodes.get_mut(parent)) {
            Some(parent) => parent.children.push(id),
            None => self.roots.push(id),
        }
        self.keys.insert(key, id);
        self.journal.push(Mutation::Created(id));
        self.created += 1;
        id
    }

    /// Replace what a node shows, recording an update only on change.
    fn set(&mut self, id: NodeId, kind: NodeKind) {
        if let Some(node) = self.nodes.get_mut(id) {
            if node.kind != kind {
                node.kind = kind;
                self.journal.push(Mutation::Updated(id));
                self.updated += 1;
            }
        }
    }

    fn upsert(&mut self, key: String, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        if let Some(id) = self.keys.get(&key).copied() {
            self.set(id, kind);
            id
        } else {
            self.ensure(key, parent, kind)
        }
    }
}

/// Bring `view` up to date with `state`. Calling this again with the same
/// state records no mutations.
pub fn render(view: &mut ViewTree, state: &ExecutionState) {
    // The shown progress is a high-water mark: new tasks showing up can lower
    // the raw ratio, but the card never moves backwards.
    let percent = state.progress().max(view.progress()).clamp(0.0, 100.0);
    view.upsert(PROGRESS_KEY.to_string(), None, NodeKind::Progress { percent });
    view.upsert(
        SUMMARY_KEY.to_string(),
        None,
        NodeKind::Summary {
            counters: *state.counters(),
        },
    );

    for (index, line) in state.preamble().iter().enumerate() {
        view.upsert(format!("preamble:{index}"), None, output(line));
    }

    for play in state.plays() {
        let play_node = view.ensure(
            format!("play:{}", play.id()),
            None,
            NodeKind::Play {
                name: play.name().clone(),
            },
        );
        for task in play.task_ids().iter().filter_map(|id| state.task(id)) {
            let task_node = view.upsert(
                format!("task:{}", task.id()),
                Some(play_node),
                NodeKind::Task {
                    name: task.name().clone(),
                    status: *task.status(),
                },
            );
            for (index, line) in task.lines().iter().enumerate() {
                view.upsert(format!("line:{}:{}", task.id(), index), Some(task_node), output(line));
            }
            for (index, result) in task.results().iter().enumerate() {
                view.upsert(
                    format!("result:{}:{}", task.id(), index),
                    Some(task_node),
                    NodeKind::Result {
                        host: result.host().clone(),
                        status: *result.status(),
                        detail: result.detail().clone(),
                    },
                );
            }
        }
    }

    if !state.recap_lines().is_empty() {
        let recap_node = view.ensure(RECAP_KEY.to_string(), None, NodeKind::Recap);
        for (index, line) in state.recap_lines().iter().enumerate() {
            view.upsert(format!("recap:{index}"), Some(recap_node), output(line));
        }
    }
}

fn output(line: &str) -> NodeKind {
    NodeKind::Output {
        text: line.to_string(),
    }
}

/// Add the final banner for a job. Only the first call creates it.
pub fn render_terminal(view: &mut ViewTree, status: &JobStatus, message: impl Into<String>) {
    if status.is_success() {
        view.upsert(
            PROGRESS_KEY.to_string(),
            None,
            NodeKind::Progress { percent: 100.0 },
        );
    }
    view.ensure(
        BANNER_KEY.to_string(),
        None,
        NodeKind::Banner {
            status: status.clone(),
            message: message.into(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN: &str = "PLAY [Setup]\nTASK [Install pkg]\nok: [host1]\nchanged: [host2]\nTASK [Start]\n";

    #[test]
    fn test_render_is_idempotent() {
        let state = ExecutionState::parse(RUN);
        let mut view = ViewTree::new();
        render(&mut view, &state);
        let created = *view.created();
        // progress, summary, play, two tasks, two results
        assert_eq!(7, created);
        view.drain_journal();

        render(&mut view, &state);
        assert_eq!(created, *view.created());
        assert_eq!(0, *view.updated());
        assert!(view.drain_journal().is_empty());
    }

    #[test]
    fn test_status_changes_update_in_place() {
        let mut view = ViewTree::new();
        render(&mut view, &ExecutionState::parse("TASK [a]\nok: [h1]\n"));
        view.drain_journal();

        render(&mut view, &ExecutionState::parse("TASK [a]\nok: [h1]\nfailed: [h2]\n"));
        let journal = view.drain_journal();
        let task = view.find("task:Unnamed Play#0/a#0").expect("task node");
        assert_eq!(
            NodeKind::Task {
                name: "a".into(),
                status: TaskStatus::Failed,
            },
            *task.kind()
        );
        assert!(journal.contains(&Mutation::Updated(*task.id())));
        // The new result is the only node created.
        let created: Vec<_> = journal
            .iter()
            .filter(|m| matches!(m, Mutation::Created(_)))
            .collect();
        assert_eq!(1, created.len());
    }

    #[test]
    fn test_progress_never_moves_backwards() {
        let mut view = ViewTree::new();
        render(&mut view, &ExecutionState::parse("TASK [a]\nok: [h]\n"));
        assert_eq!(100.0, view.progress());
        render(&mut view, &ExecutionState::parse("TASK [a]\nok: [h]\nTASK [b]\n"));
        assert_eq!(100.0, view.progress());
    }

    #[test]
    fn test_tree_shape() {
        let state = ExecutionState::parse(RUN);
        let mut view = ViewTree::new();
        render(&mut view, &state);
        let play = view.find("play:Setup#0").expect("play node");
        assert_eq!(2, play.children().len());
        let install = view.node(play.children()[0]).expect("task node");
        assert_eq!(1, *install.depth());
        assert_eq!(2, install.children().len());
        let result = view.node(install.children()[1]).expect("result node");
        assert_eq!(2, *result.depth());
    }

    #[test]
    fn test_cut_off_result_is_corrected() {
        let mut view = ViewTree::new();
        render(&mut view, &ExecutionState::parse("TASK [a]\nok: [web"));
        view.drain_journal();

        let state = ExecutionState::parse("TASK [a]\nok: [web1] => {\"msg\": \"done\"}\n");
        render(&mut view, &state);
        let result = view
            .find("result:Unnamed Play#0/a#0:0")
            .expect("result node");
        assert_eq!(
            NodeKind::Result {
                host: "web1".into(),
                status: ResultStatus::Ok,
                detail: Some("{\"msg\": \"done\"}".into()),
            },
            *result.kind()
        );
        let result_id = *result.id();
        assert!(view.drain_journal().contains(&Mutation::Updated(result_id)));
    }

    #[test]
    fn test_plain_and_recap_lines_get_nodes() {
        let state = ExecutionState::parse(
            "Using /etc/ansible/ansible.cfg\nTASK [a]\n[WARNING]: no inventory\nok: [h]\nPLAY RECAP ***\nh : ok=1 changed=0 unreachable=0 failed=0\n",
        );
        let mut view = ViewTree::new();
        render(&mut view, &state);

        assert!(view.find("preamble:0").is_some());
        let task = view.find("task:Unnamed Play#0/a#0").expect("task node");
        assert_eq!(2, task.children().len());
        let warning = view.node(task.children()[0]).expect("line node");
        assert_eq!(
            NodeKind::Output {
                text: "[WARNING]: no inventory".into(),
            },
            *warning.kind()
        );
        let recap = view.find(RECAP_KEY).expect("recap node");
        assert_eq!(1, recap.children().len());

        let created = *view.created();
        render(&mut view, &state);
        assert_eq!(created, *view.created());
    }

    #[test]
    fn test_banner_is_added_once() {
        let mut view = ViewTree::new();
        render(&mut view, &ExecutionState::parse("TASK [a]\n"));
        render_terminal(&mut view, &JobStatus::Completed, "done");
        let created = *view.created();
        render_terminal(&mut view, &JobStatus::Completed, "done");
        assert_eq!(created, *view.created());
        assert_eq!(100.0, view.progress());
        assert!(view.find("banner").is_some());
    }
}
