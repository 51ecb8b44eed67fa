#![forbid(unsafe_code)]

//! # playwatch
//!
//! The shared code for playwatch, a terminal client for an Ansible web
//! console. Encapsulates things like:
//!
//! - Parsing streamed `ansible-playbook` output into plays, tasks and results
//! - Rendering that state incrementally, in place
//! - Polling running jobs until they finish
//! - Pre-execution configuration for playbooks that need extra variables
//! - Inventory validation and import
//! - Logging and tracing

pub mod client;
pub mod config;
pub mod controller;
pub mod inventory;
#[doc(hidden)]
pub mod ipc;
pub mod log;
pub mod output;
pub mod providers;
pub mod render;
pub mod watch;
