//! # Annotation Desk
//!
//! A local-first data annotation tool. Upload a JSONL dataset, choose which
//! fields to show and how, pick an annotation input, then annotate records
//! one at a time. Results live in SQLite next to the dataset and can be
//! exported as JSON, JSONL or CSV.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │  JSONL   │──▶│   Workflow   │──▶│  SQLite  │
//! │  upload  │   │   Session    │   │  Store   │
//! └──────────┘   └──────┬───────┘   └────┬─────┘
//!                       │                │
//!            ┌──────────┴─────┐     ┌────┴─────┐
//!            ▼                ▼     ▼          ▼
//!       ┌─────────┐     ┌─────────┐     ┌──────────┐
//!       │ Render  │     │  Form   │     │  Export  │
//!       └─────────┘     └─────────┘     └──────────┘
//! ```
//!
//! Both the `anno` CLI and the local HTTP server drive the same
//! [`workflow::Session`].
//!
//! ## Quick Start
//!
//! ```bash
//! anno init
//! anno create data.jsonl --fields question:text --annotation rating --min 1 --max 5
//! anno annotate <task-id> 0 4
//! anno export <task-id>
//! anno serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Tasks, annotations, configs and results |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and reset |
//! | [`jsonl`] | Dataset parsing, saving and file reference checks |
//! | [`store`] | Persistence of tasks, annotations and users |
//! | [`render`] | Field view models |
//! | [`form`] | Annotation controls and input parsing |
//! | [`workflow`] | Per-session state machine |
//! | [`export`] | Result export |
//! | [`layout`] | Working directory layout |
//! | [`stats`] | Task overview |
//! | [`server`] | Local HTTP server |

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod form;
pub mod jsonl;
pub mod layout;
pub mod migrate;
pub mod models;
pub mod render;
pub mod server;
pub mod stats;
pub mod store;
pub mod workflow;
