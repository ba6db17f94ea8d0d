//! # kbsync
//!
//! Keeps a directory of markdown notes, a relational model of those notes,
//! and a full-text index in agreement.
//!
//! Each note becomes an **entity** with **observations** (categorized facts
//! such as `- [idea] Cache the parse tree #perf`) and **relations** (typed
//! links such as `- implements [[Search Design]]`). Relations may point at
//! notes that do not exist yet; they are resolved when the target appears.
//! Every item is also written to an SQLite FTS5 index for ranked search.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌────────────────┐   ┌──────────────┐
//! │  Scanner  │──▶│ Change set │──▶│ Entity service │──▶│    SQLite    │
//! │ walk+hash │   │ new/mod/del│   │ parse+persist  │   │ tables+FTS5  │
//! └───────────┘   │   /moves   │   └────────────────┘   └──────┬───────┘
//!                 └────────────┘                                │
//!                                          ┌────────────────────┤
//!                                          ▼                    ▼
//!                                   ┌────────────┐       ┌────────────┐
//!                                   │   Search   │       │ Link       │
//!                                   │  compiler  │       │ resolver   │
//!                                   └────────────┘       └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                         # create database
//! kb sync                         # scan the notes directory
//! kb search "sync engine"         # ranked full-text search
//! kb search --permalink-match "specs/*"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`markdown`] | Frontmatter, observation and relation parsing |
//! | [`scanner`] | Directory walk and checksums |
//! | [`changes`] | Change-set classification |
//! | [`permalink`] | Permalink generation and uniqueness |
//! | [`repository`] | Entity, observation, relation and project storage |
//! | [`entity_service`] | Per-file sync pipeline |
//! | [`sync`] | Directory sync orchestration |
//! | [`search`] | FTS5 query compilation and indexing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod changes;
pub mod config;
pub mod db;
pub mod edit;
pub mod entity_service;
pub mod error;
pub mod file_service;
pub mod knowledge_base;
pub mod link_resolver;
pub mod markdown;
pub mod migrate;
pub mod models;
pub mod permalink;
pub mod progress;
pub mod repository;
pub mod scanner;
pub mod search;
pub mod stats;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{KbError, Result};
pub use knowledge_base::KnowledgeBase;
