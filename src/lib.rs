//! # Readiness Report
//!
//! A retrieval-grounded report pipeline: survey answers in, a branded
//! AI-readiness assessment PDF out.
//!
//! Each request acquires the company's website, retrieves the provider's
//! indexed service context, generates one insight per answer plus a closing
//! synthesis, assembles a paginated PDF and then delivers it best-effort
//! (lead log and email). Every stage before assembly degrades instead of
//! failing, and delivery failures never affect the artifact.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Acquire  │──▶│ Chunk+Index  │──▶│  Retrieve   │──▶│ Insights │
//! │ HTML/CDP │   │ ladder+SQLite│   │ ctx bundles │   │ + Synth  │
//! └──────────┘   └──────────────┘   └─────────────┘   └────┬─────┘
//!                                                         ▼
//!                     ┌──────────┐   ┌──────────┐   ┌──────────┐
//!                     │  Email   │◀──│ Lead log │◀──│   PDF    │
//!                     │ Mailgun  │   │  Sheets  │   │ assemble │
//!                     └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! readiness init                                   # create database
//! readiness ingest --company Beacon https://beacon.example/services
//! readiness search "literacy workshops"
//! readiness report ./submission.json --out ./report.pdf
//! readiness serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`models`] | Core data types and the `Outcome` degradation carrier |
//! | [`acquire`] | Website acquisition and HTML cleaning |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding providers and tier selection |
//! | [`index`] | Namespaced retrieval index with copy-on-build snapshots |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`ingest`] | Knowledge-base ingestion into a namespace |
//! | [`retrieve`] | Per-question context bundles |
//! | [`llm`] | Text generation backends |
//! | [`prompt`] | Prompt templates |
//! | [`insight`] | Per-answer insight generation |
//! | [`synthesis`] | Closing recommendations narrative |
//! | [`report`] | Section composition, pagination and PDF encoding |
//! | [`leads`] | Best-effort lead logging |
//! | [`email`] | Best-effort email delivery |
//! | [`coordinator`] | Per-request delivery state machine |
//! | [`server`] | HTTP server |

pub mod acquire;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod email;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod insight;
pub mod leads;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod report;
pub mod retrieve;
pub mod server;
pub mod synthesis;
