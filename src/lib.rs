//! # Upload Harness
//!
//! A small HTTP service that accepts file uploads (JSON, CSV, TXT, XLSX),
//! parses each into a generic structure, persists the parsed form as JSON,
//! and serves the most recently saved result.
//!
//! ## Architecture
//!
//! ```text
//! POST /upload ──▶ ingest ──▶ extract / xlsx ──▶ storage ──▶ saved_data/<name>
//!                    │                              │
//!                    └──────▶ uploads/<name>        └──▶ saved_data/.latest
//!
//! GET /api/data ──▶ get ──▶ storage (latest artifact) ──▶ { "data": ... }
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! upharness serve                            # listen on 127.0.0.1:5000
//! curl -F file=@people.csv http://127.0.0.1:5000/upload
//! curl http://127.0.0.1:5000/api/data
//! upharness parse ./people.csv               # parse locally, no writes
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | File kinds and parsed content |
//! | [`extract`] | JSON, CSV, and TXT parsing; format dispatch |
//! | [`xlsx`] | First-sheet XLSX reading |
//! | [`storage`] | Upload and artifact directories, conflict policy |
//! | [`ingest`] | Upload ingestion |
//! | [`get`] | Latest artifact retrieval |
//! | [`server`] | HTTP server |

pub mod config;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod models;
pub mod server;
pub mod storage;
pub mod xlsx;
