//! # Scout Engine
//!
//! A retrieval-augmented query engine for market intelligence.
//!
//! Scout ingests brand, product, pricing, and market-insight records,
//! indexes them for both keyword (FTS5/BM25) and semantic (vector) search,
//! and answers natural-language questions grounded in the retrieved
//! context, with source attribution on every answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐
//! │  Ingest  │──▶│ Embed+Index │──▶│  SQLite    │
//! │  (JSON)  │   │ cache+FTS5  │   │ FTS5+Vec  │
//! └──────────┘   └─────────────┘   └────┬──────┘
//!                                       │
//!                      ┌────────────────┤
//!                      ▼                ▼
//!                ┌──────────┐     ┌──────────┐
//!                │   CLI    │     │   HTTP   │
//!                │ (scout)  │     │  (API)   │
//!                └──────────┘     └──────────┘
//! ```
//!
//! A question runs both search channels concurrently, min-max normalizes
//! and blends the scores, assembles the top results into a size-bounded
//! context bundle, and hands the bundle to a pluggable synthesizer.
//!
//! ## Quick Start
//!
//! ```bash
//! scout init                          # create database
//! scout ingest batch.json             # load knowledge items
//! scout embed pending                 # backfill vectors
//! scout query "Alaska milk pricing"   # ask a question
//! scout serve api                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`embedding`] | Embedding providers, persistent cache, vector codecs |
//! | [`vector_store`] | Item storage and cosine-similarity search |
//! | [`keyword`] | FTS5/BM25 keyword search |
//! | [`retrieve`] | Concurrent hybrid retrieval and score merging |
//! | [`context`] | Budget-bounded context assembly |
//! | [`synthesize`] | Answer synthesis behind a pluggable trait |
//! | [`currency`] | Explicit-rate currency conversion for price facts |
//! | [`engine`] | End-to-end query orchestration |
//! | [`ingest`] | Batch ingestion with per-item outcomes |
//! | [`embed_cmd`] | Embedding backfill and rebuild |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod context;
pub mod currency;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod keyword;
pub mod migrate;
pub mod models;
pub mod retrieve;
pub mod server;
pub mod synthesize;
pub mod vector_store;
