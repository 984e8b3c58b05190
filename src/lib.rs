//! # Dossier
//!
//! A case-file ingestion and insight pipeline for legal matters.
//!
//! Dossier ingests heterogeneous uploads (PDFs, images, office documents,
//! plain text, email) into content-addressed storage, extracts their text
//! with a provenance trail, and produces citation-backed structured findings
//! (themes, timelines, entities, contradictions, risks) through a
//! language-model analysis stage.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  Upload  │──▶│  Content  │──▶│ Processing │──▶│  SQLite   │
//! │ (submit) │   │   Store   │   │   Queue    │   │ text+meta │
//! └──────────┘   └───────────┘   └─────┬──────┘   └────┬─────┘
//!                                      │               │
//!                              extract + chunk         │
//!                              + anchor (OCR)          ▼
//!                                               ┌──────────────┐
//!                                               │   Insight    │──▶ sections
//!                                               │ Orchestrator │    (cited)
//!                                               └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dossier init                                   # create database
//! dossier submit ./exhibit-a.pdf --matter m-102  # ingest a file
//! dossier summary --matter m-102                 # scan overview
//! dossier analyze --matter m-102 --intents themes,timeline,risks
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Content-addressable upload storage |
//! | [`extract`] | Per-kind text extraction dispatch |
//! | [`ocr`] | Vision-language-model OCR provider |
//! | [`chunk`] | Text chunking and page/line anchoring |
//! | [`queue`] | Bounded-concurrency processing queue |
//! | [`assets`] | Collaborator-facing asset operations |
//! | [`llm`] | Language-model provider abstraction |
//! | [`insight`] | Insight run orchestration and validation |
//! | [`actions`] | Action-item materialization to the task board |
//! | [`summary`] | Matter-wide scan summary |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod actions;
pub mod assets;
pub mod chunk;
pub mod config;
pub mod db;
pub mod extract;
pub mod insight;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod queue;
pub mod store;
pub mod summary;
