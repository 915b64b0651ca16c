//! # kb-sync
//!
//! Syncs published knowledge-base articles from a Salesforce org into a
//! retrieval/indexing API.
//!
//! Each cycle queries every online `Knowledge__kav` article, skips the ones
//! already synced, turns the rest into documents and upserts them in one
//! batch. Synced records are remembered in a ledger file or through a flag
//! on the CRM record.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌────────────┐
//! │ Salesforce │──▶│  Transform  │──▶│ Upsert API │
//! │   query    │   │ + dedup     │   │  (batch)   │
//! └────────────┘   └─────────────┘   └─────┬──────┘
//!                                          │ ids
//!                                          ▼
//!                               ┌────────────────────┐
//!                               │ ledger file / flag │
//!                               └────────────────────┘
//! ```
//!
//! Cycles are triggered by a timer loop (`kb-sync run`), an HTTP request
//! (`kb-sync serve`), or a single CLI invocation (`kb-sync on_demand`).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment fallbacks |
//! | [`models`] | Source records, documents, cycle reports |
//! | [`crm`] | Salesforce session and article extraction |
//! | [`transform`] | Record → document normalization |
//! | [`upsert`] | Batch upsert client |
//! | [`ledger`] | File-backed dedup ledger |
//! | [`dedup`] | Dedup strategies (ledger, CRM flag, none) |
//! | [`pipeline`] | Cycle orchestration and timer loop |
//! | [`server`] | HTTP trigger |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod crm;
pub mod dedup;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod transform;
pub mod upsert;
