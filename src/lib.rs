//! # kb-sync
//!
//! Keeps a folder of markdown knowledge-base files in step with a CMS and a
//! vector index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  KB folder  │──▶│   SyncEngine     │──▶│ DocumentStore│
//! │  *.md + map │   │ slug/markdown/   │   │  (WordPress) │
//! └─────────────┘   │ frontmatter/chunk│   └──────────────┘
//!                   └────────┬─────────┘   ┌──────────────┐
//!                            └────────────▶│ VectorIndex  │
//!                                          │  (Pinecone)  │
//!                                          └──────┬───────┘
//!                      ┌───────────────────┬──────┘
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │ (kbsync) │       │  tools   │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Failure kinds reported per file |
//! | [`models`] | Core data types |
//! | [`slug`] | Slug and title derivation from paths |
//! | [`markdown`] | Dialect normalization and HTML rendering |
//! | [`frontmatter`] | YAML frontmatter parsing |
//! | [`chunk`] | Section chunking for retrieval |
//! | [`identity_map`] | Durable file → record ID map |
//! | [`taxonomy`] | Topic assignment from paths |
//! | [`connector_fs`] | File enumeration |
//! | [`cms`] | Document store trait and WordPress client |
//! | [`index`] | Vector index trait and Pinecone client |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`memory`] | In-memory collaborators |
//! | [`sync`] | The sync orchestrator |
//! | [`search`] | Tiered knowledge search |
//! | [`reconcile`] | Record/file reconciliation and duplicate cleanup |
//! | [`redirects`] | Redirect CSV export |
//! | [`tools`] | Tool-style entry points |
//! | [`server`] | HTTP tool server |

pub mod chunk;
pub mod cms;
pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod error;
pub mod frontmatter;
pub mod identity_map;
pub mod index;
pub mod markdown;
pub mod memory;
pub mod models;
pub mod reconcile;
pub mod redirects;
pub mod search;
pub mod server;
pub mod slug;
pub mod sync;
pub mod taxonomy;
pub mod tools;
