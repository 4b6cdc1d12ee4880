//! # Context Connectors
//!
//! Source connectors, index stores, and incremental indexing orchestration
//! for context engines.
//!
//! A [`Source`](sources::Source) enumerates files from a filesystem tree, a
//! GitHub or GitLab repository, or a crawled website. The
//! [`Indexer`](indexer::Indexer) feeds them to a context engine, persists the
//! engine's exported state through a [`Store`](stores::Store), and on later
//! runs re-indexes only what changed when the source can tell it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌───────────┐   ┌──────────────────┐
//! │ Sources              │──▶│  Indexer   │──▶│ Stores           │
//! │ FS/GitHub/GitLab/Web │   │ full/incr  │   │ FS / S3 / memory │
//! └──────────────────────┘   └─────┬─────┘   └────────┬─────────┘
//!            ▲                     │                  │
//!            │               ┌─────▼─────┐     ┌──────▼──────┐
//!     push webhook ─────────▶│  Engine    │◀────│ IndexClient │
//!                            └───────────┘     └──────┬──────┘
//!                                                     ▼
//!                                              CLI / HTTP tools
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxc index docs                     # index the [sources.docs] entry
//! ctxc search docs "deployment"       # query the stored index
//! ctxc list                           # show stored keys
//! ctxc serve --key docs --source docs # tools + webhook over HTTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors worth matching on |
//! | [`file_filter`] | Which files are worth indexing |
//! | [`ignore_rules`] | `.gitignore` / `.augmentignore` matching |
//! | [`sources`] | Filesystem, GitHub, GitLab, and website sources |
//! | [`stores`] | Filesystem, S3, and in-memory state stores |
//! | [`engine`] | Context engine abstraction |
//! | [`indexer`] | Full / incremental / unchanged orchestration |
//! | [`client`] | Read-side access to a stored index |
//! | [`tools`] | Agent tools over an opened index |
//! | [`webhook`] | GitHub push webhook handling |
//! | [`server`] | HTTP server for tools and webhooks |
//! | [`http`] | Shared HTTP helpers |

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod file_filter;
pub mod http;
pub mod ignore_rules;
pub mod indexer;
pub mod models;
pub mod server;
pub mod sources;
pub mod stores;
pub mod tools;
pub mod webhook;
