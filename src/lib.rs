//! contextual - a local file-indexing daemon with natural-language search.
//!
//! Folders are scanned into a paired store: a [`Registry`] of per-path
//! metadata and a full-text [`ContentIndex`] over file bodies, summaries
//! and date tokens. Folder rows carry rollups of their children. Queries
//! are either structured filters or plain language, which the
//! [`intent`] parser turns into filters with the help of a local text
//! generator.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use contextual::{DataDir, Store, scanner, search};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = Store::open(&data_dir).unwrap();
//! scanner::scan(&store, Path::new("/home/me/projects")).unwrap();
//!
//! let hits = search::search(&store, "(ext:sql) AND (content:invoices)", None)
//!     .unwrap();
//! for hit in &hits {
//!     println!("[{}] {}", hit.kind, hit.path);
//! }
//! ```

pub mod aggregate;
pub mod ai;
pub mod cli;
pub mod client;
pub mod config;
pub mod content_index;
pub mod data_dir;
pub mod dates;
pub mod error;
pub mod intent;
pub mod paths;
pub mod protocol;
pub mod query;
pub mod registry;
pub mod scanner;
pub mod search;
pub mod server;
pub mod store;
pub mod text_util;
pub mod walker;
pub mod worker;

pub use content_index::ContentIndex;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use registry::Registry;
pub use store::Store;
