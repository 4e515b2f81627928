//! MiniKV - Embeddable Key-Value Storage Engine
//!
//! A single-process, crash-consistent key-value store: a write-ahead log
//! backs an in-memory sorted MemTable, which is periodically flushed into
//! immutable sorted SSTables on disk.
//!
//! ## Components
//! - **Write-Ahead Log (WAL)**: every mutation is appended and synced before it
//!   is applied; replayed on startup, truncated after each flush
//! - **MemTable**: in-memory BTreeMap holding the newest, unflushed state
//! - **SSTable**: immutable sorted file with a binary-searchable index
//! - **Snapshots**: consistent point-in-time copies of the data directory
//!
//! ## Example
//! ```no_run
//! use minikv::{config::Config, engine::MiniKv};
//!
//! let engine = MiniKv::open(Config::new("./minikv_data")).unwrap();
//!
//! engine.put(b"key".to_vec(), b"value".to_vec()).unwrap();
//! assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
//! engine.flush().unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod types;

pub use config::Config;
pub use engine::MiniKv;
pub use error::{MiniKvError, Result};
