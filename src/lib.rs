//! # capturefile: an append-only, transactional, compressed record log
//!
//! `capturefile` stores an ordered sequence of opaque binary records plus
//! a single replaceable metadata blob in one file. Writers append records
//! and commit them atomically; readers fetch a record by its 1-based
//! sequence number in O(log N) seeks. One writer and many concurrent
//! readers, across threads and processes, may share a file.
//!
//! The on-disk state lives in two alternating master-node slots so a
//! commit is a single atomic slot swap: a crash mid-commit leaves the
//! previous commit intact. The record index is a right-spine-only
//! B+-like tree of fixed fan-out — only the rightmost, in-progress path
//! at each level is mutable; everything else is an immutable compressed
//! block once written.
//!
//! ## Quick start
//!
//! ```no_run
//! use capturefile::{CaptureFile, CaptureFileOptions};
//!
//! let options = CaptureFileOptions::new().write(true);
//! let mut file = CaptureFile::open("log.cap", &options)?;
//!
//! file.add_record(b"r1")?;
//! file.add_record(b"r2")?;
//! file.commit()?;
//!
//! assert_eq!(file.record_count(), 2);
//! assert_eq!(file.record_at(1)?, b"r1");
//! # Ok::<(), capturefile::CaptureError>(())
//! ```

mod block_buffer;
mod cache;
mod capture_file;
pub mod codec;
pub mod error;
pub mod index;
mod lock;
mod master;
mod page_io;

pub use capture_file::{CaptureFile, CaptureFileOptions, RecordGenerator};
pub use error::{CaptureError, Result};
pub use index::DataCoordinate;
