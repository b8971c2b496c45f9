//! The content store file.
//!
//! - [`ContentStore`]: parse/serialize of the versioned flat-file format, keeping
//!   each existing record's raw text so untouched records survive byte-for-byte
//! - [`StoreIndex`]: the Duplicate Guard, a key set built once per run
//! - [`StoreWriter`]: backup, insert, self-check, then atomic replace or rollback

mod format;
mod index;
mod writer;

pub use format::{ContentStore, STORE_HEADER, StoredRecord, render_record};
pub use index::StoreIndex;
pub use writer::{MergeOutcome, StoreWriter, init_store, load_store};
