//! Filesystem-backed document storage.
//!
//! Every cross-process exchange goes through JSON documents under a
//! single storage root. Writes are atomic (temp file + rename), reads
//! treat any failure as absence, and the one globally contended
//! document (the execution queue) is serialized through [`DocumentLock`].

pub mod documents;
pub mod layout;
pub mod lock;
pub mod record;

pub use documents::SessionDocuments;
pub use layout::{validate_id, DocumentCategory, StorageLayout};
pub use lock::{DocumentLock, LockOptions};
