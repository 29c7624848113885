//! promote-archive — immutable deployment archives and rollback indexes.
//!
//! - **`manager`**: archive creation (index written last) and verified loading
//! - **`reader`**: read seam over local stores, storage backends and bucket URLs

pub mod error;
pub mod manager;
pub mod reader;

pub use error::{ArchiveError, ArchiveResult};
pub use manager::{ArchiveManager, ArchiveReceipt, ArchiveRequest, LoadedArchive, load_archive, read_index};
pub use reader::{BucketReader, ObjectReader, RemoteArchive};
