//! Adapter seams to the outside world
//!
//! The engine never speaks a peer-to-peer protocol or a cloud wire format itself. It drives
//! two narrow capabilities:
//!
//! - [`TransferAdapter`]: metadata resolution plus selective transfer and live statistics
//! - [`UploadAdapter`]: resumable, chunked upload sessions
//!
//! Any concrete torrent or object-store library is swapped in behind these traits.
//! [`LocalUploadAdapter`] is a directory-backed upload target that ships with the crate.

mod local;
mod traits;

pub use local::LocalUploadAdapter;
pub use traits::{SessionHandle, TransferAdapter, TransferRequest, TransferStats, UploadAdapter};
