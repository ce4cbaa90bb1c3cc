//! Content-addressed image layers.
//!
//! A layer is a gzip-compressed tar snapshot of one build stage's filesystem
//! delta, addressed by the sha256 of the compressed bytes. Packing is
//! deterministic (sorted entries, zeroed timestamps, fixed ownership and
//! compression level) so identical inputs reproduce byte-identical blobs.

mod archive;
mod digest;

pub use archive::{LayerArchive, pack_dir, unpack};
pub use digest::{HashingWriter, chain_key, sha256_hex};
