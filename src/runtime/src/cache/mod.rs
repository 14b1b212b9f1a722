//! Artifact caching shared by the registry backends.
//!
//! - `ArtifactCache`: content-addressed, single-flight cache for descriptor
//!   documents and resource blobs, optionally persisted to disk

pub mod artifact_cache;

pub use artifact_cache::{digest_matches, sha256_digest, ArtifactCache, ArtifactMeta, Blob, CacheStats};
