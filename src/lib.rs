//! # cSRA-base: lazy, chunked access to sequence alignment archives.
//!
//! This crate stores short-read alignment archives in SQLite databases and loads them in small pieces on demand.
//! It is intended for interactive applications such as genome browsers that only need a fraction of the archive at a time.
//! An archive contains reference sequences, spots (sequenced fragments) with their reads, and the primary alignments of the reads.
//!
//! See [`CsraDb`] and [`ArchiveBuilder`] for the storage layer and [`CsraLoader`] for the loader.
//!
//! ### Basic concepts
//!
//! The loader answers two kinds of questions.
//! Given an external identifier, which blobs contain the data for it?
//! Given a blob identifier, what is in the blob and its chunks?
//!
//! A blob is an independently loadable unit identified by a [`BlobId`].
//! Reference sequences are identified as `<accession>/<name>` (dynamic mode) or by their external ids (fixed mode).
//! Reads are identified as `<accession>.<spot>.<read>` (see [`ReadId`]).
//!
//! Annotation blobs are loaded lazily.
//! The initial skeleton only contains a main chunk.
//! Loading the main chunk divides the reference into range chunks using the alignment density (see [`chunks`]).
//! Alignment chunks contain the alignments starting in the range, and pileup chunks contain base counts over the range (see [`annot`]).
//!
//! Archives are opened on demand by accession from a directory and kept in a bounded cache (see [`ArchiveCache`]).
//! Alternatively, the loader can work with a fixed list of archives opened at startup.
//!
//! ### Configuration
//!
//! The loader is configured with [`LoaderParams`].
//! Some parameters can be overridden with environment variables (see [`LoaderParams::override_from_env`]).
//!
//! ### Logging
//!
//! The library logs through the [`log`] facade.
//! The command-line tools initialize [`env_logger`](https://docs.rs/env_logger), so the level can be set with `RUST_LOG`.

pub mod annot;
pub mod archive;
pub mod blob_id;
pub mod chunks;
pub mod db;
pub mod error;
pub mod formats;
pub mod loader;
pub mod reads;
pub mod refseq;
pub mod utils;

pub use annot::{AnnotAssembler, AnnotChunk, AnnotChunkId, Annotation, Graph};
pub use archive::{ArchiveCache, ArchiveInfo, ArchiveLock, RefSeqInfo};
pub use blob_id::{BlobId, BlobKind, IdScheme, ReadId};
pub use chunks::{ChunkPlan, ChunkPlans, PlannerParams};
pub use db::{ArchiveBuilder, ArchiveCursor, CsraDb, NewAlignment};
pub use error::{LoaderError, Result};
pub use loader::{Blob, BlobRequest, Choice, ChunkData, ChunkId, CsraLoader, IdMapper, LoaderParams, MoleculeType};
pub use utils::CancelToken;

#[cfg(test)]
mod internal;
