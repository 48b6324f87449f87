//! Reference sequence blobs.
//!
//! The sequence is split into data chunks of a fixed number of archive rows.

use crate::{LoaderError, Result};
use crate::archive::{ArchiveInfo, RefSeqInfo};
use crate::blob_id::{BlobId, BlobKind};

use std::ops::Range;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Metadata for a reference sequence with delayed sequence data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefSeqBlob {
    pub blob_id: BlobId,
    /// Identifiers of the sequence, starting with the canonical one.
    pub ids: Vec<String>,
    pub title: String,
    pub length: usize,
    pub circular: bool,
    /// Reference intervals of the sequence data chunks.
    pub chunks: Vec<Range<usize>>,
}

/// A loaded sequence data chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeqDataChunk {
    pub index: usize,
    pub range: Range<usize>,
    pub sequence: Vec<u8>,
}

/// Builds reference sequence blobs and their data chunks.
pub struct RefSeqAssembler<'a> {
    archive: &'a ArchiveInfo,
    refseq: &'a RefSeqInfo,
}

impl<'a> RefSeqAssembler<'a> {
    pub fn new(archive: &'a ArchiveInfo, refseq: &'a RefSeqInfo) -> Self {
        RefSeqAssembler { archive, refseq }
    }

    pub fn blob_id(&self) -> BlobId {
        BlobId::for_sequence(BlobKind::RefSeq, self.archive.scheme(), self.archive.id_part(), self.refseq.seq_id())
    }

    /// Returns the length of a data chunk.
    pub fn chunk_len(&self) -> usize {
        self.archive.db().row_size() * self.archive.planner().seq_data_rows.max(1)
    }

    fn chunk_range(&self, index: usize) -> Range<usize> {
        let chunk_len = self.chunk_len();
        let start = index * chunk_len;
        start..(start + chunk_len).min(self.refseq.length())
    }

    pub fn load_blob(&self) -> RefSeqBlob {
        let count = self.refseq.length().div_ceil(self.chunk_len());
        RefSeqBlob {
            blob_id: self.blob_id(),
            ids: self.refseq.ids().to_vec(),
            title: format!(
                "{} - reference sequence from ShortRead RUN {}",
                self.refseq.name(), self.archive.db().path().display()
            ),
            length: self.refseq.length(),
            circular: self.refseq.circular(),
            chunks: (0..count).map(|i| self.chunk_range(i)).collect(),
        }
    }

    /// Loads the bases of data chunk `index`.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidChunk`] if the chunk does not exist.
    pub fn load_chunk(&self, index: usize) -> Result<SeqDataChunk> {
        let range = self.chunk_range(index);
        if range.start >= self.refseq.length() {
            return Err(LoaderError::InvalidChunk(format!("sequence data {} for {}", index, self.refseq.seq_id())));
        }
        let mut cursor = self.archive.db().cursor()?;
        let sequence = cursor.ref_sequence(self.refseq.handle(), range.clone())?;
        log::debug!("Sequence data chunk {} for {}: {} bp", index, self.refseq.seq_id(), sequence.len());
        Ok(SeqDataChunk { index, range, sequence })
    }
}

//-----------------------------------------------------------------------------
