//! Read blobs: windows of consecutive spots with their reads or their alignments.

use crate::{LoaderError, Result};
use crate::annot::{AlignmentRecord, Annotation, AnnotationData, Graph, GraphValues};
use crate::archive::ArchiveInfo;
use crate::blob_id::{BlobId, BlobKind};
use crate::db::{ArchiveCursor, SpotRecord};
use crate::utils::CancelToken;


//-----------------------------------------------------------------------------

/// A sequenced read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortRead {
    /// External identifier `<accession>.<spot>.<read>`.
    pub id: String,
    /// Name of the spot.
    pub name: String,
    pub spot_group: String,
    pub sequence: Vec<u8>,
    /// Quality graph, if enabled and available.
    pub quality: Option<Graph>,
}

/// A window of spots with their reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadsBlob {
    pub blob_id: BlobId,
    pub reads: Vec<ShortRead>,
}

/// A window of spots with the primary alignments of their reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadsAlignBlob {
    pub blob_id: BlobId,
    pub annot: Annotation,
}

/// Returns the first spot in the window containing the spot.
///
/// Spot identifiers start from 1.
///
/// # Examples
///
/// ```
/// use csra_base::reads::window_start;
///
/// assert_eq!(window_start(1, 10), 1);
/// assert_eq!(window_start(10, 10), 1);
/// assert_eq!(window_start(11, 10), 11);
/// assert_eq!(window_start(42, 1), 42);
/// ```
pub fn window_start(spot_id: u64, reads_per_blob: u64) -> u64 {
    let n = reads_per_blob.max(1);
    (spot_id.max(1) - 1) / n * n + 1
}

//-----------------------------------------------------------------------------

/// Builds read blobs for an archive.
pub struct ReadsAssembler<'a> {
    archive: &'a ArchiveInfo,
}

impl<'a> ReadsAssembler<'a> {
    /// Title of read quality graphs.
    pub const QUALITY_TITLE: &'static str = "Phred Quality";

    pub fn new(archive: &'a ArchiveInfo) -> Self {
        ReadsAssembler { archive }
    }

    /// Returns the identifier of the blob of the given kind containing the spot.
    pub fn blob_id(&self, kind: BlobKind, spot_id: u64) -> BlobId {
        let first = window_start(spot_id, self.archive.reads_per_blob());
        BlobId::for_reads(kind, self.archive.scheme(), self.archive.id_part(), first)
    }

    // Returns the spot window for the blob.
    fn window(&self, blob_id: &BlobId, kind: BlobKind) -> Result<std::ops::Range<u64>> {
        let first = match blob_id.first_spot() {
            Some(first) if blob_id.kind() == kind => first,
            _ => return Err(LoaderError::MalformedBlobId(blob_id.to_string())),
        };
        Ok(first..first.saturating_add(self.archive.reads_per_blob()))
    }

    /// Loads the reads in the window starting from the first spot of the blob.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::NotFound`] if the window contains no spots.
    pub fn load_reads_blob(&self, blob_id: &BlobId, cancel: &CancelToken) -> Result<ReadsBlob> {
        let window = self.window(blob_id, BlobKind::Reads)?;
        cancel.check()?;
        let mut cursor = self.archive.db().cursor()?;
        let spots = cursor.spots(window)?;
        if spots.is_empty() {
            return Err(LoaderError::NotFound(blob_id.to_string()));
        }

        let reads = self.short_reads(spots, cancel)?;
        log::debug!("Reads blob {}: {} reads", blob_id, reads.len());
        Ok(ReadsBlob { blob_id: blob_id.clone(), reads })
    }

    // Converts the spots into short reads, polling the token once per spot.
    fn short_reads(&self, spots: Vec<SpotRecord>, cancel: &CancelToken) -> Result<Vec<ShortRead>> {
        let mut reads = Vec::new();
        for (i, spot) in spots.into_iter().enumerate() {
            cancel.poll(i + 1)?;
            for read in spot.reads {
                let id = self.archive.short_read_id(spot.spot_id, read.read_id);
                let quality = if self.archive.quality_graphs() && !read.quality.is_empty() {
                    let range = 0..read.quality.len();
                    Some(Graph::new(Some(Self::QUALITY_TITLE), &id, range, 1, GraphValues::Byte(read.quality)))
                } else {
                    None
                };
                reads.push(ShortRead {
                    id,
                    name: spot.name.clone(),
                    spot_group: spot.spot_group.clone(),
                    sequence: read.sequence,
                    quality,
                });
            }
        }
        Ok(reads)
    }

    /// Loads the primary alignments of the reads in the window into a single annotation.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::NotFound`] if the window contains no spots.
    pub fn load_reads_align_blob(&self, blob_id: &BlobId, cancel: &CancelToken) -> Result<ReadsAlignBlob> {
        let window = self.window(blob_id, BlobKind::ReadsAlign)?;
        cancel.check()?;
        let mut cursor = self.archive.db().cursor()?;
        let spots = cursor.spots(window)?;
        if spots.is_empty() {
            return Err(LoaderError::NotFound(blob_id.to_string()));
        }

        let alignments = self.primary_alignments(&mut cursor, &spots, cancel)?;
        log::debug!("Read alignment blob {}: {} alignments", blob_id, alignments.len());
        let annot = Annotation {
            name: self.archive.base_annot_name().to_string(),
            data: AnnotationData::Alignments(alignments),
        };
        Ok(ReadsAlignBlob { blob_id: blob_id.clone(), annot })
    }

    // Returns the primary alignments of the reads in the spots, polling the token once per spot.
    fn primary_alignments(&self, cursor: &mut ArchiveCursor<'_>, spots: &[SpotRecord], cancel: &CancelToken) -> Result<Vec<AlignmentRecord>> {
        let mut alignments = Vec::new();
        for (i, spot) in spots.iter().enumerate() {
            cancel.poll(i + 1)?;
            for read in spot.reads.iter() {
                let row = match cursor.primary_alignment(spot.spot_id, read.read_id)? {
                    Some(row) => row,
                    None => continue,
                };
                if let Some(refseq) = self.archive.ref_by_handle(row.ref_handle) {
                    alignments.push(AlignmentRecord::from_row(self.archive, &refseq, row));
                }
            }
        }
        Ok(alignments)
    }
}

//-----------------------------------------------------------------------------
