//! Annotation blobs: alignments, coverage graphs, and pileup graphs for a reference sequence.
//!
//! An annotation blob starts as a skeleton with a single delayed main chunk.
//! Loading the main chunk computes the chunk plans for the reference, emits the coverage graph, and registers the range chunks.
//! Each alignment chunk contains the alignments starting in its range.
//! Each pileup chunk contains six graphs counting bases, inserts, and matches at every position of its range.
//!
//! When spot groups are separated, each spot group gets its own annotations.

use crate::{LoaderError, Result};
use crate::archive::{ArchiveInfo, RefSeqInfo};
use crate::blob_id::{BlobId, BlobKind};
use crate::db::AlignmentRow;
use crate::formats::{self, CigarOp};
use crate::utils::CancelToken;

use std::fmt::Display;
use std::ops::Range;


//-----------------------------------------------------------------------------

/// Identifier of a chunk in an annotation blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnnotChunkId {
    /// The main chunk with the coverage graph and the chunk descriptors.
    Main,
    /// Alignment chunk `k` in the alignment plan.
    Align(usize),
    /// Pileup chunk `k` in the graph plan.
    Pileup(usize),
}

impl Display for AnnotChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotChunkId::Main => write!(f, "main"),
            AnnotChunkId::Align(k) => write!(f, "align {}", k),
            AnnotChunkId::Pileup(k) => write!(f, "pileup {}", k),
        }
    }
}

/// Type of data in an annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Align,
    Graph,
}

/// Announces that a chunk contains data of the given kind for the annotation over the range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentEntry {
    pub annot_name: String,
    pub kind: ContentKind,
    pub range: Range<usize>,
}

/// A chunk that has been registered but not loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkDescriptor {
    /// Chunk identifier.
    pub chunk_id: AnnotChunkId,
    /// Reference interval covered by the chunk.
    pub range: Range<usize>,
    /// Annotations with data in the chunk.
    pub contents: Vec<ContentEntry>,
    /// Estimated number of bytes read when loading the chunk.
    pub load_bytes: usize,
    /// Estimated time to load the chunk in seconds.
    pub load_seconds: f64,
}

impl ChunkDescriptor {
    /// Estimated bytes per alignment.
    pub const ALIGN_BYTES: usize = 300;

    /// Estimated seconds for reading a byte.
    pub const READ_BYTE_SECONDS: f64 = 7.5e-9;

    /// Estimated seconds per byte for building graphs.
    pub const MAKE_GRAPH_SECONDS: f64 = 20e-9;

    /// Estimated seconds per byte for building alignment records.
    pub const MAKE_ALIGN_SECONDS: f64 = 80e-9;

    fn align(k: usize, range: Range<usize>, contents: Vec<ContentEntry>, align_count: usize) -> Self {
        let load_bytes = align_count * Self::ALIGN_BYTES;
        let load_seconds = load_bytes as f64 * (Self::READ_BYTE_SECONDS + Self::MAKE_ALIGN_SECONDS);
        ChunkDescriptor { chunk_id: AnnotChunkId::Align(k), range, contents, load_bytes, load_seconds }
    }

    fn pileup(k: usize, range: Range<usize>, contents: Vec<ContentEntry>, align_count: usize) -> Self {
        let load_bytes = (align_count * Self::ALIGN_BYTES).max(1);
        let load_seconds = load_bytes as f64 * (Self::READ_BYTE_SECONDS + Self::MAKE_GRAPH_SECONDS);
        ChunkDescriptor { chunk_id: AnnotChunkId::Pileup(k), range, contents, load_bytes, load_seconds }
    }
}

//-----------------------------------------------------------------------------

/// Values of a graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphValues {
    Byte(Vec<u8>),
    Int(Vec<u32>),
}

impl GraphValues {
    /// Chooses the narrowest encoding for the values.
    pub fn from_counts(counts: Vec<u32>) -> Self {
        if counts.iter().all(|&x| x <= u8::MAX as u32) {
            GraphValues::Byte(counts.into_iter().map(|x| x as u8).collect())
        } else {
            GraphValues::Int(counts)
        }
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        match self {
            GraphValues::Byte(values) => values.len(),
            GraphValues::Int(values) => values.len(),
        }
    }

    /// Returns `true` if there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value at the given offset as an integer.
    pub fn get(&self, offset: usize) -> Option<u32> {
        match self {
            GraphValues::Byte(values) => values.get(offset).map(|&x| x as u32),
            GraphValues::Int(values) => values.get(offset).copied(),
        }
    }

    /// Returns the size of the values in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            GraphValues::Byte(values) => values.len(),
            GraphValues::Int(values) => values.len() * std::mem::size_of::<u32>(),
        }
    }
}

/// A graph over a reference interval.
///
/// Each value covers `comp` consecutive positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Graph {
    pub title: Option<String>,
    pub seq_id: String,
    pub range: Range<usize>,
    pub comp: usize,
    pub min: u32,
    pub max: u32,
    pub values: GraphValues,
}

impl Graph {
    /// Creates a graph with `min` and `max` determined from the values.
    pub fn new(title: Option<&str>, seq_id: &str, range: Range<usize>, comp: usize, values: GraphValues) -> Self {
        let (min, max) = (0..values.len()).filter_map(|i| values.get(i)).fold(
            (u32::MAX, 0), |(min, max), x| (min.min(x), max.max(x))
        );
        let min = if values.is_empty() { 0 } else { min };
        Graph { title: title.map(|x| x.to_string()), seq_id: seq_id.to_string(), range, comp, min, max, values }
    }
}

/// An alignment of a read to a reference sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignmentRecord {
    /// Alignment identifier in the archive.
    pub id: usize,
    /// Identifier of the reference.
    pub seq_id: String,
    /// Reference interval covered by the alignment.
    pub range: Range<usize>,
    /// Is the read aligned in reverse orientation.
    pub reverse: bool,
    /// Mapping quality.
    pub map_quality: u8,
    /// External identifier of the read.
    pub read_id: String,
    /// Spot group of the read.
    pub spot_group: String,
    /// Alignment operations as a CIGAR string.
    pub cigar: String,
    /// The read with `=` at positions matching the reference.
    pub mismatch: Vec<u8>,
}

impl AlignmentRecord {
    /// Converts an archive row into a record.
    pub fn from_row(archive: &ArchiveInfo, refseq: &RefSeqInfo, row: AlignmentRow) -> Self {
        AlignmentRecord {
            id: row.id,
            seq_id: refseq.seq_id().to_string(),
            range: row.ref_range(),
            reverse: row.reverse,
            map_quality: row.map_quality,
            read_id: archive.short_read_id(row.spot_id, row.read_id),
            spot_group: row.spot_group,
            cigar: row.cigar,
            mismatch: row.mismatch,
        }
    }

    // Approximate size of the record in memory.
    fn size_in_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.seq_id.len() + self.read_id.len() + self.spot_group.len() + self.cigar.len() + self.mismatch.len()
    }
}

/// Data in an annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationData {
    Alignments(Vec<AlignmentRecord>),
    Graphs(Vec<Graph>),
}

/// A named annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub name: String,
    pub data: AnnotationData,
}

impl Annotation {
    /// Returns the alignments in the annotation, or an empty slice for graph annotations.
    pub fn alignments(&self) -> &[AlignmentRecord] {
        match &self.data {
            AnnotationData::Alignments(alignments) => alignments,
            AnnotationData::Graphs(_) => &[],
        }
    }

    /// Returns the graphs in the annotation, or an empty slice for alignment annotations.
    pub fn graphs(&self) -> &[Graph] {
        match &self.data {
            AnnotationData::Alignments(_) => &[],
            AnnotationData::Graphs(graphs) => graphs,
        }
    }
}

/// The skeleton of an annotation blob.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotBlob {
    pub blob_id: BlobId,
    pub seq_id: String,
    /// Initially only the delayed main chunk.
    pub chunks: Vec<ChunkDescriptor>,
}

/// A loaded chunk of an annotation blob.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotChunk {
    pub chunk_id: AnnotChunkId,
    /// Annotations in the chunk.
    pub annots: Vec<Annotation>,
    /// Chunks registered by loading this chunk.
    pub chunks: Vec<ChunkDescriptor>,
    /// Approximate memory used by the annotations in bytes.
    pub used_memory: usize,
}

impl AnnotChunk {
    /// Returns the annotation with the given name.
    pub fn annot(&self, name: &str) -> Option<&Annotation> {
        self.annots.iter().find(|x| x.name == name)
    }
}

//-----------------------------------------------------------------------------

/// Pileup counter titles in counter order.
pub const PILEUP_TITLES: [&str; 6] = [
    "Number of A bases",
    "Number of C bases",
    "Number of G bases",
    "Number of T bases",
    "Number of inserts",
    "Number of matches",
];

const STAT_INSERT: usize = 4;
const STAT_MATCH: usize = 5;

// Per-position counters over an interval.
#[derive(Clone, Debug)]
struct PileupCounts {
    start: usize,
    counts: [Vec<u32>; 6],
}

impl PileupCounts {
    fn new(range: &Range<usize>) -> Self {
        let len = range.len();
        PileupCounts { start: range.start, counts: std::array::from_fn(|_| vec![0; len]) }
    }

    fn len(&self) -> usize {
        self.counts[0].len()
    }

    // Adds one to the counter at positions `pos..pos + len` relative to the start, clipped to the interval.
    fn add(&mut self, stat: usize, pos: isize, len: usize) {
        let from = pos.max(0) as usize;
        let to = (pos + len as isize).clamp(0, self.len() as isize) as usize;
        for count in self.counts[stat][from.min(to)..to].iter_mut() {
            *count += 1;
        }
    }

    fn add_base(&mut self, pos: isize, base: u8) {
        let stat = match base {
            b'A' => 0,
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            b'=' => STAT_MATCH,
            _ => return,
        };
        self.add(stat, pos, 1);
    }

    fn add_alignment(&mut self, row: &AlignmentRow, ops: &[CigarOp]) -> Result<()> {
        let mut ref_pos = row.ref_pos as isize - self.start as isize;
        let mut read_pos = 0;
        for op in ops {
            match *op {
                CigarOp::Equal(len) => {
                    self.add(STAT_MATCH, ref_pos, len);
                    ref_pos += len as isize;
                    read_pos += len;
                },
                CigarOp::Match(len) | CigarOp::Mismatch(len) => {
                    let bases = row.mismatch.get(read_pos..read_pos + len).ok_or_else(|| {
                        LoaderError::InvalidCigar(format!("{} is longer than the read in alignment {}", row.cigar, row.id))
                    })?;
                    for (i, &base) in bases.iter().enumerate() {
                        self.add_base(ref_pos + i as isize, base);
                    }
                    ref_pos += len as isize;
                    read_pos += len;
                },
                CigarOp::Deletion(len) => {
                    self.add(STAT_INSERT, ref_pos, len);
                    ref_pos += len as isize;
                },
                CigarOp::Insertion(len) | CigarOp::SoftClip(len) => {
                    read_pos += len;
                },
                CigarOp::Skip(len) => {
                    ref_pos += len as isize;
                },
                CigarOp::HardClip(_) | CigarOp::Padding(_) => {},
            }
        }
        Ok(())
    }

    fn into_graphs(self, seq_id: &str) -> Vec<Graph> {
        let range = self.start..self.start + self.len();
        self.counts.into_iter().zip(PILEUP_TITLES.iter()).map(|(counts, title)| {
            Graph::new(Some(title), seq_id, range.clone(), 1, GraphValues::from_counts(counts))
        }).collect()
    }
}

//-----------------------------------------------------------------------------

/// Builds annotation blobs and chunks for a reference sequence in an archive.
///
/// # Examples
///
/// ```
/// use csra_base::{ArchiveBuilder, ArchiveInfo, LoaderParams, NewAlignment};
/// use csra_base::annot::{AnnotAssembler, AnnotChunkId};
/// use csra_base::blob_id::IdScheme;
/// use csra_base::utils::CancelToken;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut builder = ArchiveBuilder::new(100);
/// builder.add_reference("chr1", None, b"ACGTACGTAC", false).unwrap();
/// let spot = builder.add_spot("read1", "");
/// builder.add_read(spot, 1, b"GTAC", b"").unwrap();
/// builder.add_alignment(&NewAlignment::new("chr1", 2, spot, 1, "4M")).unwrap();
/// builder.create(dir.path().join("SRR1")).unwrap();
///
/// let archive = ArchiveInfo::open(dir.path().join("SRR1"), "SRR1", IdScheme::General, &LoaderParams::default()).unwrap();
/// let refseq = archive.ref_seq_info("SRR1/chr1").unwrap();
/// let assembler = AnnotAssembler::new(&archive, &refseq);
/// let cancel = CancelToken::new();
///
/// let main = assembler.load_chunk(AnnotChunkId::Main, &cancel).unwrap();
/// assert!(main.chunks.iter().any(|x| x.chunk_id == AnnotChunkId::Align(0)));
/// let chunk = assembler.load_chunk(AnnotChunkId::Align(0), &cancel).unwrap();
/// assert_eq!(chunk.annots[0].alignments().len(), 1);
/// ```
pub struct AnnotAssembler<'a> {
    archive: &'a ArchiveInfo,
    refseq: &'a RefSeqInfo,
}

impl<'a> AnnotAssembler<'a> {
    /// Creates an assembler for the reference.
    pub fn new(archive: &'a ArchiveInfo, refseq: &'a RefSeqInfo) -> Self {
        AnnotAssembler { archive, refseq }
    }

    /// Returns the identifier of the annotation blob.
    pub fn blob_id(&self) -> BlobId {
        BlobId::for_sequence(BlobKind::Annotation, self.archive.scheme(), self.archive.id_part(), self.refseq.seq_id())
    }

    fn entries(&self, range: &Range<usize>, align: bool, graph: bool, pileup: bool) -> Vec<ContentEntry> {
        let mut result = Vec::new();
        for slot in 0..self.archive.spot_group_slots() {
            let name = self.archive.slot_annot_name(slot, false);
            if graph {
                result.push(ContentEntry { annot_name: name.clone(), kind: ContentKind::Graph, range: range.clone() });
            }
            if align {
                result.push(ContentEntry { annot_name: name, kind: ContentKind::Align, range: range.clone() });
            }
            if pileup {
                let name = self.archive.slot_annot_name(slot, true);
                result.push(ContentEntry { annot_name: name, kind: ContentKind::Graph, range: range.clone() });
            }
        }
        result
    }

    /// Returns the skeleton of the annotation blob without touching alignment data.
    pub fn load_blob(&self) -> AnnotBlob {
        log::trace!("Annotation blob for {}", self.refseq.seq_id());
        let range = 0..self.refseq.length();
        let contents = self.entries(&range, true, true, self.archive.pileup_graphs());
        let main = ChunkDescriptor {
            chunk_id: AnnotChunkId::Main,
            range, contents,
            load_bytes: 0,
            load_seconds: 0.0,
        };
        AnnotBlob { blob_id: self.blob_id(), seq_id: self.refseq.seq_id().to_string(), chunks: vec![main] }
    }

    /// Loads the given chunk.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidChunk`] if the chunk does not exist.
    /// Returns [`LoaderError::Cancelled`] if the request was cancelled.
    /// Passes through database errors.
    pub fn load_chunk(&self, chunk_id: AnnotChunkId, cancel: &CancelToken) -> Result<AnnotChunk> {
        cancel.check()?;
        match chunk_id {
            AnnotChunkId::Main => self.load_main_chunk(cancel),
            AnnotChunkId::Align(k) => self.load_align_chunk(k, cancel),
            AnnotChunkId::Pileup(k) => self.load_pileup_chunk(k, cancel),
        }
    }

    /// Loads the main chunk: coverage graphs and descriptors for all range chunks.
    pub fn load_main_chunk(&self, cancel: &CancelToken) -> Result<AnnotChunk> {
        let plans = self.archive.chunk_plans(self.refseq, cancel)?;
        let mut cursor = self.archive.db().cursor()?;
        let handle = self.refseq.handle();
        let seq_id = self.refseq.seq_id();

        let coverage = cursor.coverage_rows(handle)?;
        let graph = Graph::new(None, seq_id, 0..self.refseq.length(), self.archive.db().row_size(), GraphValues::Byte(coverage));
        let mut annots = Vec::new();
        let mut used_memory = 0;
        for slot in 0..self.archive.spot_group_slots() {
            used_memory += graph.values.size_in_bytes();
            annots.push(Annotation {
                name: self.archive.slot_annot_name(slot, false),
                data: AnnotationData::Graphs(vec![graph.clone()]),
            });
        }

        let mut chunks = Vec::new();
        for (k, range, count) in plans.align.iter() {
            if count == 0 {
                continue;
            }
            cancel.check()?;
            let end = cursor.alignment_end(handle, range.clone())?.unwrap_or(range.end).max(range.end);
            let range = range.start..end;
            let contents = self.entries(&range, true, false, false);
            chunks.push(ChunkDescriptor::align(k, range, contents, count));
        }
        if self.archive.pileup_graphs() {
            for (k, range, count) in plans.graph.iter() {
                let contents = self.entries(&range, false, false, true);
                chunks.push(ChunkDescriptor::pileup(k, range, contents, count));
            }
        }

        log::debug!("Main chunk for {}: {} range chunks", seq_id, chunks.len());
        Ok(AnnotChunk { chunk_id: AnnotChunkId::Main, annots, chunks, used_memory })
    }

    /// Loads alignment chunk `k`: alignments starting in the chunk range.
    pub fn load_align_chunk(&self, k: usize, cancel: &CancelToken) -> Result<AnnotChunk> {
        let plans = self.archive.chunk_plans(self.refseq, cancel)?;
        if k >= plans.align.len() {
            return Err(self.invalid_chunk(AnnotChunkId::Align(k)));
        }
        let range = plans.align.range(k);
        let mut buckets: Vec<Vec<AlignmentRecord>> = vec![Vec::new(); self.archive.spot_group_slots()];
        let mut used_memory = 0;
        let mut cursor = self.archive.db().cursor()?;
        cursor.for_each_alignment_by_start(
            self.refseq.handle(), range.clone(), self.archive.min_map_quality(), cancel,
            &mut |row| {
                if let Some(slot) = self.archive.spot_group_slot(&row.spot_group) {
                    let record = AlignmentRecord::from_row(self.archive, self.refseq, row);
                    used_memory += record.size_in_bytes();
                    buckets[slot].push(record);
                }
                Ok(())
            }
        )?;
        drop(cursor);

        let mut annots = Vec::new();
        for (slot, alignments) in buckets.into_iter().enumerate() {
            if alignments.is_empty() {
                continue;
            }
            annots.push(Annotation {
                name: self.archive.slot_annot_name(slot, false),
                data: AnnotationData::Alignments(alignments),
            });
        }
        log::debug!(
            "Alignment chunk {} for {}:{}-{}: {} annotations",
            k, self.refseq.seq_id(), range.start, range.end, annots.len()
        );
        Ok(AnnotChunk { chunk_id: AnnotChunkId::Align(k), annots, chunks: Vec::new(), used_memory })
    }

    /// Loads pileup chunk `k`: base, insert, and match counts over the chunk range.
    pub fn load_pileup_chunk(&self, k: usize, cancel: &CancelToken) -> Result<AnnotChunk> {
        let plans = self.archive.chunk_plans(self.refseq, cancel)?;
        if !self.archive.pileup_graphs() || k >= plans.graph.len() {
            return Err(self.invalid_chunk(AnnotChunkId::Pileup(k)));
        }
        let range = plans.graph.range(k);
        let mut slots: Vec<Option<PileupCounts>> = vec![None; self.archive.spot_group_slots()];
        let mut cursor = self.archive.db().cursor()?;
        let alignments = cursor.for_each_alignment_overlapping(
            self.refseq.handle(), range.clone(), self.refseq.max_align_len(), self.archive.min_map_quality(), cancel,
            &mut |row| {
                if let Some(slot) = self.archive.spot_group_slot(&row.spot_group) {
                    let ops = formats::parse_cigar(row.cigar.as_bytes())?;
                    slots[slot].get_or_insert_with(|| PileupCounts::new(&range)).add_alignment(&row, &ops)?;
                }
                Ok(())
            }
        )?;
        drop(cursor);

        let mut annots = Vec::new();
        let mut used_memory = 0;
        for (slot, counts) in slots.into_iter().enumerate() {
            let counts = match counts {
                Some(counts) => counts,
                None => continue,
            };
            let graphs = counts.into_graphs(self.refseq.seq_id());
            used_memory += graphs.iter().map(|x| x.values.size_in_bytes()).sum::<usize>();
            annots.push(Annotation {
                name: self.archive.slot_annot_name(slot, true),
                data: AnnotationData::Graphs(graphs),
            });
        }
        log::debug!(
            "Pileup chunk {} for {}:{}-{}: {} alignments, {} annotations",
            k, self.refseq.seq_id(), range.start, range.end, alignments, annots.len()
        );
        Ok(AnnotChunk { chunk_id: AnnotChunkId::Pileup(k), annots, chunks: Vec::new(), used_memory })
    }

    fn invalid_chunk(&self, chunk_id: AnnotChunkId) -> LoaderError {
        LoaderError::InvalidChunk(format!("{} for {}", chunk_id, self.refseq.seq_id()))
    }
}

//-----------------------------------------------------------------------------
