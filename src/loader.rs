//! The data loader: resolves external identifiers to blobs and loads blobs and their chunks.
//!
//! The loader works in one of two modes:
//!
//! * Dynamic mode: identifiers name archives by accession, and archives are opened from a directory on demand.
//!   References are identified as `<accession>/<name>`, and the blob ids use [`IdScheme::General`].
//! * Fixed mode: a list of archives is opened at startup.
//!   References are identified by their external ids (or names), and the blob ids use [`IdScheme::SeqId`].
//!
//! Reads are identified as `<accession>.<spot>.<read>` in both modes.
//!
//! Identifiers that cannot be resolved or that are ambiguous are treated as unknown.
//! Other failures are passed through to the caller.

use crate::{LoaderError, Result};
use crate::annot::{AnnotAssembler, AnnotBlob, AnnotChunk, AnnotChunkId};
use crate::archive::{self, ArchiveCache, ArchiveInfo, ArchiveLock, ReadLocation, RefSeqInfo};
use crate::blob_id::{self, BlobId, BlobKind, IdScheme, ReadId};
use crate::chunks::PlannerParams;
use crate::reads::{ReadsAlignBlob, ReadsAssembler, ReadsBlob};
use crate::refseq::{RefSeqAssembler, RefSeqBlob, SeqDataChunk};
use crate::utils::CancelToken;

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};


//-----------------------------------------------------------------------------

/// Maps external sequence identifiers to the identifiers used by the caller.
pub trait IdMapper: Send + Sync + Debug {
    /// Returns the mapped identifier, or [`None`] to keep the original.
    fn map_id(&self, id: &str) -> Option<String>;
}

/// Loader configuration.
#[derive(Clone, Debug)]
pub struct LoaderParams {
    /// Directory containing the archives, or a single archive file.
    pub dir_path: PathBuf,
    /// Archives opened at startup; a non-empty list disables dynamic mode.
    pub csra_files: Vec<String>,
    /// Alignments with a lower mapping quality are skipped; 0 disables the filter.
    pub min_map_quality: u8,
    /// Generate pileup graphs.
    pub pileup_graphs: bool,
    /// Generate read quality graphs.
    pub quality_graphs: bool,
    /// Load alignments of reads with the reads instead of the reference annotations.
    pub spot_read_align: bool,
    /// Use the full archive path as the identifier part in fixed mode.
    pub path_in_id: bool,
    /// Maximum number of spot groups for separate annotations; at most 1 merges all spot groups.
    pub spot_groups: usize,
    /// Base name for annotations instead of the archive name.
    pub annot_name: Option<String>,
    /// Mapping for external sequence identifiers in fixed mode.
    pub id_mapper: Option<Arc<dyn IdMapper>>,
    /// Maximum number of idle archives kept open in dynamic mode.
    pub cache_size: usize,
    /// Number of spots in a read blob.
    pub reads_per_blob: u64,
    /// Chunk planning parameters.
    pub planner: PlannerParams,
}

impl Default for LoaderParams {
    fn default() -> Self {
        LoaderParams {
            dir_path: PathBuf::new(),
            csra_files: Vec::new(),
            min_map_quality: 0,
            pileup_graphs: true,
            quality_graphs: false,
            spot_read_align: false,
            path_in_id: true,
            spot_groups: 0,
            annot_name: None,
            id_mapper: None,
            cache_size: Self::CACHE_SIZE,
            reads_per_blob: 1,
            planner: PlannerParams::default(),
        }
    }
}

impl LoaderParams {
    /// Default number of cached archives.
    pub const CACHE_SIZE: usize = 100;

    pub const ENV_MIN_MAP_QUALITY: &'static str = "CSRA_LOADER_MIN_MAP_QUALITY";
    pub const ENV_PILEUP_GRAPHS: &'static str = "CSRA_LOADER_PILEUP_GRAPHS";
    pub const ENV_QUALITY_GRAPHS: &'static str = "CSRA_LOADER_QUALITY_GRAPHS";
    pub const ENV_SPOT_READ_ALIGN: &'static str = "CSRA_LOADER_SPOT_READ_ALIGN";
    pub const ENV_SPOT_GROUPS: &'static str = "CSRA_LOADER_SPOT_GROUPS";
    pub const ENV_GC_SIZE: &'static str = "CSRA_LOADER_GC_SIZE";

    /// Parameters for dynamic mode with archives in the given directory.
    pub fn with_dir<P: AsRef<Path>>(dir_path: P) -> Self {
        LoaderParams { dir_path: dir_path.as_ref().to_path_buf(), ..Self::default() }
    }

    /// Parameters for fixed mode with the given archives in the directory.
    pub fn with_files<P: AsRef<Path>>(dir_path: P, files: &[&str]) -> Self {
        LoaderParams {
            dir_path: dir_path.as_ref().to_path_buf(),
            csra_files: files.iter().map(|x| x.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_min_map_quality(mut self, min_map_quality: u8) -> Self {
        self.min_map_quality = min_map_quality;
        self
    }

    pub fn with_pileup_graphs(mut self, pileup_graphs: bool) -> Self {
        self.pileup_graphs = pileup_graphs;
        self
    }

    pub fn with_quality_graphs(mut self, quality_graphs: bool) -> Self {
        self.quality_graphs = quality_graphs;
        self
    }

    pub fn with_spot_read_align(mut self, spot_read_align: bool) -> Self {
        self.spot_read_align = spot_read_align;
        self
    }

    pub fn with_spot_groups(mut self, spot_groups: usize) -> Self {
        self.spot_groups = spot_groups;
        self
    }

    pub fn with_annot_name(mut self, annot_name: &str) -> Self {
        self.annot_name = Some(annot_name.to_string());
        self
    }

    pub fn with_id_mapper(mut self, id_mapper: Arc<dyn IdMapper>) -> Self {
        self.id_mapper = Some(id_mapper);
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_reads_per_blob(mut self, reads_per_blob: u64) -> Self {
        self.reads_per_blob = reads_per_blob;
        self
    }

    pub fn with_planner(mut self, planner: PlannerParams) -> Self {
        self.planner = planner;
        self
    }

    /// Applies overrides from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidInput`] if a variable has an invalid value.
    pub fn override_from_env(self) -> Result<Self> {
        self.override_with(|key| std::env::var(key).ok())
    }

    /// Applies overrides using the given lookup function for the variables.
    pub fn override_with<F: Fn(&str) -> Option<String>>(mut self, lookup: F) -> Result<Self> {
        if let Some(value) = lookup(Self::ENV_MIN_MAP_QUALITY) {
            self.min_map_quality = parse_number(Self::ENV_MIN_MAP_QUALITY, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_PILEUP_GRAPHS) {
            self.pileup_graphs = parse_bool(Self::ENV_PILEUP_GRAPHS, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_QUALITY_GRAPHS) {
            self.quality_graphs = parse_bool(Self::ENV_QUALITY_GRAPHS, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_SPOT_READ_ALIGN) {
            self.spot_read_align = parse_bool(Self::ENV_SPOT_READ_ALIGN, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_SPOT_GROUPS) {
            self.spot_groups = parse_number(Self::ENV_SPOT_GROUPS, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_GC_SIZE) {
            self.cache_size = parse_number(Self::ENV_GC_SIZE, &value)?;
        }
        Ok(self)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| LoaderError::InvalidInput(format!("Invalid value for {}: {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(LoaderError::InvalidInput(format!("Invalid value for {}: {}", key, value))),
    }
}

//-----------------------------------------------------------------------------

/// What the caller needs for an identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    /// Everything.
    All,
    /// The whole blob.
    Blob,
    /// The sequence.
    Bioseq,
    /// Sequence data.
    Sequence,
    /// All annotations.
    Annot,
    /// Graph annotations.
    Graph,
    /// Alignment annotations.
    Align,
    /// Annotations on a sequence provided elsewhere.
    OrphanAnnot,
}

impl Choice {
    fn needs_sequence(self) -> bool {
        matches!(self, Choice::All | Choice::Blob | Choice::Bioseq | Choice::Sequence)
    }

    fn needs_align(self) -> bool {
        matches!(self, Choice::All | Choice::Annot | Choice::Align)
    }

    fn needs_graph(self) -> bool {
        matches!(self, Choice::All | Choice::Annot | Choice::Graph)
    }
}

/// Molecule type of a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoleculeType {
    /// Nucleic acid of unspecified kind.
    NucleicAcid,
}

/// A blob needed for an identifier, optionally restricted to some chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobRequest {
    pub blob_id: BlobId,
    /// Chunks to load; empty if the caller decides.
    pub chunks: Vec<AnnotChunkId>,
}

impl BlobRequest {
    fn whole(blob_id: BlobId) -> Self {
        BlobRequest { blob_id, chunks: Vec::new() }
    }
}

/// A loaded blob.
#[derive(Clone, Debug, PartialEq)]
pub enum Blob {
    Annot(AnnotBlob),
    RefSeq(RefSeqBlob),
    Reads(ReadsBlob),
    ReadsAlign(ReadsAlignBlob),
}

/// Identifier of a chunk within a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkId {
    Annot(AnnotChunkId),
    RefSeq(usize),
}

/// A loaded chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkData {
    Annot(AnnotChunk),
    RefSeq(SeqDataChunk),
}

// A resolved reference sequence.
struct RefSeqMatch {
    archive: ArchiveLock,
    refseq: Arc<RefSeqInfo>,
}

impl RefSeqMatch {
    // The sequence can be loaded from the archive.
    fn has_sequence(&self) -> bool {
        self.archive.scheme() == IdScheme::General || self.refseq.is_local()
    }
}

#[derive(Debug)]
enum ArchiveMode {
    Dynamic(ArchiveCache),
    Fixed(Vec<ArchiveLock>),
}

//-----------------------------------------------------------------------------

/// Loads reference sequences, reads, and alignment annotations from cSRA-base archives.
///
/// The loader can be shared between threads.
///
/// # Examples
///
/// ```
/// use csra_base::{ArchiveBuilder, CsraLoader, LoaderParams, NewAlignment};
/// use csra_base::loader::{Blob, Choice};
/// use csra_base::utils::CancelToken;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut builder = ArchiveBuilder::new(100);
/// builder.add_reference("chr1", Some("NC_000001.10"), b"ACGTACGTAC", false).unwrap();
/// let spot = builder.add_spot("read1", "");
/// builder.add_read(spot, 1, b"GTAC", b"").unwrap();
/// builder.add_alignment(&NewAlignment::new("chr1", 2, spot, 1, "4M")).unwrap();
/// builder.create(dir.path().join("SRR1")).unwrap();
///
/// let loader = CsraLoader::new(LoaderParams::with_dir(dir.path())).unwrap();
/// let blob_id = loader.resolve("SRR1/chr1").unwrap().unwrap();
/// assert_eq!(blob_id.to_string(), "refseq|gnl|SRR1|||SRR1/chr1");
///
/// let requests = loader.get_required_blobs("SRR1/chr1", Choice::Align, &CancelToken::new()).unwrap();
/// assert_eq!(requests.len(), 1);
/// let blob = loader.load_blob(&requests[0].blob_id, &CancelToken::new()).unwrap();
/// assert!(matches!(blob, Blob::Annot(_)));
///
/// assert_eq!(loader.sequence_length("SRR1.1.1").unwrap(), Some(4));
/// ```
#[derive(Debug)]
pub struct CsraLoader {
    params: LoaderParams,
    mode: ArchiveMode,
    spot_read_align: AtomicBool,
}

impl CsraLoader {
    /// Taxonomy id reported for known sequences.
    pub const UNDEFINED_TAX_ID: u32 = 0;

    /// Creates a loader.
    ///
    /// In fixed mode, all archives are opened immediately.
    ///
    /// # Errors
    ///
    /// Passes through errors from opening the archives in fixed mode.
    pub fn new(params: LoaderParams) -> Result<Self> {
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        if params.csra_files.is_empty() {
            if params.dir_path.is_file() {
                let file = params.dir_path.display().to_string();
                files.push((params.dir_path.clone(), file));
            }
        } else {
            for file in params.csra_files.iter() {
                let path = if params.dir_path.as_os_str().is_empty() { PathBuf::from(file) } else { params.dir_path.join(file) };
                files.push((path, file.clone()));
            }
        }

        let mode = if files.is_empty() {
            log::info!("Loading archives from directory {}", params.dir_path.display());
            ArchiveMode::Dynamic(ArchiveCache::new(&params.dir_path, &params))
        } else {
            let mut archives = Vec::with_capacity(files.len());
            for (path, file) in files {
                let id_part = if params.path_in_id {
                    path.display().to_string()
                } else {
                    Path::new(&file).file_name().map(|x| x.to_string_lossy().to_string()).unwrap_or(file)
                };
                let archive = ArchiveInfo::open(&path, &id_part, IdScheme::SeqId, &params)?;
                archives.push(ArchiveLock::new(archive));
            }
            log::info!("Loaded {} fixed archives", archives.len());
            ArchiveMode::Fixed(archives)
        };

        let spot_read_align = AtomicBool::new(params.spot_read_align);
        Ok(CsraLoader { params, mode, spot_read_align })
    }

    /// Returns the loader configuration.
    pub fn params(&self) -> &LoaderParams {
        &self.params
    }

    /// Returns `true` if the loader uses a fixed list of archives.
    pub fn is_fixed(&self) -> bool {
        matches!(self.mode, ArchiveMode::Fixed(_))
    }

    /// Returns the archive cache in dynamic mode.
    pub fn cache(&self) -> Option<&ArchiveCache> {
        match &self.mode {
            ArchiveMode::Dynamic(cache) => Some(cache),
            ArchiveMode::Fixed(_) => None,
        }
    }

    /// Returns the archives in fixed mode.
    pub fn fixed_archives(&self) -> &[ArchiveLock] {
        match &self.mode {
            ArchiveMode::Dynamic(_) => &[],
            ArchiveMode::Fixed(archives) => archives,
        }
    }

    /// Returns `true` if read alignments are loaded with the reads.
    pub fn spot_read_align(&self) -> bool {
        self.spot_read_align.load(Ordering::Relaxed)
    }

    /// Sets whether read alignments are loaded with the reads.
    pub fn set_spot_read_align(&self, value: bool) {
        self.spot_read_align.store(value, Ordering::Relaxed);
    }

    //-----------------------------------------------------------------------------

    // Finds an archive by the accession or identifier part.
    fn find_archive(&self, accession: &str) -> Result<Option<ArchiveLock>> {
        match &self.mode {
            ArchiveMode::Dynamic(cache) => cache.get_or_open(accession),
            ArchiveMode::Fixed(archives) => {
                let found = archives.iter().find(|x| x.id_part() == accession || x.name() == accession);
                Ok(found.cloned())
            },
        }
    }

    fn find_refseq(&self, id: &str) -> Result<Option<RefSeqMatch>> {
        match &self.mode {
            ArchiveMode::Dynamic(cache) => {
                let (accession, _) = match blob_id::parse_refseq_label(id) {
                    Ok(parts) => parts,
                    Err(_) => return Ok(None),
                };
                let archive = match cache.get_or_open(accession)? {
                    Some(archive) => archive,
                    None => return Ok(None),
                };
                Ok(archive.ref_seq_info(id).map(|refseq| RefSeqMatch { archive, refseq }))
            },
            ArchiveMode::Fixed(archives) => {
                let mut result: Option<RefSeqMatch> = None;
                for archive in archives.iter() {
                    let refseq = match archive.ref_seq_info(id) {
                        Some(refseq) => refseq,
                        None => continue,
                    };
                    if let Some(found) = &result {
                        if !Arc::ptr_eq(&found.refseq, &refseq) {
                            log::warn!("{}", archive::conflict(id, &found.archive, archive));
                            return Ok(None);
                        }
                    } else {
                        result = Some(RefSeqMatch { archive: archive.clone(), refseq });
                    }
                }
                Ok(result)
            },
        }
    }

    fn find_read(&self, id: &str, want_ref: bool) -> Result<Option<(ArchiveLock, ReadId, ReadLocation)>> {
        let read_id = match blob_id::parse_read_id(id) {
            Ok(read_id) => read_id,
            Err(_) => return Ok(None),
        };
        let archive = match self.find_archive(&read_id.accession)? {
            Some(archive) => archive,
            None => return Ok(None),
        };
        let location = archive.is_valid_read_id(read_id.spot_id, read_id.read_id, want_ref)?;
        Ok(location.map(|location| (archive, read_id, location)))
    }

    /// Resolves the read identifier to the archive, the parsed identifier, and the primary alignment location.
    ///
    /// Returns [`None`] if the identifier is not a valid read identifier or the read does not exist.
    pub fn resolve_read_id(&self, id: &str) -> Result<Option<(ArchiveLock, ReadId, ReadLocation)>> {
        self.find_read(id, true)
    }

    /// Resolves an external identifier to the blob containing it.
    ///
    /// Reference sequences resolve to the sequence blob, or to the annotation blob if the sequence must be loaded elsewhere.
    /// Reads resolve to the read blob.
    pub fn resolve(&self, id: &str) -> Result<Option<BlobId>> {
        log::trace!("Resolving {}", id);
        if let Some(found) = self.find_refseq(id)? {
            let blob_id = if found.has_sequence() {
                RefSeqAssembler::new(&found.archive, &found.refseq).blob_id()
            } else {
                AnnotAssembler::new(&found.archive, &found.refseq).blob_id()
            };
            return Ok(Some(blob_id));
        }
        if let Some((archive, read_id, _)) = self.find_read(id, false)? {
            return Ok(Some(ReadsAssembler::new(&archive).blob_id(BlobKind::Reads, read_id.spot_id)));
        }
        Ok(None)
    }

    /// Returns the blobs needed for the identifier and the choice.
    ///
    /// Returns an empty vector if the identifier is unknown.
    /// A read whose alignment is requested through the reference may plan the chunks for the reference, which can be cancelled with the token.
    pub fn get_required_blobs(&self, id: &str, choice: Choice, cancel: &CancelToken) -> Result<Vec<BlobRequest>> {
        log::trace!("Required blobs for {} ({:?})", id, choice);
        cancel.check()?;
        let mut result = Vec::new();
        let need_seq = choice.needs_sequence();
        let need_align = choice.needs_align();
        let need_graph = choice.needs_graph();

        if let Some(found) = self.find_refseq(id)? {
            if found.has_sequence() {
                if need_seq {
                    result.push(BlobRequest::whole(RefSeqAssembler::new(&found.archive, &found.refseq).blob_id()));
                }
                if need_align || need_graph {
                    result.push(BlobRequest::whole(AnnotAssembler::new(&found.archive, &found.refseq).blob_id()));
                }
            } else if choice == Choice::OrphanAnnot {
                result.push(BlobRequest::whole(AnnotAssembler::new(&found.archive, &found.refseq).blob_id()));
            }
            return Ok(result);
        }

        if choice == Choice::OrphanAnnot {
            return Ok(result);
        }
        let on_reference = need_align && !self.spot_read_align();
        let (archive, read_id, location) = match self.find_read(id, on_reference)? {
            Some(found) => found,
            None => return Ok(result),
        };
        let reads = ReadsAssembler::new(&archive);
        let reference = match (&location.refseq, location.ref_pos) {
            (Some(refseq), Some(pos)) if on_reference => Some((refseq, pos)),
            _ => None,
        };

        let align_with_reads = need_align && reference.is_none();
        if need_seq || need_graph || align_with_reads {
            result.push(BlobRequest::whole(reads.blob_id(BlobKind::Reads, read_id.spot_id)));
        }
        if align_with_reads {
            result.push(BlobRequest::whole(reads.blob_id(BlobKind::ReadsAlign, read_id.spot_id)));
        }
        if let Some((refseq, pos)) = reference {
            let plans = archive.chunk_plans(refseq, cancel)?;
            let mut chunks = vec![AnnotChunkId::Main];
            if let Some(k) = plans.align.chunk_for_pos(pos) {
                chunks.push(AnnotChunkId::Align(k));
            }
            result.push(BlobRequest { blob_id: AnnotAssembler::new(&archive, refseq).blob_id(), chunks });
        }
        Ok(result)
    }

    //-----------------------------------------------------------------------------

    fn archive_for_blob(&self, blob_id: &BlobId) -> Result<ArchiveLock> {
        let archive = self.find_archive(blob_id.archive())?;
        match archive {
            Some(archive) if archive.scheme() == blob_id.scheme() => Ok(archive),
            _ => Err(LoaderError::NotFound(blob_id.to_string())),
        }
    }

    fn refseq_for_blob(&self, archive: &ArchiveInfo, blob_id: &BlobId) -> Result<Arc<RefSeqInfo>> {
        blob_id.seq_id().and_then(|seq_id| archive.ref_seq_info(seq_id)).ok_or_else(|| LoaderError::NotFound(blob_id.to_string()))
    }

    /// Loads the blob.
    ///
    /// Annotation and sequence blobs are skeletons with delayed chunks.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::NotFound`] if the archive or the target does not exist.
    pub fn load_blob(&self, blob_id: &BlobId, cancel: &CancelToken) -> Result<Blob> {
        log::trace!("Loading blob {}", blob_id);
        cancel.check()?;
        let archive = self.archive_for_blob(blob_id)?;
        match blob_id.kind() {
            BlobKind::Annotation => {
                let refseq = self.refseq_for_blob(&archive, blob_id)?;
                Ok(Blob::Annot(AnnotAssembler::new(&archive, &refseq).load_blob()))
            },
            BlobKind::RefSeq => {
                let refseq = self.refseq_for_blob(&archive, blob_id)?;
                Ok(Blob::RefSeq(RefSeqAssembler::new(&archive, &refseq).load_blob()))
            },
            BlobKind::Reads => {
                Ok(Blob::Reads(ReadsAssembler::new(&archive).load_reads_blob(blob_id, cancel)?))
            },
            BlobKind::ReadsAlign => {
                Ok(Blob::ReadsAlign(ReadsAssembler::new(&archive).load_reads_align_blob(blob_id, cancel)?))
            },
        }
    }

    /// Loads a chunk of the blob.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidChunk`] if the blob has no such chunk.
    /// Returns [`LoaderError::NotFound`] if the archive or the target does not exist.
    pub fn load_chunk(&self, blob_id: &BlobId, chunk_id: ChunkId, cancel: &CancelToken) -> Result<ChunkData> {
        log::trace!("Loading chunk {:?} of blob {}", chunk_id, blob_id);
        cancel.check()?;
        let archive = self.archive_for_blob(blob_id)?;
        match (blob_id.kind(), chunk_id) {
            (BlobKind::Annotation, ChunkId::Annot(chunk_id)) => {
                let refseq = self.refseq_for_blob(&archive, blob_id)?;
                let chunk = AnnotAssembler::new(&archive, &refseq).load_chunk(chunk_id, cancel)?;
                Ok(ChunkData::Annot(chunk))
            },
            (BlobKind::RefSeq, ChunkId::RefSeq(index)) => {
                let refseq = self.refseq_for_blob(&archive, blob_id)?;
                let chunk = RefSeqAssembler::new(&archive, &refseq).load_chunk(index)?;
                Ok(ChunkData::RefSeq(chunk))
            },
            _ => Err(LoaderError::InvalidChunk(format!("{:?} in blob {}", chunk_id, blob_id))),
        }
    }

    //-----------------------------------------------------------------------------

    /// Returns all identifiers of the reference sequence or the read.
    pub fn sequence_ids(&self, id: &str) -> Result<Vec<String>> {
        if let Some(found) = self.find_refseq(id)? {
            return Ok(found.refseq.ids().to_vec());
        }
        if let Some((archive, read_id, _)) = self.find_read(id, false)? {
            return Ok(vec![archive.short_read_id(read_id.spot_id, read_id.read_id)]);
        }
        Ok(Vec::new())
    }

    /// Returns the versioned accession of the reference sequence, if it has one.
    pub fn acc_ver(&self, id: &str) -> Result<Option<String>> {
        let found = self.find_refseq(id)?;
        Ok(found.and_then(|x| x.refseq.external_id().map(|id| id.to_string())))
    }

    /// Returns the length of the reference sequence or the read.
    pub fn sequence_length(&self, id: &str) -> Result<Option<usize>> {
        if let Some(found) = self.find_refseq(id)? {
            return Ok(Some(found.refseq.length()));
        }
        if let Some((archive, read_id, _)) = self.find_read(id, false)? {
            let mut cursor = archive.db().cursor()?;
            let spots = cursor.spots(read_id.spot_id..read_id.spot_id + 1)?;
            let read = spots.iter().flat_map(|x| x.reads.iter()).find(|x| x.read_id == read_id.read_id);
            return Ok(read.map(|x| x.sequence.len()));
        }
        Ok(None)
    }

    /// Returns the canonical label of the reference sequence or the read.
    pub fn label(&self, id: &str) -> Result<Option<String>> {
        if let Some(found) = self.find_refseq(id)? {
            return Ok(Some(found.refseq.seq_id().to_string()));
        }
        if let Some((archive, read_id, _)) = self.find_read(id, false)? {
            return Ok(Some(archive.short_read_id(read_id.spot_id, read_id.read_id)));
        }
        Ok(None)
    }

    /// Returns `true` if the identifier resolves to a blob.
    pub fn is_known(&self, id: &str) -> Result<bool> {
        Ok(self.resolve(id)?.is_some())
    }

    /// Returns the molecule type of the reference sequence or the read, or [`None`] if the identifier is unknown.
    pub fn sequence_type(&self, id: &str) -> Result<Option<MoleculeType>> {
        Ok(self.is_known(id)?.then_some(MoleculeType::NucleicAcid))
    }

    /// Returns the taxonomy id of the reference sequence or the read, or [`None`] if the identifier is unknown.
    ///
    /// Archives do not record taxonomy, so the id of a known sequence is [`Self::UNDEFINED_TAX_ID`].
    pub fn tax_id(&self, id: &str) -> Result<Option<u32>> {
        Ok(self.is_known(id)?.then_some(Self::UNDEFINED_TAX_ID))
    }

    /// Returns the annotation names the loader may produce, sorted and deduplicated.
    ///
    /// In dynamic mode, the names are only known if the annotation name is set in the configuration.
    pub fn possible_annot_names(&self) -> Vec<String> {
        let mut result = Vec::new();
        match &self.mode {
            ArchiveMode::Dynamic(_) => {
                if let Some(name) = &self.params.annot_name {
                    result.push(name.clone());
                    if self.params.pileup_graphs {
                        result.push(format!("{} {}", name, ArchiveInfo::PILEUP_NAME_SUFFIX));
                    }
                }
            },
            ArchiveMode::Fixed(archives) => {
                for archive in archives.iter() {
                    result.extend(archive.possible_annot_names());
                }
            },
        }
        result.sort();
        result.dedup();
        result
    }
}

//-----------------------------------------------------------------------------
