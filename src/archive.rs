//! Open archives, their reference sequences, and the archive cache.
//!
//! [`ArchiveInfo`] wraps an open [`CsraDb`] with the loader configuration that applies to it.
//! It also maps external identifiers to [`RefSeqInfo`] objects, which hold the memoized chunk plans for each reference sequence.
//!
//! [`ArchiveCache`] opens archives by accession from a directory and keeps a bounded number of them open.
//! An archive is only evicted when no [`ArchiveLock`] refers to it.

use crate::{LoaderError, LoaderParams, Result};
use crate::blob_id::{self, IdScheme};
use crate::chunks::{self, AlignmentDensity, ChunkPlans, PlannerParams};
use crate::db::{ArchiveCursor, CsraDb, ReferenceRecord};
use crate::utils::CancelToken;

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use lru::LruCache;


//-----------------------------------------------------------------------------

/// A reference sequence in an archive.
///
/// Chunk plans are computed on first use and never recomputed.
/// The object is shared between all identifiers that resolve to the reference.
#[derive(Debug)]
pub struct RefSeqInfo {
    record: ReferenceRecord,
    seq_id: String,
    ids: Vec<String>,
    plans: OnceLock<ChunkPlans>,
    planning: Mutex<()>,
}

impl RefSeqInfo {
    fn new(record: ReferenceRecord, seq_id: String) -> Self {
        let mut ids = vec![seq_id.clone()];
        for id in [Some(&record.name), record.seq_id.as_ref()].into_iter().flatten() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        RefSeqInfo { record, seq_id, ids, plans: OnceLock::new(), planning: Mutex::new(()) }
    }

    /// Returns the canonical identifier of the reference.
    pub fn seq_id(&self) -> &str {
        &self.seq_id
    }

    /// Returns all known identifiers for the reference, starting with the canonical one.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Returns the name of the reference in the archive.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Returns the external sequence identifier stored in the archive, if any.
    pub fn external_id(&self) -> Option<&str> {
        self.record.seq_id.as_deref()
    }

    /// Returns `true` if the reference is only known by its local name.
    pub fn is_local(&self) -> bool {
        self.record.seq_id.is_none()
    }

    /// Returns the handle of the reference in the archive.
    pub fn handle(&self) -> usize {
        self.record.handle
    }

    /// Returns the length of the reference.
    pub fn length(&self) -> usize {
        self.record.length
    }

    /// Returns `true` if the reference is circular.
    pub fn circular(&self) -> bool {
        self.record.circular
    }

    /// Returns the length of the longest alignment on the reference.
    pub fn max_align_len(&self) -> usize {
        self.record.max_align_len
    }

    /// Returns the chunk plans if they have already been computed.
    pub fn plans(&self) -> Option<&ChunkPlans> {
        self.plans.get()
    }
}

//-----------------------------------------------------------------------------

// Alignment density of a reference sampled from the archive.
struct RefDensity<'a> {
    cursor: ArchiveCursor<'a>,
    handle: usize,
    length: usize,
    row_size: usize,
}

impl<'a> AlignmentDensity for RefDensity<'a> {
    fn ref_length(&self) -> usize {
        self.length
    }

    fn segment_size(&self) -> usize {
        self.row_size
    }

    fn segment_count(&mut self, segment: usize) -> Result<usize> {
        self.cursor.row_align_count(self.handle, segment)
    }

    fn count_up_to(&mut self, limit: usize) -> Result<usize> {
        self.cursor.probe_alignments(self.handle, limit)
    }
}

/// Location of a read's primary alignment.
#[derive(Clone, Debug)]
pub struct ReadLocation {
    /// The reference sequence, if the read is aligned.
    pub refseq: Option<Arc<RefSeqInfo>>,
    /// Starting position on the reference, if the read is aligned.
    pub ref_pos: Option<usize>,
}

//-----------------------------------------------------------------------------

/// An open archive with the loader configuration that applies to it.
#[derive(Debug)]
pub struct ArchiveInfo {
    db: CsraDb,
    id_part: String,
    scheme: IdScheme,
    annot_base: String,
    min_map_quality: u8,
    pileup_graphs: bool,
    quality_graphs: bool,
    reads_per_blob: u64,
    planner: PlannerParams,
    spot_groups: Vec<String>,
    spot_group_index: HashMap<String, usize>,
    refs: Vec<Arc<RefSeqInfo>>,
    ids: RwLock<HashMap<String, Arc<RefSeqInfo>>>,
}

impl ArchiveInfo {
    /// Separator between the annotation name and the spot group.
    pub const SPOT_GROUP_SEPARATOR: &'static str = ": ";

    /// Suffix for pileup annotation names.
    pub const PILEUP_NAME_SUFFIX: &'static str = "pileup graphs";

    /// Opens an archive.
    ///
    /// `id_part` is the accession used in read identifiers and in identifiers of the form `<accession>/<label>`.
    /// With [`IdScheme::General`], references are identified as `<id_part>/<name>`.
    /// With [`IdScheme::SeqId`], references are identified by their external ids, or by their names if they have none.
    ///
    /// # Errors
    ///
    /// Passes through errors from opening the database.
    pub fn open<P: AsRef<Path>>(filename: P, id_part: &str, scheme: IdScheme, params: &LoaderParams) -> Result<Self> {
        let db = CsraDb::open(filename)?;
        let mut cursor = db.cursor()?;
        let records = cursor.references()?;
        let spot_groups = if params.spot_groups > 1 {
            let groups: Vec<String> = cursor.spot_groups()?.into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(name, _)| name)
                .collect();
            if groups.len() > params.spot_groups { Vec::new() } else { groups }
        } else {
            Vec::new()
        };
        drop(cursor);

        let mut refs = Vec::with_capacity(records.len());
        let mut ids: HashMap<String, Arc<RefSeqInfo>> = HashMap::new();
        for record in records {
            let seq_id = match scheme {
                IdScheme::General => format!("{}/{}", id_part, record.name),
                IdScheme::SeqId => {
                    let id = record.seq_id.clone().unwrap_or_else(|| record.name.clone());
                    params.id_mapper.as_ref().and_then(|mapper| mapper.map_id(&id)).unwrap_or(id)
                },
            };
            let info = Arc::new(RefSeqInfo::new(record, seq_id));
            for id in info.ids() {
                match ids.get(id) {
                    Some(existing) => {
                        log::warn!("Identifier {} in {} refers to both {} and {}", id, db.name(), existing.name(), info.name());
                    },
                    None => {
                        ids.insert(id.clone(), info.clone());
                    },
                }
            }
            refs.push(info);
        }

        let annot_base = match &params.annot_name {
            Some(name) => name.clone(),
            None => db.name().to_string(),
        };
        let spot_group_index = spot_groups.iter().enumerate().map(|(i, x)| (x.clone(), i)).collect();
        log::debug!(
            "Archive {}: {} references, {} separate spot groups",
            db.name(), refs.len(), spot_groups.len()
        );

        Ok(ArchiveInfo {
            db,
            id_part: id_part.to_string(),
            scheme,
            annot_base,
            min_map_quality: params.min_map_quality,
            pileup_graphs: params.pileup_graphs,
            quality_graphs: params.quality_graphs,
            reads_per_blob: params.reads_per_blob.max(1),
            planner: params.planner.clone(),
            spot_groups, spot_group_index,
            refs,
            ids: RwLock::new(ids),
        })
    }

    /// Returns the underlying database.
    pub fn db(&self) -> &CsraDb {
        &self.db
    }

    /// Returns the name of the archive.
    pub fn name(&self) -> &str {
        self.db.name()
    }

    /// Returns the accession used in read identifiers.
    pub fn id_part(&self) -> &str {
        &self.id_part
    }

    /// Returns the identifier scheme for reference sequences.
    pub fn scheme(&self) -> IdScheme {
        self.scheme
    }

    /// Returns the minimum mapping quality for loaded alignments.
    pub fn min_map_quality(&self) -> u8 {
        self.min_map_quality
    }

    /// Returns `true` if pileup graphs are generated.
    pub fn pileup_graphs(&self) -> bool {
        self.pileup_graphs
    }

    /// Returns `true` if read quality graphs are generated.
    pub fn quality_graphs(&self) -> bool {
        self.quality_graphs
    }

    /// Returns the number of spots in a read blob.
    pub fn reads_per_blob(&self) -> u64 {
        self.reads_per_blob
    }

    /// Returns the chunk planning parameters.
    pub fn planner(&self) -> &PlannerParams {
        &self.planner
    }

    /// Returns the spot groups with separate annotations, or an empty slice if all alignments are in the same annotation.
    pub fn separate_spot_groups(&self) -> &[String] {
        &self.spot_groups
    }

    /// Returns the annotation slot for the spot group, or [`None`] if the group is not separated.
    ///
    /// Slot 0 is used for all alignments when spot groups are not separated.
    pub fn spot_group_slot(&self, spot_group: &str) -> Option<usize> {
        if self.spot_groups.is_empty() {
            Some(0)
        } else {
            self.spot_group_index.get(spot_group).copied()
        }
    }

    /// Returns the number of annotation slots.
    pub fn spot_group_slots(&self) -> usize {
        self.spot_groups.len().max(1)
    }

    /// Returns the annotation name without spot group or pileup suffixes.
    pub fn base_annot_name(&self) -> &str {
        &self.annot_base
    }

    /// Returns the annotation name for the spot group.
    ///
    /// The spot group is ignored if spot groups are not separated.
    pub fn annot_name(&self, spot_group: &str, pileup: bool) -> String {
        let mut name = self.annot_base.clone();
        if !self.spot_groups.is_empty() {
            name.push_str(Self::SPOT_GROUP_SEPARATOR);
            name.push_str(spot_group);
        }
        if pileup {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(Self::PILEUP_NAME_SUFFIX);
        }
        name
    }

    /// Returns the annotation name for the given slot.
    pub fn slot_annot_name(&self, slot: usize, pileup: bool) -> String {
        let spot_group = self.spot_groups.get(slot).map(|x| x.as_str()).unwrap_or("");
        self.annot_name(spot_group, pileup)
    }

    /// Returns all annotation names the archive may produce.
    pub fn possible_annot_names(&self) -> Vec<String> {
        let mut result = Vec::new();
        for slot in 0..self.spot_group_slots() {
            result.push(self.slot_annot_name(slot, false));
            if self.pileup_graphs {
                result.push(self.slot_annot_name(slot, true));
            }
        }
        result
    }

    /// Returns all reference sequences in order by handle.
    pub fn references(&self) -> &[Arc<RefSeqInfo>] {
        &self.refs
    }

    /// Returns the reference sequence with the given handle.
    pub fn ref_by_handle(&self, handle: usize) -> Option<Arc<RefSeqInfo>> {
        self.refs.get(handle).cloned()
    }

    /// Returns the reference sequence with the given identifier.
    ///
    /// Identifiers of the form `<id_part>/<name>` are accepted for any reference in the archive.
    /// Such identifiers are registered as aliases on first use.
    pub fn ref_seq_info(&self, id: &str) -> Option<Arc<RefSeqInfo>> {
        if let Some(info) = self.ids.read().unwrap_or_else(PoisonError::into_inner).get(id) {
            return Some(info.clone());
        }

        let (accession, label) = blob_id::parse_refseq_label(id).ok()?;
        if accession != self.id_part && accession != self.name() {
            return None;
        }
        let info = self.refs.iter().find(|x| x.name() == label)?.clone();
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        let info = ids.entry(id.to_string()).or_insert(info).clone();
        Some(info)
    }

    /// Returns the chunk plans for the reference, computing them on first use.
    ///
    /// Concurrent callers wait for a single computation.
    /// A failed computation leaves nothing behind, so a later call will try again.
    pub fn chunk_plans<'r>(&self, refseq: &'r RefSeqInfo, cancel: &CancelToken) -> Result<&'r ChunkPlans> {
        if let Some(plans) = refseq.plans.get() {
            return Ok(plans);
        }
        let _guard = refseq.planning.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(plans) = refseq.plans.get() {
            return Ok(plans);
        }

        let mut density = RefDensity {
            cursor: self.db.cursor()?,
            handle: refseq.handle(),
            length: refseq.length(),
            row_size: self.db.row_size(),
        };
        let plans = chunks::plan_chunks(&mut density, &self.planner, cancel)?;
        log::info!(
            "Planned {}: {} alignment chunks, {} graph chunks",
            refseq.seq_id(), plans.align.len(), plans.graph.len()
        );
        Ok(refseq.plans.get_or_init(|| plans))
    }

    /// Checks that the read exists in the archive.
    ///
    /// If `want_ref` is `true`, also determines the reference and the starting position of the primary alignment.
    /// Returns [`None`] if the read does not exist.
    pub fn is_valid_read_id(&self, spot_id: u64, read_id: u32, want_ref: bool) -> Result<Option<ReadLocation>> {
        let mut cursor = self.db.cursor()?;
        if !cursor.read_exists(spot_id, read_id)? {
            return Ok(None);
        }
        let mut location = ReadLocation { refseq: None, ref_pos: None };
        if want_ref {
            if let Some(alignment) = cursor.primary_alignment(spot_id, read_id)? {
                location.refseq = self.ref_by_handle(alignment.ref_handle);
                location.ref_pos = Some(alignment.ref_pos);
            }
        }
        Ok(Some(location))
    }

    /// Returns the external identifier of the read.
    pub fn short_read_id(&self, spot_id: u64, read_id: u32) -> String {
        format!("{}.{}.{}", self.id_part, spot_id, read_id)
    }
}

//-----------------------------------------------------------------------------

/// A shared reference to an open archive.
///
/// A cached archive cannot be evicted while a lock to it exists.
#[derive(Clone, Debug)]
pub struct ArchiveLock(Arc<ArchiveInfo>);

impl ArchiveLock {
    /// Creates a lock for an archive that is not managed by a cache.
    pub fn new(archive: ArchiveInfo) -> Self {
        ArchiveLock(Arc::new(archive))
    }

    /// Returns `true` if both locks refer to the same archive.
    pub fn same_archive(&self, other: &ArchiveLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ArchiveLock {
    type Target = ArchiveInfo;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
struct ArchiveSlot {
    archive: Mutex<Option<Arc<ArchiveInfo>>>,
}

impl ArchiveSlot {
    // Nobody else is holding the slot or the archive.
    fn is_idle(slot: &Arc<ArchiveSlot>) -> bool {
        if Arc::strong_count(slot) > 1 {
            return false;
        }
        match slot.archive.try_lock() {
            Ok(archive) => archive.as_ref().map(|x| Arc::strong_count(x) == 1).unwrap_or(true),
            Err(_) => false,
        }
    }
}

/// A bounded cache of archives opened by accession.
///
/// Archive `<accession>` is opened from file `<dir>/<accession>` on first use.
/// Opening is serialized per accession, while the cache itself is only locked for bookkeeping.
/// When the cache is over capacity, the least recently used archive without active locks is closed.
/// If every archive is in use, the cache temporarily exceeds its capacity.
///
/// # Examples
///
/// ```
/// use csra_base::{ArchiveBuilder, ArchiveCache, LoaderParams};
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut builder = ArchiveBuilder::new(100);
/// builder.add_reference("chr1", None, b"ACGT", false).unwrap();
/// builder.create(dir.path().join("SRR1")).unwrap();
///
/// let cache = ArchiveCache::new(dir.path(), &LoaderParams::default());
/// let archive = cache.get_or_open("SRR1").unwrap().unwrap();
/// assert_eq!(archive.references().len(), 1);
/// assert!(cache.get_or_open("SRR2").unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct ArchiveCache {
    dir: PathBuf,
    params: LoaderParams,
    capacity: usize,
    slots: Mutex<LruCache<String, Arc<ArchiveSlot>>>,
}

impl ArchiveCache {
    /// Creates an empty cache for archives in the given directory.
    ///
    /// The capacity is taken from [`LoaderParams::cache_size`].
    pub fn new<P: AsRef<Path>>(dir: P, params: &LoaderParams) -> Self {
        ArchiveCache {
            dir: dir.as_ref().to_path_buf(),
            params: params.clone(),
            capacity: params.cache_size.max(1),
            slots: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Returns the maximum number of idle archives kept open.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of archives in the cache.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the accession is in the cache.
    pub fn contains(&self, accession: &str) -> bool {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).contains(accession)
    }

    /// Returns the archive for the accession, opening it if necessary.
    ///
    /// Returns [`None`] if the archive does not exist or cannot be accessed.
    ///
    /// # Errors
    ///
    /// Passes through other errors from opening the archive.
    /// Failures are not cached.
    pub fn get_or_open(&self, accession: &str) -> Result<Option<ArchiveLock>> {
        if accession.is_empty() || accession.contains(['/', '\\']) || accession == "." || accession == ".." {
            return Ok(None);
        }

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = match slots.get(accession) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = Arc::new(ArchiveSlot::default());
                    slots.put(accession.to_string(), slot.clone());
                    slot
                },
            };
            Self::evict(&mut slots, self.capacity);
            slot
        };

        let mut archive = slot.archive.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = archive.as_ref() {
            return Ok(Some(ArchiveLock(info.clone())));
        }
        let path = self.dir.join(accession);
        match ArchiveInfo::open(&path, accession, IdScheme::General, &self.params) {
            Ok(info) => {
                let info = Arc::new(info);
                *archive = Some(info.clone());
                Ok(Some(ArchiveLock(info)))
            },
            Err(err) => {
                drop(archive);
                self.forget(accession, &slot);
                if err.is_not_found() {
                    log::debug!("Archive {} not found", path.display());
                    Ok(None)
                } else {
                    Err(err)
                }
            },
        }
    }

    // Removes a slot that failed to open, unless it has been replaced.
    fn forget(&self, accession: &str, slot: &Arc<ArchiveSlot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.peek(accession).is_some_and(|x| Arc::ptr_eq(x, slot)) {
            slots.pop(accession);
        }
    }

    fn evict(slots: &mut LruCache<String, Arc<ArchiveSlot>>, capacity: usize) {
        while slots.len() > capacity {
            let victim = slots.iter().rev().find(|(_, slot)| ArchiveSlot::is_idle(slot)).map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    log::debug!("Closing archive {}", key);
                    slots.pop(&key);
                },
                None => break,
            }
        }
    }
}

//-----------------------------------------------------------------------------

/// Returns an error if two archives both claim the identifier.
pub(crate) fn conflict(id: &str, first: &ArchiveLock, second: &ArchiveLock) -> LoaderError {
    LoaderError::ConflictingResolution {
        id: id.to_string(),
        first: first.name().to_string(),
        second: second.name().to_string(),
    }
}

//-----------------------------------------------------------------------------
