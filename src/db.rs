//! cSRA-base: a read-only SQLite archive of reference sequences, reads, and their alignments.
//!
//! The archive stores the following tables:
//!
//! * `Tags`: header information as key-value pairs.
//! * `RefSeqs`: one row per reference sequence.
//! * `RefSeqRows`: reference sequences split into fixed-size rows, with the number of alignments starting in each row and the maximum coverage within it.
//! * `Spots`: one row per spot (sequenced fragment), with its name and spot group.
//! * `Reads`: the reads of each spot with their quality scores.
//! * `Alignments`: primary alignments of the reads, indexed by reference position and by read.
//!
//! Archives are created with [`ArchiveBuilder`] and accessed through [`CsraDb`] and [`ArchiveCursor`].

use crate::{LoaderError, Result};
use crate::utils::{self, CancelToken};

use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::fs;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Params, Row};

pub mod builder;

pub use builder::{ArchiveBuilder, NewAlignment};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// An open cSRA-base archive.
///
/// The archive keeps a pool of read-only database connections.
/// Queries go through an [`ArchiveCursor`], which checks out a connection from the pool and returns it when dropped.
/// Concurrent users of the same archive therefore never share a connection.
///
/// # Examples
///
/// ```
/// use csra_base::{ArchiveBuilder, CsraDb, NewAlignment};
///
/// let dir = tempfile::tempdir().unwrap();
/// let db_file = dir.path().join("SRR1");
///
/// let mut builder = ArchiveBuilder::new(100);
/// builder.add_reference("chr1", Some("NC_000001.10"), b"ACGTACGTAC", false).unwrap();
/// let spot = builder.add_spot("read1", "");
/// builder.add_read(spot, 1, b"GTAC", b"").unwrap();
/// let alignment = NewAlignment::new("chr1", 2, spot, 1, "4M");
/// builder.add_alignment(&alignment).unwrap();
/// builder.create(&db_file).unwrap();
///
/// let db = CsraDb::open(&db_file).unwrap();
/// assert_eq!(db.name(), "SRR1");
/// assert_eq!(db.references(), 1);
/// assert_eq!(db.alignments(), 1);
/// let mut cursor = db.cursor().unwrap();
/// let refs = cursor.references().unwrap();
/// assert_eq!(refs[0].seq_id.as_deref(), Some("NC_000001.10"));
/// ```
#[derive(Debug)]
pub struct CsraDb {
    path: PathBuf,
    name: String,
    version: String,
    row_size: usize,
    references: usize,
    spots: usize,
    alignments: usize,
    pool: Mutex<Vec<Connection>>,
}

/// Using the database.
impl CsraDb {
    // Key for database version.
    pub(crate) const KEY_VERSION: &'static str = "version";

    /// Current database version.
    pub const VERSION: &'static str = "cSRA-base v1";

    // Key for reference row size.
    pub(crate) const KEY_ROW_SIZE: &'static str = "row_size";

    // Key for reference count.
    pub(crate) const KEY_REFERENCES: &'static str = "references";

    // Key for spot count.
    pub(crate) const KEY_SPOTS: &'static str = "spots";

    // Key for alignment count.
    pub(crate) const KEY_ALIGNMENTS: &'static str = "alignments";

    /// Default number of bases in a reference row.
    pub const ROW_SIZE: usize = 5000;

    // Maximum number of idle connections kept in the pool.
    const MAX_IDLE_CONNECTIONS: usize = 16;

    /// Opens the archive in the given file.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::NotFound`] if the file does not exist or cannot be read.
    /// Returns [`LoaderError::ArchiveOpenFailure`] if the file is not a supported archive.
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let path = filename.as_ref().to_path_buf();
        if let Err(err) = fs::File::open(&path) {
            return match err.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Err(LoaderError::NotFound(path.display().to_string())),
                _ => Err(Self::open_failure(&path, err.to_string())),
            };
        }

        let connection = Self::connect(&path)?;
        let get_tag = |key: &str| -> Result<String> {
            let value: Option<String> = connection.query_row(
                "SELECT value FROM Tags WHERE key = ?1",
                (key,),
                |row| row.get(0)
            ).optional().map_err(|x| Self::open_failure(&path, x.to_string()))?;
            value.ok_or_else(|| Self::open_failure(&path, format!("Key not found: {}", key)))
        };
        let get_number = |key: &str| -> Result<usize> {
            let value = get_tag(key)?;
            value.parse::<usize>().map_err(|x| Self::open_failure(&path, format!("Invalid value for key {}: {}", key, x)))
        };

        let version = get_tag(Self::KEY_VERSION)?;
        if version != Self::VERSION {
            return Err(Self::open_failure(&path, format!("Unsupported database version: {} (expected {})", version, Self::VERSION)));
        }
        let row_size = get_number(Self::KEY_ROW_SIZE)?;
        if row_size == 0 {
            return Err(Self::open_failure(&path, String::from("Row size cannot be 0")));
        }
        let references = get_number(Self::KEY_REFERENCES)?;
        let spots = get_number(Self::KEY_SPOTS)?;
        let alignments = get_number(Self::KEY_ALIGNMENTS)?;

        let name = path.file_name().map(|x| x.to_string_lossy().to_string()).unwrap_or_default();
        log::info!("Opened archive {} with {} references, {} spots, and {} alignments", path.display(), references, spots, alignments);
        Ok(CsraDb {
            path, name, version,
            row_size, references, spots, alignments,
            pool: Mutex::new(vec![connection]),
        })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Connection::open_with_flags(path, flags).map_err(|x| Self::open_failure(path, x.to_string()))
    }

    fn open_failure(path: &Path, message: String) -> LoaderError {
        LoaderError::ArchiveOpenFailure { path: path.to_path_buf(), message }
    }

    /// Returns a cursor for querying the archive.
    ///
    /// Reuses an idle connection if possible.
    pub fn cursor(&self) -> Result<ArchiveCursor<'_>> {
        let idle = self.pool.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let connection = match idle {
            Some(connection) => connection,
            None => Self::connect(&self.path)?,
        };
        Ok(ArchiveCursor { db: self, connection: Some(connection) })
    }

    fn release(&self, connection: Connection) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < Self::MAX_IDLE_CONNECTIONS {
            pool.push(connection);
        }
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the name of the archive (the file name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the size of the database file in a human-readable format.
    pub fn file_size(&self) -> Option<String> {
        utils::file_size(&self.path)
    }

    /// Returns the version of the database.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the number of bases in a reference row.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Returns the number of reference sequences.
    pub fn references(&self) -> usize {
        self.references
    }

    /// Returns the number of spots.
    pub fn spots(&self) -> usize {
        self.spots
    }

    /// Returns the number of alignments.
    pub fn alignments(&self) -> usize {
        self.alignments
    }
}

//-----------------------------------------------------------------------------

/// A reference sequence stored in the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceRecord {
    /// Handle of the reference in the archive.
    pub handle: usize,
    /// Name of the reference in the archive.
    pub name: String,
    /// External sequence identifier, if known.
    pub seq_id: Option<String>,
    /// Length of the reference.
    pub length: usize,
    /// Is the reference circular.
    pub circular: bool,
    /// Length of the longest alignment on the reference.
    pub max_align_len: usize,
}

/// A primary alignment stored in the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignmentRow {
    /// Alignment identifier.
    pub id: usize,
    /// Handle of the reference.
    pub ref_handle: usize,
    /// 0-based starting position on the reference.
    pub ref_pos: usize,
    /// Number of reference bases covered by the alignment.
    pub ref_len: usize,
    /// Is the read aligned in reverse orientation.
    pub reverse: bool,
    /// Mapping quality.
    pub map_quality: u8,
    /// Spot identifier.
    pub spot_id: u64,
    /// Read identifier within the spot.
    pub read_id: u32,
    /// Spot group of the read.
    pub spot_group: String,
    /// Alignment operations as a CIGAR string.
    pub cigar: String,
    /// The read with `=` at positions matching the reference.
    pub mismatch: Vec<u8>,
}

impl AlignmentRow {
    /// Returns the reference interval covered by the alignment.
    pub fn ref_range(&self) -> Range<usize> {
        self.ref_pos..self.ref_pos + self.ref_len
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AlignmentRow {
            id: row.get(0)?,
            ref_handle: row.get(1)?,
            ref_pos: row.get(2)?,
            ref_len: row.get(3)?,
            reverse: row.get(4)?,
            map_quality: row.get(5)?,
            spot_id: row.get(6)?,
            read_id: row.get(7)?,
            spot_group: row.get(8)?,
            cigar: row.get(9)?,
            mismatch: row.get(10)?,
        })
    }
}

/// A read stored in the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRecord {
    /// Read identifier within the spot.
    pub read_id: u32,
    /// Bases of the read.
    pub sequence: Vec<u8>,
    /// Phred quality scores, or an empty vector if missing.
    pub quality: Vec<u8>,
}

/// A spot and its reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpotRecord {
    /// Spot identifier.
    pub spot_id: u64,
    /// Name of the spot.
    pub name: String,
    /// Spot group.
    pub spot_group: String,
    /// Reads in the spot, in order by read id.
    pub reads: Vec<ReadRecord>,
}

//-----------------------------------------------------------------------------

/// A query interface to an archive using a pooled connection.
///
/// The connection is returned to the pool when the cursor is dropped.
/// Statements are cached on the connection, so a cursor that is reused for many queries of the same kind avoids repeated parsing.
pub struct ArchiveCursor<'a> {
    db: &'a CsraDb,
    connection: Option<Connection>,
}

const ALIGNMENT_COLUMNS: &str = "id, ref_handle, ref_pos, ref_len, reverse, map_quality, spot_id, read_id, spot_group, cigar, mismatch";

impl<'a> ArchiveCursor<'a> {
    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or_else(|| LoaderError::NotFound(String::from("database connection")))
    }

    /// Returns the archive this cursor belongs to.
    pub fn db(&self) -> &'a CsraDb {
        self.db
    }

    /// Returns all reference sequences in order by handle.
    pub fn references(&mut self) -> Result<Vec<ReferenceRecord>> {
        let mut statement = self.connection()?.prepare_cached(
            "SELECT handle, name, seq_id, length, circular, max_align_len FROM RefSeqs ORDER BY handle"
        )?;
        let rows = statement.query_map((), |row| {
            Ok(ReferenceRecord {
                handle: row.get(0)?,
                name: row.get(1)?,
                seq_id: row.get(2)?,
                length: row.get(3)?,
                circular: row.get(4)?,
                max_align_len: row.get(5)?,
            })
        })?;
        let result = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(result)
    }

    /// Returns the spot groups with their spot counts, in order by name.
    ///
    /// Only groups with at least one spot are reported.
    pub fn spot_groups(&mut self) -> Result<Vec<(String, usize)>> {
        let mut statement = self.connection()?.prepare_cached(
            "SELECT spot_group, COUNT(*) FROM Spots GROUP BY spot_group ORDER BY spot_group"
        )?;
        let rows = statement.query_map((), |row| Ok((row.get(0)?, row.get(1)?)))?;
        let result = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(result)
    }

    /// Returns the number of alignments starting in the given reference row.
    pub fn row_align_count(&mut self, ref_handle: usize, row: usize) -> Result<usize> {
        let mut statement = self.connection()?.prepare_cached(
            "SELECT align_count FROM RefSeqRows WHERE ref_handle = ?1 AND row = ?2"
        )?;
        let count: Option<usize> = statement.query_row((ref_handle, row), |row| row.get(0)).optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Counts the alignments on the reference, stopping at `limit`.
    pub fn probe_alignments(&mut self, ref_handle: usize, limit: usize) -> Result<usize> {
        let mut statement = self.connection()?.prepare_cached(
            "SELECT COUNT(*) FROM (SELECT 1 FROM Alignments WHERE ref_handle = ?1 LIMIT ?2)"
        )?;
        let count: usize = statement.query_row((ref_handle, limit), |row| row.get(0))?;
        Ok(count)
    }

    /// Returns the maximum coverage in each row of the reference.
    pub fn coverage_rows(&mut self, ref_handle: usize) -> Result<Vec<u8>> {
        let mut statement = self.connection()?.prepare_cached(
            "SELECT coverage FROM RefSeqRows WHERE ref_handle = ?1 ORDER BY row"
        )?;
        let rows = statement.query_map((ref_handle,), |row| row.get::<_, u8>(0))?;
        let result = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(result)
    }

    /// Returns the alignments starting in the given interval with at least the given mapping quality, in order by position.
    pub fn alignments_by_start(&mut self, ref_handle: usize, range: Range<usize>, min_quality: u8) -> Result<Vec<AlignmentRow>> {
        let mut result = Vec::new();
        self.for_each_alignment_by_start(ref_handle, range, min_quality, &CancelToken::new(), &mut |row| {
            result.push(row);
            Ok(())
        })?;
        Ok(result)
    }

    /// Calls `visit` for each alignment starting in the given interval with at least the given mapping quality, in order by position.
    ///
    /// Rows are read one at a time, and the token is polled every [`CancelToken::POLL_INTERVAL`] rows.
    /// Returns the number of alignments visited.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::Cancelled`] if the token was cancelled.
    /// Passes through errors from `visit` and the database.
    pub fn for_each_alignment_by_start(
        &mut self, ref_handle: usize, range: Range<usize>, min_quality: u8,
        cancel: &CancelToken, visit: &mut dyn FnMut(AlignmentRow) -> Result<()>
    ) -> Result<usize> {
        let sql = format!(
            "SELECT {} FROM Alignments
            WHERE ref_handle = ?1 AND ref_pos >= ?2 AND ref_pos < ?3 AND map_quality >= ?4
            ORDER BY ref_pos, id",
            ALIGNMENT_COLUMNS
        );
        self.visit_alignments(&sql, (ref_handle, range.start, range.end, min_quality), cancel, visit)
    }

    /// Returns the alignments overlapping the given interval with at least the given mapping quality, in order by position.
    ///
    /// `max_align_len` must be at least the length of the longest alignment on the reference.
    pub fn alignments_overlapping(&mut self, ref_handle: usize, range: Range<usize>, max_align_len: usize, min_quality: u8) -> Result<Vec<AlignmentRow>> {
        let mut result = Vec::new();
        self.for_each_alignment_overlapping(ref_handle, range, max_align_len, min_quality, &CancelToken::new(), &mut |row| {
            result.push(row);
            Ok(())
        })?;
        Ok(result)
    }

    /// Calls `visit` for each alignment overlapping the given interval with at least the given mapping quality, in order by position.
    ///
    /// `max_align_len` must be at least the length of the longest alignment on the reference.
    /// Cancellation works as in [`Self::for_each_alignment_by_start`].
    pub fn for_each_alignment_overlapping(
        &mut self, ref_handle: usize, range: Range<usize>, max_align_len: usize, min_quality: u8,
        cancel: &CancelToken, visit: &mut dyn FnMut(AlignmentRow) -> Result<()>
    ) -> Result<usize> {
        let sql = format!(
            "SELECT {} FROM Alignments
            WHERE ref_handle = ?1 AND ref_pos >= ?2 AND ref_pos < ?3 AND ref_pos + ref_len > ?4 AND map_quality >= ?5
            ORDER BY ref_pos, id",
            ALIGNMENT_COLUMNS
        );
        let first = range.start.saturating_sub(max_align_len);
        self.visit_alignments(&sql, (ref_handle, first, range.end, range.start, min_quality), cancel, visit)
    }

    fn visit_alignments<P: Params>(
        &mut self, sql: &str, params: P, cancel: &CancelToken, visit: &mut dyn FnMut(AlignmentRow) -> Result<()>
    ) -> Result<usize> {
        let mut statement = self.connection()?.prepare_cached(sql)?;
        let mut rows = statement.query(params)?;
        let mut processed = 0;
        while let Some(row) = rows.next()? {
            visit(AlignmentRow::from_row(row)?)?;
            processed += 1;
            cancel.poll(processed)?;
        }
        Ok(processed)
    }

    /// Returns the furthest end position of an alignment starting in the given interval.
    pub fn alignment_end(&mut self, ref_handle: usize, range: Range<usize>) -> Result<Option<usize>> {
        let mut statement = self.connection()?.prepare_cached(
            "SELECT MAX(ref_pos + ref_len) FROM Alignments WHERE ref_handle = ?1 AND ref_pos >= ?2 AND ref_pos < ?3"
        )?;
        let end: Option<usize> = statement.query_row((ref_handle, range.start, range.end), |row| row.get(0))?;
        Ok(end)
    }

    /// Returns the reference bases in the given interval.
    ///
    /// The interval is clamped to the stored rows.
    pub fn ref_sequence(&mut self, ref_handle: usize, range: Range<usize>) -> Result<Vec<u8>> {
        let row_size = self.db.row_size();
        let mut result = Vec::with_capacity(range.len());
        if range.is_empty() {
            return Ok(result);
        }
        let first_row = range.start / row_size;
        let last_row = (range.end - 1) / row_size;
        let mut statement = self.connection()?.prepare_cached(
            "SELECT row, sequence FROM RefSeqRows WHERE ref_handle = ?1 AND row >= ?2 AND row <= ?3 ORDER BY row"
        )?;
        let mut rows = statement.query((ref_handle, first_row, last_row))?;
        while let Some(row) = rows.next()? {
            let row_id: usize = row.get(0)?;
            let encoded: Vec<u8> = row.get(1)?;
            let sequence = utils::decode_sequence(&encoded);
            let row_start = row_id * row_size;
            let from = range.start.saturating_sub(row_start).min(sequence.len());
            let to = (range.end - row_start).min(sequence.len());
            result.extend_from_slice(&sequence[from..to]);
        }
        Ok(result)
    }

    /// Returns the spots in the given interval of spot ids, with their reads.
    pub fn spots(&mut self, spot_ids: Range<u64>) -> Result<Vec<SpotRecord>> {
        let connection = self.connection()?;
        let mut get_spots = connection.prepare_cached(
            "SELECT spot_id, name, spot_group FROM Spots WHERE spot_id >= ?1 AND spot_id < ?2 ORDER BY spot_id"
        )?;
        let rows = get_spots.query_map((spot_ids.start, spot_ids.end), |row| {
            Ok(SpotRecord { spot_id: row.get(0)?, name: row.get(1)?, spot_group: row.get(2)?, reads: Vec::new() })
        })?;
        let mut result = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        let mut get_reads = connection.prepare_cached(
            "SELECT read_id, sequence, quality FROM Reads WHERE spot_id = ?1 ORDER BY read_id"
        )?;
        for spot in result.iter_mut() {
            let rows = get_reads.query_map((spot.spot_id,), |row| {
                let encoded: Vec<u8> = row.get(1)?;
                Ok(ReadRecord { read_id: row.get(0)?, sequence: utils::decode_sequence(&encoded), quality: row.get(2)? })
            })?;
            spot.reads = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        }
        Ok(result)
    }

    /// Returns `true` if the archive contains the given read.
    pub fn read_exists(&mut self, spot_id: u64, read_id: u32) -> Result<bool> {
        let mut statement = self.connection()?.prepare_cached(
            "SELECT 1 FROM Reads WHERE spot_id = ?1 AND read_id = ?2"
        )?;
        let found: Option<i64> = statement.query_row((spot_id, read_id), |row| row.get(0)).optional()?;
        Ok(found.is_some())
    }

    /// Returns the primary alignment of the read, or [`None`] if the read is unaligned.
    pub fn primary_alignment(&mut self, spot_id: u64, read_id: u32) -> Result<Option<AlignmentRow>> {
        let sql = format!("SELECT {} FROM Alignments WHERE spot_id = ?1 AND read_id = ?2", ALIGNMENT_COLUMNS);
        let mut statement = self.connection()?.prepare_cached(&sql)?;
        let result = statement.query_row((spot_id, read_id), AlignmentRow::from_row).optional()?;
        Ok(result)
    }
}

impl<'a> Drop for ArchiveCursor<'a> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.db.release(connection);
        }
    }
}

//-----------------------------------------------------------------------------

/// Type of a potential database file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseFileType {
    /// The file does not exist.
    Missing,
    /// The file is not a valid SQLite database.
    NotDatabase,
    /// The file is an unknown SQLite database.
    UnknownDatabase,
    /// The file is a known SQLite database with the given version string.
    Version(String),
}

/// Determines the type of the given file, which may be a SQLite database.
pub fn identify_database<P: AsRef<Path>>(filename: P) -> DatabaseFileType {
    let metadata = match fs::metadata(&filename) {
        Ok(metadata) => metadata,
        Err(_) => return DatabaseFileType::Missing,
    };
    if !metadata.is_file() {
        return DatabaseFileType::NotDatabase;
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = match Connection::open_with_flags(filename, flags) {
        Ok(connection) => connection,
        Err(_) => return DatabaseFileType::NotDatabase,
    };
    let version: rusqlite::Result<String> = connection.query_row(
        "SELECT value FROM Tags WHERE key = 'version'", [], |row| row.get(0)
    );
    match version {
        Ok(version) => DatabaseFileType::Version(version),
        Err(_) => DatabaseFileType::UnknownDatabase,
    }
}

//-----------------------------------------------------------------------------
