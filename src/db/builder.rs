//! Building cSRA-base archives.

use super::CsraDb;

use crate::{LoaderError, Result};
use crate::formats::{self, CigarOp, SamRecord};
use crate::utils;

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use rusqlite::Connection;

//-----------------------------------------------------------------------------

/// A new alignment to be added to an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAlignment<'a> {
    /// Name of the reference.
    pub reference: &'a str,
    /// 0-based starting position on the reference.
    pub ref_pos: usize,
    /// Spot identifier.
    pub spot_id: u64,
    /// Read identifier within the spot.
    pub read_id: u32,
    /// Alignment operations as a CIGAR string.
    pub cigar: &'a str,
    /// Mapping quality.
    pub map_quality: u8,
    /// Is the read aligned in reverse orientation.
    pub reverse: bool,
}

impl<'a> NewAlignment<'a> {
    /// Creates a forward alignment with mapping quality 60.
    pub fn new(reference: &'a str, ref_pos: usize, spot_id: u64, read_id: u32, cigar: &'a str) -> Self {
        NewAlignment { reference, ref_pos, spot_id, read_id, cigar, map_quality: 60, reverse: false }
    }

    /// Returns a copy with the given mapping quality.
    pub fn with_quality(mut self, map_quality: u8) -> Self {
        self.map_quality = map_quality;
        self
    }

    /// Returns a copy with the given orientation.
    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

#[derive(Debug)]
struct ReferenceInput {
    name: String,
    seq_id: Option<String>,
    sequence: Vec<u8>,
    circular: bool,
}

#[derive(Debug)]
struct SpotInput {
    name: String,
    spot_group: String,
    reads: Vec<(u32, Vec<u8>, Vec<u8>)>,
}

#[derive(Debug)]
struct AlignmentInput {
    ref_handle: usize,
    ref_pos: usize,
    ref_len: usize,
    reverse: bool,
    map_quality: u8,
    spot_id: u64,
    read_id: u32,
    cigar: String,
    mismatch: Vec<u8>,
}

//-----------------------------------------------------------------------------

/// A builder for cSRA-base archives.
///
/// References, spots, reads, and alignments are collected in memory and validated as they are added.
/// The archive is written with [`ArchiveBuilder::create`].
/// Spot ids are assigned sequentially starting from 1.
#[derive(Debug)]
pub struct ArchiveBuilder {
    row_size: usize,
    references: Vec<ReferenceInput>,
    ref_names: HashMap<String, usize>,
    spots: Vec<SpotInput>,
    alignments: Vec<AlignmentInput>,
    aligned_reads: HashSet<(u64, u32)>,
}

impl ArchiveBuilder {
    /// Creates an empty builder with the given reference row size.
    ///
    /// # Panics
    ///
    /// Panics if `row_size` is 0.
    pub fn new(row_size: usize) -> Self {
        assert!(row_size > 0, "Row size must be positive");
        ArchiveBuilder {
            row_size,
            references: Vec::new(),
            ref_names: HashMap::new(),
            spots: Vec::new(),
            alignments: Vec::new(),
            aligned_reads: HashSet::new(),
        }
    }

    /// Returns the number of spots added so far.
    pub fn spots(&self) -> usize {
        self.spots.len()
    }

    /// Returns the number of alignments added so far.
    pub fn alignments(&self) -> usize {
        self.alignments.len()
    }

    /// Adds a reference sequence and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference with the same name already exists.
    pub fn add_reference(&mut self, name: &str, seq_id: Option<&str>, sequence: &[u8], circular: bool) -> Result<usize> {
        if self.ref_names.contains_key(name) {
            return Err(LoaderError::InvalidInput(format!("Duplicate reference {}", name)));
        }
        let handle = self.references.len();
        self.references.push(ReferenceInput {
            name: name.to_string(),
            seq_id: seq_id.map(|x| x.to_string()),
            sequence: sequence.to_vec(),
            circular,
        });
        self.ref_names.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Adds a spot without reads and returns its identifier.
    pub fn add_spot(&mut self, name: &str, spot_group: &str) -> u64 {
        self.spots.push(SpotInput { name: name.to_string(), spot_group: spot_group.to_string(), reads: Vec::new() });
        self.spots.len() as u64
    }

    fn spot_mut(&mut self, spot_id: u64) -> Result<&mut SpotInput> {
        let index = (spot_id as usize).checked_sub(1);
        index.and_then(|i| self.spots.get_mut(i)).ok_or_else(|| LoaderError::InvalidInput(format!("No spot {}", spot_id)))
    }

    /// Adds a read to a spot.
    ///
    /// `quality` contains Phred scores; it may be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the spot does not exist, the read already exists, the read id is invalid, or the quality length does not match the sequence.
    pub fn add_read(&mut self, spot_id: u64, read_id: u32, sequence: &[u8], quality: &[u8]) -> Result<()> {
        if read_id == 0 || read_id > crate::ReadId::MAX_READ_ID {
            return Err(LoaderError::InvalidInput(format!("Invalid read id {}", read_id)));
        }
        if !quality.is_empty() && quality.len() != sequence.len() {
            return Err(LoaderError::InvalidInput(format!("Read {}.{}: quality length {} does not match sequence length {}", spot_id, read_id, quality.len(), sequence.len())));
        }
        let spot = self.spot_mut(spot_id)?;
        if spot.reads.iter().any(|(id, _, _)| *id == read_id) {
            return Err(LoaderError::InvalidInput(format!("Duplicate read {}.{}", spot_id, read_id)));
        }
        spot.reads.push((read_id, sequence.to_vec(), quality.to_vec()));
        spot.reads.sort_by_key(|(id, _, _)| *id);
        Ok(())
    }

    /// Adds the primary alignment of a read.
    ///
    /// Computes the mismatch string from the read and the reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference or the read does not exist, the read already has an alignment, the CIGAR string is invalid or inconsistent with the read length, or the alignment extends past the end of the reference.
    pub fn add_alignment(&mut self, alignment: &NewAlignment) -> Result<()> {
        let ref_handle = *self.ref_names.get(alignment.reference).ok_or_else(|| {
            LoaderError::InvalidInput(format!("No reference {}", alignment.reference))
        })?;
        let key = (alignment.spot_id, alignment.read_id);
        if self.aligned_reads.contains(&key) {
            return Err(LoaderError::InvalidInput(format!("Read {}.{} already has a primary alignment", key.0, key.1)));
        }
        let spot_index = (alignment.spot_id as usize).checked_sub(1);
        let spot = spot_index.and_then(|i| self.spots.get(i)).ok_or_else(|| {
            LoaderError::InvalidInput(format!("No spot {}", alignment.spot_id))
        })?;
        let read = spot.reads.iter().find(|(id, _, _)| *id == alignment.read_id).ok_or_else(|| {
            LoaderError::InvalidInput(format!("No read {}.{}", alignment.spot_id, alignment.read_id))
        })?;

        let ops = formats::parse_cigar(alignment.cigar.as_bytes())?;
        if ops.is_empty() {
            return Err(LoaderError::InvalidCigar(alignment.cigar.to_string()));
        }
        let too_long = || LoaderError::InvalidCigar(format!("{} is too long", alignment.cigar));
        let read_len = formats::cigar_read_len(&ops).ok_or_else(too_long)?;
        if read_len != read.1.len() {
            return Err(LoaderError::InvalidCigar(format!("{} covers {} bases of a read of length {}", alignment.cigar, read_len, read.1.len())));
        }
        let ref_len = formats::cigar_ref_len(&ops).ok_or_else(too_long)?;
        let reference = &self.references[ref_handle].sequence;
        let ref_end = alignment.ref_pos.checked_add(ref_len).ok_or_else(too_long)?;
        if ref_end > reference.len() {
            return Err(LoaderError::InvalidInput(format!(
                "Alignment of {}.{} to {}:{}-{} extends past the end of the reference",
                alignment.spot_id, alignment.read_id, alignment.reference, alignment.ref_pos, ref_end
            )));
        }
        let mismatch = mismatch_string(&ops, &read.1, &reference[alignment.ref_pos..]);

        self.alignments.push(AlignmentInput {
            ref_handle,
            ref_pos: alignment.ref_pos,
            ref_len,
            reverse: alignment.reverse,
            map_quality: alignment.map_quality,
            spot_id: alignment.spot_id,
            read_id: alignment.read_id,
            cigar: formats::cigar_to_string(&ops),
            mismatch,
        });
        self.aligned_reads.insert(key);
        Ok(())
    }

    /// Builds an archive from SAM and FASTA inputs.
    ///
    /// Each query name becomes a spot, and the read group becomes its spot group.
    /// Reads are taken from primary alignment lines; secondary and supplementary alignments are skipped.
    /// Unmapped reads are stored without alignments.
    ///
    /// # Errors
    ///
    /// Passes through parsing errors with line numbers and validation errors from the builder.
    pub fn import_sam<R: BufRead, F: BufRead>(sam: &mut R, fasta: &mut F, row_size: usize) -> Result<Self> {
        let mut builder = ArchiveBuilder::new(row_size);
        for record in formats::read_fasta(fasta)? {
            builder.add_reference(&record.name, None, &record.sequence, false)?;
        }
        eprintln!("Read {} reference sequences", builder.references.len());

        let mut spot_ids: HashMap<String, u64> = HashMap::new();
        let mut skipped = 0;
        let mut line_num = 0;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            buf.clear();
            let len = sam.read_until(b'\n', &mut buf)?;
            if len == 0 {
                break;
            }
            line_num += 1;
            while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.is_empty() || formats::is_sam_header_line(&buf) {
                continue;
            }
            let record = SamRecord::parse(&buf).map_err(|err| {
                LoaderError::InvalidInput(format!("SAM line {}: {}", line_num, err))
            })?;
            if !record.is_primary() {
                skipped += 1;
                continue;
            }

            let spot_id = match spot_ids.get(&record.name) {
                Some(id) => *id,
                None => {
                    let id = builder.add_spot(&record.name, &record.read_group());
                    spot_ids.insert(record.name.clone(), id);
                    id
                },
            };
            let read_id = record.read_id();
            builder.add_read(spot_id, read_id, &record.sequence, &record.quality)?;
            if !record.is_unmapped() {
                // Checked by `is_unmapped`.
                let (reference, ref_pos) = match (&record.ref_name, record.ref_pos) {
                    (Some(name), Some(pos)) => (name.as_str(), pos),
                    _ => continue,
                };
                let cigar = formats::cigar_to_string(&record.cigar);
                let alignment = NewAlignment::new(reference, ref_pos, spot_id, read_id, &cigar)
                    .with_quality(record.map_quality)
                    .with_reverse(record.is_reverse());
                builder.add_alignment(&alignment).map_err(|err| {
                    LoaderError::InvalidInput(format!("SAM line {}: {}", line_num, err))
                })?;
            }
        }
        eprintln!("Read {} spots with {} alignments; skipped {} secondary alignments", builder.spots.len(), builder.alignments.len(), skipped);

        Ok(builder)
    }
}

// Returns the read with `=` at aligned positions matching the reference.
fn mismatch_string(ops: &[CigarOp], read: &[u8], reference: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(read.len());
    let mut read_pos = 0;
    let mut ref_pos = 0;
    for op in ops.iter() {
        match op {
            CigarOp::Match(len) | CigarOp::Equal(len) | CigarOp::Mismatch(len) => {
                for i in 0..*len {
                    let base = read[read_pos + i];
                    if utils::same_base(base, reference[ref_pos + i]) {
                        result.push(b'=');
                    } else {
                        result.push(base.to_ascii_uppercase());
                    }
                }
                read_pos += len;
                ref_pos += len;
            },
            CigarOp::Insertion(len) | CigarOp::SoftClip(len) => {
                result.extend(read[read_pos..read_pos + len].iter().map(|c| c.to_ascii_uppercase()));
                read_pos += len;
            },
            CigarOp::Deletion(len) | CigarOp::Skip(len) => {
                ref_pos += len;
            },
            CigarOp::HardClip(_) | CigarOp::Padding(_) => {},
        }
    }
    result
}

//-----------------------------------------------------------------------------

/// Creating the database.
impl ArchiveBuilder {
    /// Writes the archive to the given file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database already exists.
    /// Passes through any database errors.
    pub fn create<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        log::info!("Creating archive {}", filename.as_ref().display());
        if utils::file_exists(&filename) {
            return Err(LoaderError::InvalidInput(format!("Database {} already exists", filename.as_ref().display())));
        }

        let mut connection = Connection::open(filename)?;
        self.insert_tags(&mut connection)?;
        self.insert_references(&mut connection)?;
        self.insert_spots(&mut connection)?;
        self.insert_alignments(&mut connection)?;
        Ok(())
    }

    fn insert_tags(&self, connection: &mut Connection) -> rusqlite::Result<()> {
        connection.execute(
            "CREATE TABLE Tags (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) STRICT",
            (),
        )?;

        let transaction = connection.transaction()?;
        {
            let mut insert = transaction.prepare(
                "INSERT INTO Tags(key, value) VALUES (?1, ?2)"
            )?;
            insert.execute((CsraDb::KEY_VERSION, CsraDb::VERSION))?;
            insert.execute((CsraDb::KEY_ROW_SIZE, self.row_size.to_string()))?;
            insert.execute((CsraDb::KEY_REFERENCES, self.references.len().to_string()))?;
            insert.execute((CsraDb::KEY_SPOTS, self.spots.len().to_string()))?;
            insert.execute((CsraDb::KEY_ALIGNMENTS, self.alignments.len().to_string()))?;
        }
        transaction.commit()
    }

    fn insert_references(&self, connection: &mut Connection) -> rusqlite::Result<()> {
        connection.execute(
            "CREATE TABLE RefSeqs (
                handle INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                seq_id TEXT,
                length INTEGER NOT NULL,
                circular INTEGER NOT NULL,
                max_align_len INTEGER NOT NULL
            ) STRICT",
            (),
        )?;
        connection.execute(
            "CREATE TABLE RefSeqRows (
                ref_handle INTEGER NOT NULL,
                row INTEGER NOT NULL,
                sequence BLOB NOT NULL,
                coverage INTEGER NOT NULL,
                align_count INTEGER NOT NULL,
                PRIMARY KEY (ref_handle, row)
            ) STRICT",
            (),
        )?;

        let mut inserted = 0;
        let transaction = connection.transaction()?;
        {
            let mut insert_ref = transaction.prepare(
                "INSERT INTO RefSeqs(handle, name, seq_id, length, circular, max_align_len)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            )?;
            let mut insert_row = transaction.prepare(
                "INSERT INTO RefSeqRows(ref_handle, row, sequence, coverage, align_count)
                VALUES (?1, ?2, ?3, ?4, ?5)"
            )?;
            for (handle, reference) in self.references.iter().enumerate() {
                let length = reference.sequence.len();
                let rows = length.div_ceil(self.row_size);
                let mut align_counts = vec![0usize; rows];
                let mut depth = vec![0isize; length + 1];
                let mut max_align_len = 0;
                for alignment in self.alignments.iter().filter(|x| x.ref_handle == handle) {
                    align_counts[alignment.ref_pos / self.row_size] += 1;
                    depth[alignment.ref_pos] += 1;
                    depth[alignment.ref_pos + alignment.ref_len] -= 1;
                    max_align_len = max_align_len.max(alignment.ref_len);
                }

                insert_ref.execute((handle, &reference.name, &reference.seq_id, length, reference.circular, max_align_len))?;
                let mut current: isize = 0;
                for row in 0..rows {
                    let range = row * self.row_size..length.min((row + 1) * self.row_size);
                    let mut coverage = 0;
                    for delta in depth[range.clone()].iter() {
                        current += delta;
                        coverage = coverage.max(current);
                    }
                    let coverage = coverage.min(u8::MAX as isize) as u8;
                    let encoded = utils::encode_sequence(&reference.sequence[range]);
                    insert_row.execute((handle, row, encoded, coverage, align_counts[row]))?;
                }
                inserted += 1;
            }
        }
        transaction.commit()?;

        eprintln!("Inserted {} reference sequences", inserted);
        Ok(())
    }

    fn insert_spots(&self, connection: &mut Connection) -> rusqlite::Result<()> {
        connection.execute(
            "CREATE TABLE Spots (
                spot_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                spot_group TEXT NOT NULL
            ) STRICT",
            (),
        )?;
        connection.execute(
            "CREATE TABLE Reads (
                spot_id INTEGER NOT NULL,
                read_id INTEGER NOT NULL,
                sequence BLOB NOT NULL,
                quality BLOB NOT NULL,
                PRIMARY KEY (spot_id, read_id)
            ) STRICT",
            (),
        )?;

        let mut inserted = 0;
        let transaction = connection.transaction()?;
        {
            let mut insert_spot = transaction.prepare(
                "INSERT INTO Spots(spot_id, name, spot_group) VALUES (?1, ?2, ?3)"
            )?;
            let mut insert_read = transaction.prepare(
                "INSERT INTO Reads(spot_id, read_id, sequence, quality) VALUES (?1, ?2, ?3, ?4)"
            )?;
            for (index, spot) in self.spots.iter().enumerate() {
                let spot_id = (index + 1) as u64;
                insert_spot.execute((spot_id, &spot.name, &spot.spot_group))?;
                for (read_id, sequence, quality) in spot.reads.iter() {
                    insert_read.execute((spot_id, read_id, utils::encode_sequence(sequence), quality))?;
                    inserted += 1;
                }
            }
        }
        transaction.commit()?;

        eprintln!("Inserted {} spots with {} reads", self.spots.len(), inserted);
        Ok(())
    }

    fn insert_alignments(&self, connection: &mut Connection) -> rusqlite::Result<()> {
        connection.execute(
            "CREATE TABLE Alignments (
                id INTEGER PRIMARY KEY,
                ref_handle INTEGER NOT NULL,
                ref_pos INTEGER NOT NULL,
                ref_len INTEGER NOT NULL,
                reverse INTEGER NOT NULL,
                map_quality INTEGER NOT NULL,
                spot_id INTEGER NOT NULL,
                read_id INTEGER NOT NULL,
                spot_group TEXT NOT NULL,
                cigar TEXT NOT NULL,
                mismatch BLOB NOT NULL
            ) STRICT",
            (),
        )?;

        // Alignment ids follow reference order.
        let mut order: Vec<usize> = (0..self.alignments.len()).collect();
        order.sort_by_key(|&i| {
            let x = &self.alignments[i];
            (x.ref_handle, x.ref_pos, x.spot_id, x.read_id)
        });

        let transaction = connection.transaction()?;
        {
            let mut insert = transaction.prepare(
                "INSERT INTO
                    Alignments(id, ref_handle, ref_pos, ref_len, reverse, map_quality, spot_id, read_id, spot_group, cigar, mismatch)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            )?;
            for (id, &index) in order.iter().enumerate() {
                let x = &self.alignments[index];
                let spot_group = &self.spots[(x.spot_id - 1) as usize].spot_group;
                insert.execute((
                    id + 1, x.ref_handle, x.ref_pos, x.ref_len, x.reverse, x.map_quality,
                    x.spot_id, x.read_id, spot_group, &x.cigar, &x.mismatch
                ))?;
            }
        }
        transaction.commit()?;

        connection.execute(
            "CREATE INDEX AlignmentStart ON Alignments(ref_handle, ref_pos)",
            (),
        )?;
        connection.execute(
            "CREATE INDEX AlignmentRead ON Alignments(spot_id, read_id)",
            (),
        )?;

        eprintln!("Inserted {} alignments", self.alignments.len());
        Ok(())
    }
}

//-----------------------------------------------------------------------------
