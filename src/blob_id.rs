//! Blob identifiers and external identifier parsing.
//!
//! A blob is an independently loadable unit of data derived from an archive.
//! Blob identifiers are opaque strings of the form `<kind><scheme><archive>|||<target>`, where:
//!
//! * `<kind>` is one of `annot|`, `refseq|`, `reads|`, and `align|` (see [`BlobKind`]);
//! * `<scheme>` is one of `gnl|` and `id|` (see [`IdScheme`]);
//! * `<archive>` is the archive name, which may contain `|`;
//! * `<target>` is a sequence identifier for annotation and reference sequence blobs, or a decimal spot id for read blobs.
//!
//! External identifiers come in two forms:
//!
//! * `<accession>/<label>` names a reference sequence by its label in the given archive (see [`parse_refseq_label`]);
//! * `<accession>.<spot>.<read>` names a single read (see [`ReadId`]).

use crate::{LoaderError, Result};

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;


//-----------------------------------------------------------------------------

/// Type of data stored in a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlobKind {
    /// Alignments and graphs on a reference sequence.
    Annotation,
    /// Reference sequence data.
    RefSeq,
    /// Short read sequences for a window of spots.
    Reads,
    /// Primary alignments for a window of spots.
    ReadsAlign,
}

impl BlobKind {
    /// Returns the prefix used for this kind in the string encoding.
    pub fn prefix(&self) -> &'static str {
        match self {
            BlobKind::Annotation => "annot|",
            BlobKind::RefSeq => "refseq|",
            BlobKind::Reads => "reads|",
            BlobKind::ReadsAlign => "align|",
        }
    }

    /// Returns `true` if the target of the blob is a spot id.
    pub fn is_reads(&self) -> bool {
        matches!(self, BlobKind::Reads | BlobKind::ReadsAlign)
    }

    const ALL: [BlobKind; 4] = [BlobKind::Annotation, BlobKind::RefSeq, BlobKind::Reads, BlobKind::ReadsAlign];

    fn strip_prefix(value: &str) -> Option<(Self, &str)> {
        Self::ALL.iter().find_map(|kind| value.strip_prefix(kind.prefix()).map(|rest| (*kind, rest)))
    }
}

/// How reference sequences in the blob are identified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdScheme {
    /// Identifiers of the form `<accession>/<label>` generated from the archive.
    General,
    /// Reference identifiers stored in the archive.
    SeqId,
}

impl IdScheme {
    /// Returns the prefix used for this scheme in the string encoding.
    pub fn prefix(&self) -> &'static str {
        match self {
            IdScheme::General => "gnl|",
            IdScheme::SeqId => "id|",
        }
    }

    fn strip_prefix(value: &str) -> Option<(Self, &str)> {
        [IdScheme::General, IdScheme::SeqId].iter().find_map(|scheme| {
            value.strip_prefix(scheme.prefix()).map(|rest| (*scheme, rest))
        })
    }
}

//-----------------------------------------------------------------------------

/// Target of a blob: a sequence identifier or the first spot id of a read window.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlobTarget {
    /// Reference sequence identifier.
    Sequence(String),
    /// First spot id in a window of reads.
    Spot(u64),
}

impl Display for BlobTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobTarget::Sequence(id) => write!(f, "{}", id),
            BlobTarget::Spot(spot) => write!(f, "{}", spot),
        }
    }
}

/// An opaque blob identifier.
///
/// Identifiers are ordered by archive name, id scheme, kind, and target.
/// Spot targets are ordered numerically.
///
/// # Examples
///
/// ```
/// use csra_base::blob_id::{BlobId, BlobKind, BlobTarget, IdScheme};
///
/// let id = BlobId::decode("annot|gnl|SRR1|||NC_000001.10").unwrap();
/// assert_eq!(id.kind(), BlobKind::Annotation);
/// assert_eq!(id.scheme(), IdScheme::General);
/// assert_eq!(id.archive(), "SRR1");
/// assert_eq!(id.target(), &BlobTarget::Sequence(String::from("NC_000001.10")));
/// assert_eq!(id.to_string(), "annot|gnl|SRR1|||NC_000001.10");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobId {
    kind: BlobKind,
    scheme: IdScheme,
    archive: String,
    target: BlobTarget,
}

impl BlobId {
    /// Separator between the archive name and the target.
    pub const SEPARATOR: &'static str = "|||";

    /// Creates an identifier for a reference sequence blob or an annotation blob.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is a read blob kind.
    pub fn for_sequence(kind: BlobKind, scheme: IdScheme, archive: &str, seq_id: &str) -> Self {
        assert!(!kind.is_reads(), "Blob kind {:?} requires a spot target", kind);
        BlobId { kind, scheme, archive: archive.to_string(), target: BlobTarget::Sequence(seq_id.to_string()) }
    }

    /// Creates an identifier for a read blob starting from the given spot.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is not a read blob kind.
    pub fn for_reads(kind: BlobKind, scheme: IdScheme, archive: &str, first_spot: u64) -> Self {
        assert!(kind.is_reads(), "Blob kind {:?} requires a sequence target", kind);
        BlobId { kind, scheme, archive: archive.to_string(), target: BlobTarget::Spot(first_spot) }
    }

    /// Returns the string encoding of the identifier.
    pub fn encode(&self) -> String {
        format!("{}{}{}{}{}", self.kind.prefix(), self.scheme.prefix(), self.archive, Self::SEPARATOR, self.target)
    }

    /// Decodes an identifier from its string encoding.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::MalformedBlobId`] if the kind or scheme prefix is unrecognized, the separator is missing, or the target of a read blob is not a spot id.
    pub fn decode(value: &str) -> Result<Self> {
        let malformed = || LoaderError::MalformedBlobId(value.to_string());
        let (kind, rest) = BlobKind::strip_prefix(value).ok_or_else(malformed)?;
        let (scheme, rest) = IdScheme::strip_prefix(rest).ok_or_else(malformed)?;
        let separator = rest.rfind(Self::SEPARATOR).ok_or_else(malformed)?;
        let archive = &rest[..separator];
        let target = &rest[separator + Self::SEPARATOR.len()..];
        let target = if kind.is_reads() {
            if target.is_empty() || !target.bytes().all(|c| c.is_ascii_digit()) {
                return Err(malformed());
            }
            BlobTarget::Spot(target.parse::<u64>().map_err(|_| malformed())?)
        } else {
            BlobTarget::Sequence(target.to_string())
        };
        Ok(BlobId { kind, scheme, archive: archive.to_string(), target })
    }

    /// Returns the kind of the blob.
    pub fn kind(&self) -> BlobKind {
        self.kind
    }

    /// Returns the id scheme of the blob.
    pub fn scheme(&self) -> IdScheme {
        self.scheme
    }

    /// Returns the archive name.
    pub fn archive(&self) -> &str {
        &self.archive
    }

    /// Returns the target of the blob.
    pub fn target(&self) -> &BlobTarget {
        &self.target
    }

    /// Returns the sequence identifier, or [`None`] if this is a read blob.
    pub fn seq_id(&self) -> Option<&str> {
        match &self.target {
            BlobTarget::Sequence(id) => Some(id),
            BlobTarget::Spot(_) => None,
        }
    }

    /// Returns the first spot id, or [`None`] if this is not a read blob.
    pub fn first_spot(&self) -> Option<u64> {
        match &self.target {
            BlobTarget::Spot(spot) => Some(*spot),
            BlobTarget::Sequence(_) => None,
        }
    }
}

impl Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for BlobId {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl PartialOrd for BlobId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlobTarget {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (BlobTarget::Sequence(a), BlobTarget::Sequence(b)) => a.cmp(b),
            (BlobTarget::Spot(a), BlobTarget::Spot(b)) => a.cmp(b),
            (BlobTarget::Sequence(_), BlobTarget::Spot(_)) => Ordering::Less,
            (BlobTarget::Spot(_), BlobTarget::Sequence(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for BlobTarget {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlobId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.archive.cmp(&other.archive)
            .then(self.scheme.cmp(&other.scheme))
            .then(self.kind.cmp(&other.kind))
            .then_with(|| self.target.cmp(&other.target))
    }
}

//-----------------------------------------------------------------------------

/// Splits an external identifier of the form `<accession>/<label>`.
///
/// The split happens at the first `/`, so labels may contain `/`.
///
/// # Errors
///
/// Returns [`LoaderError::MalformedExternalId`] if there is no separator or either part is empty.
pub fn parse_refseq_label(id: &str) -> Result<(&str, &str)> {
    match id.split_once('/') {
        Some((accession, label)) if !accession.is_empty() && !label.is_empty() => Ok((accession, label)),
        _ => Err(LoaderError::MalformedExternalId(id.to_string())),
    }
}

/// Parses an external read identifier. See [`ReadId::parse`].
pub fn parse_read_id(id: &str) -> Result<ReadId> {
    ReadId::parse(id)
}

/// A read identifier of the form `<accession>.<spot>.<read>`.
///
/// Spot and read ids are 1-based.
///
/// # Examples
///
/// ```
/// use csra_base::blob_id::ReadId;
///
/// let id = ReadId::parse("SRR1.42.1").unwrap();
/// assert_eq!(id.accession, "SRR1");
/// assert_eq!((id.spot_id, id.read_id), (42, 1));
/// assert_eq!(id.to_string(), "SRR1.42.1");
///
/// assert!(ReadId::parse("SRR1.0042.1").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReadId {
    /// Archive accession or id part.
    pub accession: String,
    /// Spot id.
    pub spot_id: u64,
    /// Read id within the spot.
    pub read_id: u32,
}

impl ReadId {
    /// Largest valid read id.
    pub const MAX_READ_ID: u32 = 999;

    /// Largest valid spot id.
    pub const MAX_SPOT_ID: u64 = 999_999_999_999_999_999;

    /// Creates a new read identifier.
    pub fn new(accession: &str, spot_id: u64, read_id: u32) -> Self {
        ReadId { accession: accession.to_string(), spot_id, read_id }
    }

    /// Parses a read identifier.
    ///
    /// The numeric fields are parsed from the right, so the accession may contain dots.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidReadOrSpotId`] if a field is empty, contains non-digits or leading zeros, or exceeds the maximum value.
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = || LoaderError::InvalidReadOrSpotId(id.to_string());
        let (rest, read) = id.rsplit_once('.').ok_or_else(invalid)?;
        let (accession, spot) = rest.rsplit_once('.').ok_or_else(invalid)?;
        if accession.is_empty() {
            return Err(invalid());
        }
        let read_id = parse_number(read, 3).ok_or_else(invalid)?;
        if read_id > Self::MAX_READ_ID as u64 {
            return Err(invalid());
        }
        let spot_id = parse_number(spot, 18).ok_or_else(invalid)?;
        if spot_id > Self::MAX_SPOT_ID {
            return Err(invalid());
        }
        Ok(ReadId { accession: accession.to_string(), spot_id, read_id: read_id as u32 })
    }
}

impl Display for ReadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.accession, self.spot_id, self.read_id)
    }
}

// Parses a positive decimal number without leading zeros and with at most `max_digits` digits.
fn parse_number(field: &str, max_digits: usize) -> Option<u64> {
    let bytes = field.as_bytes();
    if bytes.is_empty() || bytes.len() > max_digits || bytes[0] == b'0' {
        return None;
    }
    if !bytes.iter().all(|c| c.is_ascii_digit()) {
        return None;
    }
    field.parse::<u64>().ok()
}

//-----------------------------------------------------------------------------
