//! Support for reading the text formats used for building archives.
//!
//! ### SAM
//!
//! The SAM format is a text-based format for sequence alignments to linear references.
//! See [the specification](https://samtools.github.io/hts-specs/SAMv1.pdf) for details.
//! Only the fields needed for building an archive are parsed:
//!
//! * [`is_sam_header_line`]: Check if a buffer contains a SAM header line.
//! * [`SamRecord`]: A parsed alignment line.
//! * [`TypedField`]: An optional field, such as the read group `RG:Z:`.
//!
//! ### CIGAR
//!
//! Alignment operation strings are parsed into a vector of [`CigarOp`] values with [`parse_cigar`].
//! The same representation is used when computing pileup statistics.
//!
//! ### FASTA
//!
//! Reference sequences are read from FASTA files with [`read_fasta`].

use crate::{LoaderError, Result};

use std::fmt::Display;
use std::io::BufRead;
use std::str;


//-----------------------------------------------------------------------------

/// A typed optional field used in formats such as SAM.
///
/// The field corresponds to a TAG:TYPE:VALUE string.
/// Supported types include A (single character), Z (string), i (integer), and f (float).
/// Parsing is based on bytes rather than characters to avoid unnecessary UTF-8 validation.
///
/// # Examples
///
/// ```
/// use csra_base::formats::TypedField;
///
/// let read_group = "RG:Z:lane1";
/// let field = TypedField::parse(read_group.as_bytes()).unwrap();
/// assert_eq!(field, TypedField::String([b'R', b'G'], b"lane1".to_vec()));
/// assert_eq!(field.to_string(), read_group);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum TypedField {
    /// A single character.
    Char([u8; 2], u8),
    /// A string.
    String([u8; 2], Vec<u8>),
    /// An integer.
    Int([u8; 2], isize),
    /// A float.
    Float([u8; 2], f64),
}

impl TypedField {
    /// Parses the field from a TAG:TYPE:VALUE string.
    ///
    /// Returns an error if the field cannot be parsed or the type is unsupported.
    pub fn parse(field: &[u8]) -> Result<Self> {
        let invalid = |what: &str| LoaderError::InvalidInput(format!("Invalid {} field: {}", what, String::from_utf8_lossy(field)));
        if field.len() < 5 || field[2] != b':' || field[4] != b':' {
            return Err(invalid("typed"));
        }
        let tag = [field[0], field[1]];
        match field[3] {
            b'A' => {
                if field.len() != 6 {
                    return Err(invalid("char"));
                }
                Ok(TypedField::Char(tag, field[5]))
            },
            b'Z' => Ok(TypedField::String(tag, field[5..].to_vec())),
            b'i' => {
                let value = str::from_utf8(&field[5..]).map_err(|_| invalid("int"))?;
                let value = value.parse::<isize>().map_err(|_| invalid("int"))?;
                Ok(TypedField::Int(tag, value))
            },
            b'f' => {
                let value = str::from_utf8(&field[5..]).map_err(|_| invalid("float"))?;
                let value = value.parse::<f64>().map_err(|_| invalid("float"))?;
                Ok(TypedField::Float(tag, value))
            },
            _ => Err(invalid("unsupported")),
        }
    }

    /// Returns the tag of the field.
    pub fn tag(&self) -> [u8; 2] {
        match self {
            TypedField::Char(tag, _) => *tag,
            TypedField::String(tag, _) => *tag,
            TypedField::Int(tag, _) => *tag,
            TypedField::Float(tag, _) => *tag,
        }
    }
}

impl Display for TypedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypedField::Char(tag, value) => {
                write!(f, "{}{}:A:{}", tag[0] as char, tag[1] as char, *value as char)
            },
            TypedField::String(tag, value) => {
                let value = String::from_utf8_lossy(value);
                write!(f, "{}{}:Z:{}", tag[0] as char, tag[1] as char, value)
            },
            TypedField::Int(tag, value) => {
                write!(f, "{}{}:i:{}", tag[0] as char, tag[1] as char, value)
            },
            TypedField::Float(tag, value) => {
                write!(f, "{}{}:f:{}", tag[0] as char, tag[1] as char, value)
            },
        }
    }
}

//-----------------------------------------------------------------------------

/// A single alignment operation with its length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CigarOp {
    /// `M`: alignment match, which may be a sequence match or a mismatch.
    Match(usize),
    /// `I`: insertion to the reference.
    Insertion(usize),
    /// `D`: deletion from the reference.
    Deletion(usize),
    /// `N`: skipped region of the reference, such as an intron.
    Skip(usize),
    /// `S`: soft clipping; the bases are present in the read.
    SoftClip(usize),
    /// `H`: hard clipping; the bases are not present in the read.
    HardClip(usize),
    /// `P`: padding.
    Padding(usize),
    /// `=`: sequence match.
    Equal(usize),
    /// `X`: sequence mismatch.
    Mismatch(usize),
}

impl CigarOp {
    /// Creates an operation from its symbol and length.
    ///
    /// Returns [`None`] if the symbol is not a valid operation or the length is zero.
    pub fn new(symbol: u8, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        match symbol {
            b'M' => Some(CigarOp::Match(len)),
            b'I' => Some(CigarOp::Insertion(len)),
            b'D' => Some(CigarOp::Deletion(len)),
            b'N' => Some(CigarOp::Skip(len)),
            b'S' => Some(CigarOp::SoftClip(len)),
            b'H' => Some(CigarOp::HardClip(len)),
            b'P' => Some(CigarOp::Padding(len)),
            b'=' => Some(CigarOp::Equal(len)),
            b'X' => Some(CigarOp::Mismatch(len)),
            _ => None,
        }
    }

    /// Returns the length of the operation.
    pub fn len(&self) -> usize {
        match self {
            CigarOp::Match(len) | CigarOp::Insertion(len) | CigarOp::Deletion(len) |
            CigarOp::Skip(len) | CigarOp::SoftClip(len) | CigarOp::HardClip(len) |
            CigarOp::Padding(len) | CigarOp::Equal(len) | CigarOp::Mismatch(len) => *len,
        }
    }

    /// Returns the symbol of the operation.
    pub fn symbol(&self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Insertion(_) => 'I',
            CigarOp::Deletion(_) => 'D',
            CigarOp::Skip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Padding(_) => 'P',
            CigarOp::Equal(_) => '=',
            CigarOp::Mismatch(_) => 'X',
        }
    }

    /// Returns `true` if the operation advances the reference position.
    pub fn consumes_ref(&self) -> bool {
        matches!(self, CigarOp::Match(_) | CigarOp::Deletion(_) | CigarOp::Skip(_) | CigarOp::Equal(_) | CigarOp::Mismatch(_))
    }

    /// Returns `true` if the operation advances the read position.
    pub fn consumes_read(&self) -> bool {
        matches!(self, CigarOp::Match(_) | CigarOp::Insertion(_) | CigarOp::SoftClip(_) | CigarOp::Equal(_) | CigarOp::Mismatch(_))
    }
}

impl Display for CigarOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.len(), self.symbol())
    }
}

/// Parses a CIGAR string into a sequence of operations.
///
/// The special value `*` is parsed as an empty sequence.
///
/// # Errors
///
/// Returns [`LoaderError::InvalidCigar`] if the string contains an unknown operation, an operation without a length, or a zero-length operation.
///
/// # Examples
///
/// ```
/// use csra_base::formats::{self, CigarOp};
///
/// let ops = formats::parse_cigar(b"5S10M2D3=").unwrap();
/// assert_eq!(ops, vec![CigarOp::SoftClip(5), CigarOp::Match(10), CigarOp::Deletion(2), CigarOp::Equal(3)]);
/// assert_eq!(formats::cigar_ref_len(&ops), Some(15));
/// assert!(formats::parse_cigar(b"10M0I").is_err());
/// ```
pub fn parse_cigar(cigar: &[u8]) -> Result<Vec<CigarOp>> {
    let mut result = Vec::new();
    if cigar == b"*" {
        return Ok(result);
    }

    let invalid = || LoaderError::InvalidCigar(String::from_utf8_lossy(cigar).to_string());
    let mut len: Option<usize> = None;
    for &c in cigar.iter() {
        if c.is_ascii_digit() {
            let digit = (c - b'0') as usize;
            let value = len.unwrap_or(0).checked_mul(10).and_then(|x| x.checked_add(digit)).ok_or_else(invalid)?;
            len = Some(value);
        } else {
            let op = len.and_then(|len| CigarOp::new(c, len)).ok_or_else(invalid)?;
            result.push(op);
            len = None;
        }
    }
    if len.is_some() {
        return Err(invalid());
    }

    Ok(result)
}

/// Returns the number of reference bases covered by the operations, or [`None`] if the sum overflows.
pub fn cigar_ref_len(ops: &[CigarOp]) -> Option<usize> {
    ops.iter().filter(|op| op.consumes_ref()).try_fold(0usize, |acc, op| acc.checked_add(op.len()))
}

/// Returns the number of read bases consumed by the operations, or [`None`] if the sum overflows.
pub fn cigar_read_len(ops: &[CigarOp]) -> Option<usize> {
    ops.iter().filter(|op| op.consumes_read()).try_fold(0usize, |acc, op| acc.checked_add(op.len()))
}

/// Returns the string representation of the operations.
pub fn cigar_to_string(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return String::from("*");
    }
    ops.iter().map(|op| op.to_string()).collect()
}

//-----------------------------------------------------------------------------

/// Returns `true` if the line is a SAM header line.
pub fn is_sam_header_line(line: &[u8]) -> bool {
    line.first() == Some(&b'@')
}

/// An alignment line in the SAM format.
///
/// Positions are converted to 0-based coordinates and quality values to Phred scores.
#[derive(Clone, Debug, PartialEq)]
pub struct SamRecord {
    /// Query name.
    pub name: String,
    /// Bitwise flags.
    pub flag: u16,
    /// Reference name, or [`None`] for unmapped reads.
    pub ref_name: Option<String>,
    /// 0-based starting position on the reference.
    pub ref_pos: Option<usize>,
    /// Mapping quality.
    pub map_quality: u8,
    /// Alignment operations.
    pub cigar: Vec<CigarOp>,
    /// Read sequence in the orientation of the alignment.
    pub sequence: Vec<u8>,
    /// Phred quality scores, or an empty vector if missing.
    pub quality: Vec<u8>,
    /// Optional fields.
    pub optional: Vec<TypedField>,
}

impl SamRecord {
    /// Flag: the read is unmapped.
    pub const FLAG_UNMAPPED: u16 = 0x4;
    /// Flag: the read is reverse complemented.
    pub const FLAG_REVERSE: u16 = 0x10;
    /// Flag: the first segment in the template.
    pub const FLAG_FIRST: u16 = 0x40;
    /// Flag: the last segment in the template.
    pub const FLAG_LAST: u16 = 0x80;
    /// Flag: secondary alignment.
    pub const FLAG_SECONDARY: u16 = 0x100;
    /// Flag: supplementary alignment.
    pub const FLAG_SUPPLEMENTARY: u16 = 0x800;

    /// Tag for the read group field.
    pub const TAG_READ_GROUP: [u8; 2] = [b'R', b'G'];

    /// Parses a SAM alignment line without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if there are fewer than 11 fields or if a field cannot be parsed.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let fields: Vec<&[u8]> = line.split(|c| *c == b'\t').collect();
        if fields.len() < 11 {
            return Err(LoaderError::InvalidInput(format!("SAM line has {} fields, expected at least 11", fields.len())));
        }

        let name = Self::parse_string(fields[0], "query name")?;
        let flag = Self::parse_number::<u16>(fields[1], "flag")?;
        let ref_name = match fields[2] {
            b"*" => None,
            value => Some(Self::parse_string(value, "reference name")?),
        };
        let pos = Self::parse_number::<usize>(fields[3], "position")?;
        let ref_pos = if pos == 0 { None } else { Some(pos - 1) };
        let map_quality = Self::parse_number::<u8>(fields[4], "mapping quality")?;
        let cigar = parse_cigar(fields[5])?;
        let sequence = if fields[9] == b"*" { Vec::new() } else { fields[9].to_vec() };
        let quality = if fields[10] == b"*" {
            Vec::new()
        } else {
            if fields[10].iter().any(|&q| q < 33) {
                return Err(LoaderError::InvalidInput(String::from("Invalid quality string")));
            }
            fields[10].iter().map(|&q| q - 33).collect()
        };
        if !quality.is_empty() && quality.len() != sequence.len() {
            return Err(LoaderError::InvalidInput(format!("Sequence length {} does not match quality length {}", sequence.len(), quality.len())));
        }

        let mut optional = Vec::new();
        for field in fields[11..].iter() {
            optional.push(TypedField::parse(field)?);
        }

        Ok(SamRecord { name, flag, ref_name, ref_pos, map_quality, cigar, sequence, quality, optional })
    }

    fn parse_string(field: &[u8], what: &str) -> Result<String> {
        let value = str::from_utf8(field).map_err(|_| {
            LoaderError::InvalidInput(format!("Invalid {}: {}", what, String::from_utf8_lossy(field)))
        })?;
        Ok(value.to_string())
    }

    fn parse_number<T: str::FromStr>(field: &[u8], what: &str) -> Result<T> {
        let value = str::from_utf8(field).ok().and_then(|x| x.parse::<T>().ok());
        value.ok_or_else(|| LoaderError::InvalidInput(format!("Invalid {}: {}", what, String::from_utf8_lossy(field))))
    }

    /// Returns `true` if the read is unmapped.
    pub fn is_unmapped(&self) -> bool {
        self.flag & Self::FLAG_UNMAPPED != 0 || self.ref_name.is_none() || self.ref_pos.is_none() || self.cigar.is_empty()
    }

    /// Returns `true` if this is the primary alignment of the read.
    pub fn is_primary(&self) -> bool {
        self.flag & (Self::FLAG_SECONDARY | Self::FLAG_SUPPLEMENTARY) == 0
    }

    /// Returns `true` if the read is reverse complemented.
    pub fn is_reverse(&self) -> bool {
        self.flag & Self::FLAG_REVERSE != 0
    }

    /// Returns the 1-based read id within the spot.
    ///
    /// The last segment of a template is read 2; everything else is read 1.
    pub fn read_id(&self) -> u32 {
        if self.flag & Self::FLAG_LAST != 0 && self.flag & Self::FLAG_FIRST == 0 { 2 } else { 1 }
    }

    /// Returns the read group, or an empty string if there is none.
    pub fn read_group(&self) -> String {
        for field in self.optional.iter() {
            if let TypedField::String(tag, value) = field {
                if *tag == Self::TAG_READ_GROUP {
                    return String::from_utf8_lossy(value).to_string();
                }
            }
        }
        String::new()
    }
}

//-----------------------------------------------------------------------------

/// A sequence record in the FASTA format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FastaRecord {
    /// Sequence name: the first word of the header line.
    pub name: String,
    /// The rest of the header line.
    pub description: String,
    /// The sequence.
    pub sequence: Vec<u8>,
}

/// Reads all records from a FASTA file.
///
/// # Errors
///
/// Returns an error if the reader fails, if sequence data appears before the first header, or if a header has no name.
pub fn read_fasta<R: BufRead>(reader: &mut R) -> Result<Vec<FastaRecord>> {
    let mut result: Vec<FastaRecord> = Vec::new();
    let mut line_num = 0;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        buf.clear();
        let len = reader.read_until(b'\n', &mut buf)?;
        if len == 0 {
            break;
        }
        line_num += 1;
        while buf.last().is_some_and(|c| c.is_ascii_whitespace()) {
            buf.pop();
        }
        if buf.is_empty() {
            continue;
        }
        if buf[0] == b'>' {
            let header = String::from_utf8_lossy(&buf[1..]).to_string();
            let (name, description) = match header.split_once(char::is_whitespace) {
                Some((name, description)) => (name.to_string(), description.trim().to_string()),
                None => (header.clone(), String::new()),
            };
            if name.is_empty() {
                return Err(LoaderError::InvalidInput(format!("Empty FASTA header on line {}", line_num)));
            }
            result.push(FastaRecord { name, description, sequence: Vec::new() });
        } else {
            match result.last_mut() {
                Some(record) => record.sequence.extend_from_slice(&buf),
                None => return Err(LoaderError::InvalidInput(format!("Sequence before FASTA header on line {}", line_num))),
            }
        }
    }
    Ok(result)
}

//-----------------------------------------------------------------------------
