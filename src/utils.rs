//! Utility functions and structures.

use crate::{LoaderError, Result};

use std::fs::{self, File};
use std::path::Path;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::read::MultiGzDecoder;

//-----------------------------------------------------------------------------

// Utilities for working with files.

const SIZE_UNITS: [(f64, &str); 6] = [
    (1.0, "B"),
    (1024.0, "KiB"),
    (1024.0 * 1024.0, "MiB"),
    (1024.0 * 1024.0 * 1024.0, "GiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0, "TiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0, "PiB"),
];

/// Returns a human-readable representation of the given number of bytes.
pub fn human_readable_size(bytes: usize) -> String {
    let mut unit = 0;
    let value = bytes as f64;
    while unit + 1 < SIZE_UNITS.len() && value >= SIZE_UNITS[unit + 1].0 {
        unit += 1;
    }
    format!("{:.3} {}", value / SIZE_UNITS[unit].0, SIZE_UNITS[unit].1)
}

/// Returns a human-readable size of the file.
pub fn file_size<P: AsRef<Path>>(filename: P) -> Option<String> {
    let metadata = fs::metadata(filename).ok()?;
    Some(human_readable_size(metadata.len() as usize))
}

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns `true` if the file appears to be gzip-compressed.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    let file = match File::open(filename) {
        Ok(file) => file,
        Err(_) => return false,
    };
    let mut reader = BufReader::new(file);
    let mut magic = [0; 2];
    let len = reader.read(&mut magic).ok();
    len == Some(2) && magic == [0x1F, 0x8B]
}

/// Returns a buffered reader for the file, which may be gzip-compressed.
pub fn open_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn BufRead>> {
    let file = File::open(&filename)?;
    let inner = BufReader::new(file);
    if is_gzipped(&filename) {
        let inner = MultiGzDecoder::new(inner);
        Ok(Box::new(BufReader::new(inner)))
    } else {
        Ok(Box::new(inner))
    }
}

//-----------------------------------------------------------------------------

// Sequence packing for archive rows.

// Codes 1 to 5; 0 marks padding after an odd number of bases.
const BASES: [u8; 6] = [0, b'A', b'C', b'G', b'T', b'N'];

#[inline]
fn base_code(base: u8) -> u8 {
    match base {
        b'A' | b'a' => 1,
        b'C' | b'c' => 2,
        b'G' | b'g' => 3,
        b'T' | b't' => 4,
        _ => 5,
    }
}

/// Packs a DNA sequence two bases per byte, first base in the high nibble.
///
/// Bases outside `acgtACGT` become `N`.
///
/// # Examples
///
/// ```
/// use csra_base::utils;
///
/// let packed = utils::encode_sequence(b"GATTn");
/// assert_eq!(packed.len(), 3);
/// assert_eq!(utils::decode_sequence(&packed), b"GATTN");
/// ```
pub fn encode_sequence(sequence: &[u8]) -> Vec<u8> {
    sequence.chunks(2).map(|pair| {
        let low = pair.get(1).map(|&x| base_code(x)).unwrap_or(0);
        (base_code(pair[0]) << 4) | low
    }).collect()
}

/// Unpacks a sequence packed with [`encode_sequence`].
///
/// Decoding stops at the first padding code.
pub fn decode_sequence(encoded: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(2 * encoded.len());
    for &byte in encoded.iter() {
        for code in [byte >> 4, byte & 0x0F] {
            match BASES.get(code as usize) {
                Some(&base) if base != 0 => result.push(base),
                _ => return result,
            }
        }
    }
    result
}

/// Returns `true` if the bases are equal, ignoring case.
#[inline]
pub fn same_base(a: u8, b: u8) -> bool {
    a.to_ascii_uppercase() == b.to_ascii_uppercase()
}

//-----------------------------------------------------------------------------

/// A cancellation flag shared between the caller and a running request.
///
/// Loads poll the token between chunks and between batches of records.
/// Cloning the token shares the flag.
///
/// # Examples
///
/// ```
/// use csra_base::utils::CancelToken;
///
/// let token = CancelToken::new();
/// let shared = token.clone();
/// assert!(token.check().is_ok());
/// shared.cancel();
/// assert!(token.is_cancelled());
/// assert!(token.check().is_err());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Number of records processed between two polls of the token.
    pub const POLL_INTERVAL: usize = 1024;

    /// Creates a new token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns [`LoaderError::Cancelled`] if cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(LoaderError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Polls the token if `processed` is a multiple of [`Self::POLL_INTERVAL`].
    #[inline]
    pub fn poll(&self, processed: usize) -> Result<()> {
        if processed % Self::POLL_INTERVAL == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
