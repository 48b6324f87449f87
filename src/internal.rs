// Shared test fixtures.

use crate::{ArchiveBuilder, CsraDb, NewAlignment};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use std::path::{Path, PathBuf};

//-----------------------------------------------------------------------------

// The small fixture archive.
//
// References (row size 100):
// * chr1: NC_000001.10, length 1000
// * chr2: no seq id, length 500
// * chrM: NC_012920.1, circular, length 300, no alignments
//
// Spots:
// 1. lane1: read 1 at chr1:10 20M mq60; read 2 at chr1:200 20M mq30 reverse
// 2. lane2: read 1 at chr1:15 20M mq10 with a mismatch at chr1:20
// 3. lane1: read 1 at chr2:50 2S10M2I10M mq60
// 4. lane2: read 1 at chr1:100 10M5D10M mq60
// 5. lane1: read 1 unaligned

pub(crate) const FIXTURE_NAME: &str = "SRR1";
pub(crate) const FIXTURE_ROW_SIZE: usize = 100;
pub(crate) const MISMATCH_POS: usize = 20;

pub(crate) fn fixture_sequence(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

pub(crate) fn chr1() -> Vec<u8> {
    fixture_sequence(1000, 1)
}

pub(crate) fn chr2() -> Vec<u8> {
    fixture_sequence(500, 2)
}

pub(crate) fn chr_m() -> Vec<u8> {
    fixture_sequence(300, 3)
}

pub(crate) fn other_base(base: u8) -> u8 {
    match base {
        b'A' => b'C',
        b'C' => b'G',
        b'G' => b'T',
        _ => b'A',
    }
}

pub(crate) fn qualities(len: usize, first: u8) -> Vec<u8> {
    (0..len).map(|i| first + (i % 10) as u8).collect()
}

fn check<T, E: std::fmt::Display>(result: Result<T, E>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("Failed to {}: {}", what, err),
    }
}

pub(crate) fn fixture_builder() -> ArchiveBuilder {
    let chr1 = chr1();
    let chr2 = chr2();

    let mut builder = ArchiveBuilder::new(FIXTURE_ROW_SIZE);
    check(builder.add_reference("chr1", Some("NC_000001.10"), &chr1, false), "add chr1");
    check(builder.add_reference("chr2", None, &chr2, false), "add chr2");
    check(builder.add_reference("chrM", Some("NC_012920.1"), &chr_m(), true), "add chrM");

    let spot = builder.add_spot("spot1", "lane1");
    check(builder.add_read(spot, 1, &chr1[10..30], &qualities(20, 30)), "add read 1.1");
    check(builder.add_read(spot, 2, &chr1[200..220], &qualities(20, 20)), "add read 1.2");
    check(builder.add_alignment(&NewAlignment::new("chr1", 10, spot, 1, "20M")), "align read 1.1");
    let alignment = NewAlignment::new("chr1", 200, spot, 2, "20M").with_quality(30).with_reverse(true);
    check(builder.add_alignment(&alignment), "align read 1.2");

    let spot = builder.add_spot("spot2", "lane2");
    let mut read = chr1[15..35].to_vec();
    read[MISMATCH_POS - 15] = other_base(read[MISMATCH_POS - 15]);
    check(builder.add_read(spot, 1, &read, &qualities(20, 10)), "add read 2.1");
    check(builder.add_alignment(&NewAlignment::new("chr1", 15, spot, 1, "20M").with_quality(10)), "align read 2.1");

    let spot = builder.add_spot("spot3", "lane1");
    let mut read = b"GG".to_vec();
    read.extend_from_slice(&chr2[50..60]);
    read.extend_from_slice(b"TT");
    read.extend_from_slice(&chr2[60..70]);
    check(builder.add_read(spot, 1, &read, b""), "add read 3.1");
    check(builder.add_alignment(&NewAlignment::new("chr2", 50, spot, 1, "2S10M2I10M")), "align read 3.1");

    let spot = builder.add_spot("spot4", "lane2");
    let mut read = chr1[100..110].to_vec();
    read.extend_from_slice(&chr1[115..125]);
    check(builder.add_read(spot, 1, &read, &qualities(20, 25)), "add read 4.1");
    check(builder.add_alignment(&NewAlignment::new("chr1", 100, spot, 1, "10M5D10M")), "align read 4.1");

    let spot = builder.add_spot("spot5", "lane1");
    check(builder.add_read(spot, 1, b"ACGTACGT", &qualities(8, 5)), "add read 5.1");

    builder
}

pub(crate) fn create_archive(dir: &Path, name: &str, builder: &ArchiveBuilder) -> PathBuf {
    let db_file = dir.join(name);
    assert!(!db_file.exists(), "Database {} already exists", db_file.display());
    let result = builder.create(&db_file);
    assert!(result.is_ok(), "Failed to create database: {}", result.unwrap_err());
    db_file
}

pub(crate) fn create_fixture(dir: &Path) -> PathBuf {
    create_archive(dir, FIXTURE_NAME, &fixture_builder())
}

pub(crate) fn open_db(filename: &Path) -> CsraDb {
    let database = CsraDb::open(filename);
    assert!(database.is_ok(), "Failed to open database: {}", database.unwrap_err());
    database.unwrap()
}

//-----------------------------------------------------------------------------

// An archive with a single reference `chr1` and `per_row` alignments of length 10 starting in each row.
pub(crate) fn dense_builder(rows: usize, row_size: usize, per_row: usize) -> ArchiveBuilder {
    let sequence = fixture_sequence(rows * row_size, 7);
    let mut builder = ArchiveBuilder::new(row_size);
    check(builder.add_reference("chr1", None, &sequence, false), "add reference");
    let step = (row_size - 10) / per_row.max(1);
    for row in 0..rows {
        for i in 0..per_row {
            let pos = row * row_size + i * step;
            let spot = builder.add_spot(&format!("spot{}", builder.spots() + 1), "");
            check(builder.add_read(spot, 1, &sequence[pos..pos + 10], b""), "add read");
            check(builder.add_alignment(&NewAlignment::new("chr1", pos, spot, 1, "10M")), "add alignment");
        }
    }
    builder
}

//-----------------------------------------------------------------------------
