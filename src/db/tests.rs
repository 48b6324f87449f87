use super::*;

use crate::internal;

use std::io::Cursor;

//-----------------------------------------------------------------------------

// Tests for opening archives.

#[test]
fn open_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = internal::create_fixture(dir.path());
    assert_eq!(identify_database(&db_file), DatabaseFileType::Version(String::from(CsraDb::VERSION)), "Archive not identified");

    let db = internal::open_db(&db_file);
    assert_eq!(db.name(), internal::FIXTURE_NAME, "Wrong archive name");
    assert_eq!(db.version(), CsraDb::VERSION, "Wrong version");
    assert_eq!(db.row_size(), internal::FIXTURE_ROW_SIZE, "Wrong row size");
    assert_eq!(db.references(), 3, "Wrong number of references");
    assert_eq!(db.spots(), 5, "Wrong number of spots");
    assert_eq!(db.alignments(), 5, "Wrong number of alignments");
    assert!(db.file_size().is_some(), "No file size for the archive");
}

#[test]
fn open_missing_and_invalid() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(identify_database(dir.path()), DatabaseFileType::NotDatabase, "Directory not identified");
    let missing = dir.path().join("SRR404");
    assert_eq!(identify_database(&missing), DatabaseFileType::Missing, "Missing file not identified");
    let result = CsraDb::open(&missing);
    assert!(matches!(result, Err(LoaderError::NotFound(_))), "Missing archive was not reported as not found");

    let garbage = dir.path().join("garbage");
    std::fs::write(&garbage, b"this is not a database").unwrap();
    assert_eq!(identify_database(&garbage), DatabaseFileType::UnknownDatabase, "Invalid file not identified");
    let result = CsraDb::open(&garbage);
    assert!(matches!(result, Err(LoaderError::ArchiveOpenFailure { .. })), "Invalid archive was not reported as an open failure");
}

#[test]
fn open_wrong_version() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = dir.path().join("old");
    {
        let connection = Connection::open(&db_file).unwrap();
        connection.execute("CREATE TABLE Tags (key TEXT PRIMARY KEY, value TEXT NOT NULL) STRICT", ()).unwrap();
        connection.execute("INSERT INTO Tags(key, value) VALUES ('version', 'cSRA-base v0')", ()).unwrap();
    }
    assert_eq!(identify_database(&db_file), DatabaseFileType::Version(String::from("cSRA-base v0")), "Wrong version for an old archive");
    let result = CsraDb::open(&db_file);
    assert!(matches!(result, Err(LoaderError::ArchiveOpenFailure { .. })), "Opened an archive with the wrong version");
}

//-----------------------------------------------------------------------------

// Tests for reference queries.

#[test]
fn references() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    let mut cursor = db.cursor().unwrap();
    let refs = cursor.references();
    assert!(refs.is_ok(), "Failed to list references: {}", refs.unwrap_err());
    let refs = refs.unwrap();

    let truth = vec![
        ReferenceRecord { handle: 0, name: String::from("chr1"), seq_id: Some(String::from("NC_000001.10")), length: 1000, circular: false, max_align_len: 25 },
        ReferenceRecord { handle: 1, name: String::from("chr2"), seq_id: None, length: 500, circular: false, max_align_len: 20 },
        ReferenceRecord { handle: 2, name: String::from("chrM"), seq_id: Some(String::from("NC_012920.1")), length: 300, circular: true, max_align_len: 0 },
    ];
    assert_eq!(refs, truth, "Wrong reference records");
}

#[test]
fn row_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    let mut cursor = db.cursor().unwrap();

    let counts: Vec<usize> = (0..10).map(|row| cursor.row_align_count(0, row).unwrap()).collect();
    assert_eq!(counts, vec![2, 1, 1, 0, 0, 0, 0, 0, 0, 0], "Wrong alignment counts for chr1");
    assert_eq!(cursor.row_align_count(0, 10).unwrap(), 0, "Nonzero count past the end");
    assert_eq!(cursor.row_align_count(2, 0).unwrap(), 0, "Nonzero count for chrM");

    assert_eq!(cursor.probe_alignments(0, 100).unwrap(), 4, "Wrong probe result for chr1");
    assert_eq!(cursor.probe_alignments(0, 2).unwrap(), 2, "Probe did not stop at the limit");
    assert_eq!(cursor.probe_alignments(2, 100).unwrap(), 0, "Wrong probe result for chrM");

    let coverage = cursor.coverage_rows(0).unwrap();
    assert_eq!(coverage, vec![2, 1, 1, 0, 0, 0, 0, 0, 0, 0], "Wrong coverage for chr1");
    let coverage = cursor.coverage_rows(1).unwrap();
    assert_eq!(coverage, vec![1, 0, 0, 0, 0], "Wrong coverage for chr2");
}

#[test]
fn reference_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    let mut cursor = db.cursor().unwrap();
    let chr1 = internal::chr1();

    let ranges = vec![0..10, 95..105, 0..1000, 250..250, 990..1000, 199..401];
    for range in ranges {
        let sequence = cursor.ref_sequence(0, range.clone());
        assert!(sequence.is_ok(), "Failed to get sequence for {:?}: {}", range, sequence.unwrap_err());
        assert_eq!(sequence.unwrap(), chr1[range.clone()].to_vec(), "Wrong sequence for {:?}", range);
    }
    let clamped = cursor.ref_sequence(0, 990..1100).unwrap();
    assert_eq!(clamped, chr1[990..].to_vec(), "Sequence was not clamped to the reference");
}

//-----------------------------------------------------------------------------

// Tests for alignment queries.

#[test]
fn alignments_by_start() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    let mut cursor = db.cursor().unwrap();

    let all = cursor.alignments_by_start(0, 0..150, 0).unwrap();
    let positions: Vec<usize> = all.iter().map(|x| x.ref_pos).collect();
    assert_eq!(positions, vec![10, 15, 100], "Wrong alignments in chr1:0-150");
    assert_eq!(all[0].spot_group, "lane1", "Wrong spot group");
    assert_eq!(all[0].ref_range(), 10..30, "Wrong reference range");
    assert_eq!(all[2].cigar, "10M5D10M", "Wrong CIGAR string");
    assert_eq!(all[2].ref_len, 25, "Wrong reference length for a deletion");

    let filtered = cursor.alignments_by_start(0, 0..150, 30).unwrap();
    let positions: Vec<usize> = filtered.iter().map(|x| x.ref_pos).collect();
    assert_eq!(positions, vec![10, 100], "Mapping quality filter was not applied");

    let empty = cursor.alignments_by_start(0, 300..1000, 0).unwrap();
    assert!(empty.is_empty(), "Found alignments in an empty region");
}

#[test]
fn alignments_overlapping() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    let mut cursor = db.cursor().unwrap();
    let max_len = 25;

    let overlapping = cursor.alignments_overlapping(0, 30..40, max_len, 0).unwrap();
    let positions: Vec<usize> = overlapping.iter().map(|x| x.ref_pos).collect();
    assert_eq!(positions, vec![15], "Wrong alignments overlapping chr1:30-40");

    let overlapping = cursor.alignments_overlapping(0, 0..20, max_len, 0).unwrap();
    let positions: Vec<usize> = overlapping.iter().map(|x| x.ref_pos).collect();
    assert_eq!(positions, vec![10, 15], "Wrong alignments overlapping chr1:0-20");

    let overlapping = cursor.alignments_overlapping(0, 110..115, max_len, 0).unwrap();
    assert_eq!(overlapping.len(), 1, "Alignment with a deletion over the interval was not found");

    assert_eq!(cursor.alignment_end(0, 0..100).unwrap(), Some(35), "Wrong alignment end for chr1:0-100");
    assert_eq!(cursor.alignment_end(0, 100..200).unwrap(), Some(125), "Wrong alignment end for chr1:100-200");
    assert_eq!(cursor.alignment_end(0, 300..400).unwrap(), None, "Alignment end for an empty region");
}

#[test]
fn alignment_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let builder = internal::dense_builder(30, 100, 50);
    let db = internal::open_db(&internal::create_archive(dir.path(), "SRR4", &builder));
    let mut cursor = db.cursor().unwrap();
    let total = 30 * 50;
    assert_eq!(cursor.alignments_by_start(0, 0..3000, 0).unwrap().len(), total, "Wrong number of alignments");
    assert_eq!(cursor.alignments_overlapping(0, 0..3000, 10, 0).unwrap().len(), total, "Wrong number of overlapping alignments");

    // Cancelling while reading stops at the next poll.
    let cancel = CancelToken::new();
    let mut visited = 0;
    let result = cursor.for_each_alignment_by_start(0, 0..3000, 0, &cancel, &mut |_| {
        visited += 1;
        cancel.cancel();
        Ok(())
    });
    assert!(matches!(result, Err(LoaderError::Cancelled)), "Reading alignments by start was not cancelled");
    assert_eq!(visited, CancelToken::POLL_INTERVAL, "Wrong number of alignments read before cancellation");

    let cancel = CancelToken::new();
    let mut visited = 0;
    let result = cursor.for_each_alignment_overlapping(0, 0..3000, 10, 0, &cancel, &mut |_| {
        visited += 1;
        cancel.cancel();
        Ok(())
    });
    assert!(matches!(result, Err(LoaderError::Cancelled)), "Reading overlapping alignments was not cancelled");
    assert_eq!(visited, CancelToken::POLL_INTERVAL, "Wrong number of alignments read before cancellation");

    let visited = cursor.for_each_alignment_by_start(0, 0..3000, 0, &CancelToken::new(), &mut |_| Ok(()));
    assert_eq!(visited.ok(), Some(total), "Wrong number of alignments visited");
}

#[test]
fn mismatch_strings() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    let mut cursor = db.cursor().unwrap();

    let alignment = cursor.primary_alignment(2, 1).unwrap().unwrap();
    let mut truth = vec![b'='; 20];
    let offset = internal::MISMATCH_POS - 15;
    truth[offset] = internal::other_base(internal::chr1()[internal::MISMATCH_POS]);
    assert_eq!(alignment.mismatch, truth, "Wrong mismatch string for a substitution");
    assert_eq!(alignment.map_quality, 10, "Wrong mapping quality");

    let alignment = cursor.primary_alignment(3, 1).unwrap().unwrap();
    let mut truth = b"GG".to_vec();
    truth.extend_from_slice(&[b'='; 10]);
    truth.extend_from_slice(b"TT");
    truth.extend_from_slice(&[b'='; 10]);
    assert_eq!(alignment.mismatch, truth, "Wrong mismatch string with clipping and insertion");

    let alignment = cursor.primary_alignment(1, 2).unwrap().unwrap();
    assert!(alignment.reverse, "Reverse alignment stored as forward");
    assert_eq!(alignment.mismatch, vec![b'='; 20], "Wrong mismatch string for a perfect match");
}

//-----------------------------------------------------------------------------

// Tests for spots and reads.

#[test]
fn spots_and_reads() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    let mut cursor = db.cursor().unwrap();

    assert_eq!(
        cursor.spot_groups().unwrap(),
        vec![(String::from("lane1"), 3), (String::from("lane2"), 2)],
        "Wrong spot groups"
    );

    let spots = cursor.spots(1..3).unwrap();
    assert_eq!(spots.len(), 2, "Wrong number of spots");
    assert_eq!(spots[0].name, "spot1", "Wrong name for spot 1");
    assert_eq!(spots[0].reads.len(), 2, "Wrong number of reads in spot 1");
    assert_eq!(spots[0].reads[1].sequence, internal::chr1()[200..220].to_vec(), "Wrong sequence for read 1.2");
    assert_eq!(spots[0].reads[1].quality, internal::qualities(20, 20), "Wrong quality for read 1.2");
    assert_eq!(spots[1].spot_group, "lane2", "Wrong spot group for spot 2");

    let spots = cursor.spots(3..100).unwrap();
    let ids: Vec<u64> = spots.iter().map(|x| x.spot_id).collect();
    assert_eq!(ids, vec![3, 4, 5], "Wrong spots past the end");
    assert!(spots[0].reads[0].quality.is_empty(), "Missing quality was stored");

    assert!(cursor.read_exists(1, 2).unwrap(), "Read 1.2 not found");
    assert!(cursor.read_exists(5, 1).unwrap(), "Unaligned read 5.1 not found");
    assert!(!cursor.read_exists(1, 3).unwrap(), "Found nonexistent read 1.3");
    assert!(!cursor.read_exists(6, 1).unwrap(), "Found read in nonexistent spot 6");
    assert!(cursor.primary_alignment(5, 1).unwrap().is_none(), "Unaligned read has an alignment");
}

#[test]
fn concurrent_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_fixture(dir.path()));
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut cursor = db.cursor().unwrap();
                for _ in 0..10 {
                    assert_eq!(cursor.references().unwrap().len(), 3, "Wrong number of references");
                    assert_eq!(cursor.alignments_by_start(0, 0..1000, 0).unwrap().len(), 4, "Wrong number of alignments");
                }
            });
        }
    });
}

//-----------------------------------------------------------------------------

// Tests for building archives.

#[test]
fn builder_errors() {
    let mut builder = ArchiveBuilder::new(100);
    builder.add_reference("chr1", None, b"ACGTACGTACGT", false).unwrap();
    assert!(builder.add_reference("chr1", None, b"ACGT", false).is_err(), "Added a duplicate reference");

    let spot = builder.add_spot("spot1", "");
    assert!(builder.add_read(spot, 0, b"ACGT", b"").is_err(), "Added read id 0");
    assert!(builder.add_read(spot, 1, b"ACGT", b"II").is_err(), "Added read with a wrong quality length");
    assert!(builder.add_read(spot + 1, 1, b"ACGT", b"").is_err(), "Added read to a nonexistent spot");
    builder.add_read(spot, 1, b"ACGT", b"").unwrap();
    assert!(builder.add_read(spot, 1, b"ACGT", b"").is_err(), "Added a duplicate read");

    let cases = vec![
        NewAlignment::new("chr2", 0, spot, 1, "4M"),
        NewAlignment::new("chr1", 0, spot, 2, "4M"),
        NewAlignment::new("chr1", 0, spot, 1, "5M"),
        NewAlignment::new("chr1", 0, spot, 1, "*"),
        NewAlignment::new("chr1", 10, spot, 1, "4M"),
    ];
    for alignment in cases.iter() {
        assert!(builder.add_alignment(alignment).is_err(), "Added invalid alignment {:?}", alignment);
    }

    // Lengths that overflow must be rejected instead of wrapping around.
    let past_end = format!("4M{}D", usize::MAX - 10);
    let sum_overflow = format!("2M{}D2M{}N", usize::MAX - 10, usize::MAX - 10);
    let overflows = vec![
        NewAlignment::new("chr1", 8, spot, 1, &past_end),
        NewAlignment::new("chr1", 0, spot, 1, &sum_overflow),
    ];
    for alignment in overflows.iter() {
        let result = builder.add_alignment(alignment);
        assert!(matches!(result, Err(LoaderError::InvalidCigar(_))), "Wrong result for overflowing alignment {:?}: {:?}", alignment, result);
    }
    builder.add_alignment(&NewAlignment::new("chr1", 8, spot, 1, "4M")).unwrap();
    assert!(builder.add_alignment(&NewAlignment::new("chr1", 0, spot, 1, "4M")).is_err(), "Added a second primary alignment");
    assert_eq!(builder.alignments(), 1, "Wrong number of alignments");

    let dir = tempfile::tempdir().unwrap();
    let db_file = internal::create_archive(dir.path(), "SRR2", &builder);
    assert!(builder.create(&db_file).is_err(), "Overwrote an existing archive");
}

#[test]
fn import_sam() {
    let fasta = b">chr1\nACGTACGTACGTACGTACGT\n>chr2\nTTTTGGGGCCCCAAAA\n";
    let sam = b"@HD\tVN:1.6\n\
        @RG\tID:lane1\n\
        pair1\t99\tchr1\t1\t60\t8M\t=\t9\t16\tACGTACGT\tIIIIIIII\tRG:Z:lane1\n\
        pair1\t147\tchr1\t9\t50\t2S6M\t=\t1\t-16\tGGACGTAC\tIIIIIIII\tRG:Z:lane1\n\
        pair1\t355\tchr2\t1\t0\t8M\t=\t1\t0\tTTTTGGGG\t*\tRG:Z:lane1\n\
        single\t4\t*\t0\t0\t*\t*\t0\t0\tCCCC\t*\n";
    let builder = ArchiveBuilder::import_sam(&mut Cursor::new(&sam[..]), &mut Cursor::new(&fasta[..]), 10);
    assert!(builder.is_ok(), "Failed to import SAM: {}", builder.unwrap_err());
    let builder = builder.unwrap();
    assert_eq!(builder.spots(), 2, "Wrong number of spots");
    assert_eq!(builder.alignments(), 2, "Wrong number of alignments");

    let dir = tempfile::tempdir().unwrap();
    let db = internal::open_db(&internal::create_archive(dir.path(), "SRR3", &builder));
    let mut cursor = db.cursor().unwrap();
    let spots = cursor.spots(1..3).unwrap();
    assert_eq!(spots[0].name, "pair1", "Wrong name for the first spot");
    assert_eq!(spots[0].spot_group, "lane1", "Wrong spot group for the first spot");
    assert_eq!(spots[0].reads.len(), 2, "Wrong number of reads in the first spot");
    assert_eq!(spots[1].spot_group, "", "Unexpected spot group for the second spot");

    let second = cursor.primary_alignment(1, 2).unwrap().unwrap();
    assert_eq!(second.ref_pos, 8, "Wrong position for the second read");
    assert_eq!(second.mismatch, b"GG======".to_vec(), "Wrong mismatch string for the second read");
    assert!(second.reverse, "Second read should be reverse");
    assert!(cursor.primary_alignment(2, 1).unwrap().is_none(), "Unmapped read has an alignment");
}

#[test]
fn import_invalid_sam() {
    let fasta = b">chr1\nACGTACGT\n";
    let sam = b"read1\t0\tchr1\t1\t60\t8M\t*\t0\t0\tACGT\t*\n";
    let result = ArchiveBuilder::import_sam(&mut Cursor::new(&sam[..]), &mut Cursor::new(&fasta[..]), 10);
    assert!(result.is_err(), "Imported a read inconsistent with its CIGAR string");

    let sam = b"read1\t0\tchr9\t1\t60\t4M\t*\t0\t0\tACGT\t*\n";
    let result = ArchiveBuilder::import_sam(&mut Cursor::new(&sam[..]), &mut Cursor::new(&fasta[..]), 10);
    assert!(result.is_err(), "Imported an alignment to an unknown reference");
}

//-----------------------------------------------------------------------------
