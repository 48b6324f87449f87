use super::*;

use crate::LoaderParams;
use crate::blob_id::IdScheme;
use crate::internal;

//-----------------------------------------------------------------------------

fn open_archive(scheme: IdScheme) -> (tempfile::TempDir, ArchiveInfo) {
    let dir = tempfile::tempdir().unwrap();
    let db_file = internal::create_fixture(dir.path());
    let archive = ArchiveInfo::open(&db_file, internal::FIXTURE_NAME, scheme, &LoaderParams::default());
    assert!(archive.is_ok(), "Failed to open archive: {}", archive.unwrap_err());
    (dir, archive.unwrap())
}

//-----------------------------------------------------------------------------

#[test]
fn refseq_blob() {
    let (_dir, archive) = open_archive(IdScheme::General);
    let chr1 = archive.ref_seq_info("SRR1/chr1").unwrap();
    let assembler = RefSeqAssembler::new(&archive, &chr1);
    assert_eq!(assembler.chunk_len(), 800, "Wrong data chunk length");

    let blob = assembler.load_blob();
    assert_eq!(blob.blob_id.to_string(), "refseq|gnl|SRR1|||SRR1/chr1", "Wrong blob id");
    assert_eq!(blob.ids, vec!["SRR1/chr1", "chr1", "NC_000001.10"], "Wrong sequence ids");
    assert_eq!(blob.length, 1000, "Wrong length");
    assert!(!blob.circular, "Linear sequence reported as circular");
    assert_eq!(blob.chunks, vec![0..800, 800..1000], "Wrong data chunks");
    assert!(blob.title.starts_with("chr1 - reference sequence from ShortRead RUN "), "Wrong title: {}", blob.title);
    assert!(blob.title.ends_with(internal::FIXTURE_NAME), "Title does not name the archive: {}", blob.title);

    let chr_m = archive.ref_seq_info("chrM").unwrap();
    let blob = RefSeqAssembler::new(&archive, &chr_m).load_blob();
    assert!(blob.circular, "Circular sequence reported as linear");
    assert_eq!(blob.chunks, vec![0..300], "Wrong data chunks for a short sequence");
}

#[test]
fn refseq_blob_with_seq_ids() {
    let (_dir, archive) = open_archive(IdScheme::SeqId);
    let chr1 = archive.ref_seq_info("NC_000001.10").unwrap();
    let blob = RefSeqAssembler::new(&archive, &chr1).load_blob();
    assert_eq!(blob.blob_id.to_string(), "refseq|id|SRR1|||NC_000001.10", "Wrong blob id");
    assert_eq!(blob.ids[0], "NC_000001.10", "Canonical id is not first");
}

#[test]
fn sequence_data() {
    let (_dir, archive) = open_archive(IdScheme::General);
    let expected = internal::chr1();
    let chr1 = archive.ref_seq_info("chr1").unwrap();
    let assembler = RefSeqAssembler::new(&archive, &chr1);

    let mut sequence = Vec::new();
    for (index, range) in assembler.load_blob().chunks.into_iter().enumerate() {
        let chunk = assembler.load_chunk(index);
        assert!(chunk.is_ok(), "Failed to load data chunk {}: {}", index, chunk.unwrap_err());
        let chunk = chunk.unwrap();
        assert_eq!(chunk.index, index, "Wrong index for data chunk {}", index);
        assert_eq!(chunk.range, range, "Wrong range for data chunk {}", index);
        assert_eq!(chunk.sequence, expected[range].to_vec(), "Wrong bases in data chunk {}", index);
        sequence.extend_from_slice(&chunk.sequence);
    }
    assert_eq!(sequence, expected, "Data chunks do not cover the sequence");

    let result = assembler.load_chunk(2);
    assert!(matches!(result, Err(LoaderError::InvalidChunk(_))), "Loaded a data chunk past the end");
}

//-----------------------------------------------------------------------------
