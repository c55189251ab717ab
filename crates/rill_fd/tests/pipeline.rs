// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Full-pipeline tests: descriptor → decompressor → digester → consumer,
//! and the mirror image on the write side.

use std::io::Write as _;

use bytes::BytesMut;
use rill::{Reader, Writer};
use rill_digest::{Crc32cDigester, Digester as _, DigestingReader, DigestingWriter};
use rill_fd::{FdReader, FdReaderOptions, FdWriter, FdWriterOptions};
use rill_zstd::{ZstdDecoder, ZstdOptions};

fn sample_data() -> Vec<u8> {
    b"The quick brown fox ".repeat(1000)
}

#[test]
fn read_pipeline_decompresses_and_digests() {
    let data = sample_data();
    let compressed = zstd::bulk::compress(&data, 3).expect("compress");

    let mut fixture = tempfile::NamedTempFile::new().expect("temp file");
    fixture.write_all(&compressed).expect("write fixture");
    fixture.flush().expect("flush fixture");

    let fd = FdReader::open(fixture.path(), FdReaderOptions::new());
    let decoder = ZstdDecoder::new(fd, ZstdOptions::new());
    let mut pipeline = DigestingReader::new(decoder, Crc32cDigester::new());

    let mut out = BytesMut::new();
    assert!(pipeline.read_all(&mut out), "{:?}", pipeline.status());
    assert_eq!(&out[..], &data[..]);

    let expected = {
        let mut digester = Crc32cDigester::new();
        digester.update(&data);
        digester.digest()
    };
    assert_eq!(pipeline.digest(), expected);
    assert!(pipeline.close());
}

#[test]
fn write_pipeline_digests_on_the_way_to_the_file() {
    let data = sample_data();
    let out_file = tempfile::NamedTempFile::new().expect("temp file");

    let fd = FdWriter::create(out_file.path(), FdWriterOptions::new());
    let mut pipeline = DigestingWriter::new(fd, Crc32cDigester::new());

    for chunk in data.chunks(1024) {
        assert!(pipeline.write(chunk));
    }
    let digest = pipeline.digest();
    assert!(pipeline.close());

    let written = std::fs::read(out_file.path()).expect("read back");
    assert_eq!(written, data);

    let expected = {
        let mut digester = Crc32cDigester::new();
        digester.update(&data);
        digester.digest()
    };
    assert_eq!(digest, expected);
}

#[test]
fn decoder_over_fd_supports_independent_readers() {
    let data = sample_data();
    let compressed = zstd::bulk::compress(&data, 3).expect("compress");

    let mut fixture = tempfile::NamedTempFile::new().expect("temp file");
    fixture.write_all(&compressed).expect("write fixture");
    fixture.flush().expect("flush fixture");

    let fd = FdReader::open(fixture.path(), FdReaderOptions::new());
    let mut decoder = ZstdDecoder::new(fd, ZstdOptions::new());
    assert!(decoder.supports_new_reader(), "descriptor sources can be duplicated");

    let mut skip = [0; 777];
    assert_eq!(decoder.read(&mut skip), 777);

    let mut other = decoder.new_reader(100).expect("independent decoder");
    let mut from_other = [0; 50];
    assert_eq!(other.read(&mut from_other), 50);
    assert_eq!(&from_other[..], &data[100..150]);
    assert_eq!(decoder.pos(), 777, "the original decoder is unaffected");
}

#[test]
fn fd_to_fd_copy_preserves_bytes() {
    let data = sample_data();
    let mut src_file = tempfile::NamedTempFile::new().expect("src temp file");
    src_file.write_all(&data).expect("write fixture");
    src_file.flush().expect("flush fixture");
    let dest_file = tempfile::NamedTempFile::new().expect("dest temp file");

    let mut reader = FdReader::open(src_file.path(), FdReaderOptions::new());
    let mut writer = FdWriter::create(dest_file.path(), FdWriterOptions::new());
    assert!(writer.write(b"prefix-"), "buffered bytes must be flushed before the kernel copy");
    assert!(reader.copy_to_fd(data.len() as u64, &mut writer));
    assert!(writer.close());

    let mut expected = b"prefix-".to_vec();
    expected.extend_from_slice(&data);
    assert_eq!(std::fs::read(dest_file.path()).expect("read back"), expected);
}
