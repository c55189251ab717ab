// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Contract tests spanning the in-memory streams and adapters.

use bytes::BytesMut;
use rill::{
    BufferOptions, BufferedWriter, BytesReader, BytesWriter, FlushType, NullWriter, Position, PositionShiftingReader,
    Reader, Sink, Status, Writer,
};

#[test]
fn write_then_read_round_trips() {
    let mut writer = BytesWriter::new();
    assert!(writer.write(b"alpha "));
    assert!(writer.write_bytes(bytes::Bytes::from_static(b"beta ")));
    assert!(writer.write_chars(3, b'x'));
    assert!(writer.write_f64(2.5));
    assert!(writer.close());

    let mut reader = BytesReader::new(writer.into_bytes());
    let mut out = BytesMut::new();
    assert!(reader.read_all(&mut out));
    assert_eq!(&out[..], b"alpha beta xxx2.5");
}

#[test]
fn copy_to_transfers_the_exact_length() {
    let mut reader = BytesReader::new(&b"0123456789"[..]);
    let mut writer = BytesWriter::new();
    assert!(reader.copy_to(7, &mut writer));
    assert_eq!(writer.written(), b"0123456");
    assert!(!reader.copy_to(10, &mut writer), "only 3 bytes remain");
    assert!(reader.ok());
    assert_eq!(writer.written(), b"0123456789");
}

#[test]
fn pos_is_monotonic_under_non_seeking_operations() {
    let mut reader = BytesReader::new(&b"a longer stretch of bytes to walk over"[..]);
    let mut last = reader.pos();
    let mut dest = [0; 3];
    while reader.read(&mut dest) > 0 {
        assert!(reader.pos() >= last);
        last = reader.pos();
    }
}

#[test]
fn seek_seek_read_equals_direct_seek_read() {
    let data = b"the reader seek law must hold for every position pair";
    for (p1, p2) in [(0u64, 10u64), (20, 5), (5, 5), (40, 12)] {
        let mut walked = BytesReader::new(&data[..]);
        let mut direct = BytesReader::new(&data[..]);

        assert!(walked.seek(p1));
        assert!(walked.seek(p2));
        assert!(direct.seek(p2));

        let mut a = [0; 8];
        let mut b = [0; 8];
        assert_eq!(walked.read(&mut a), direct.read(&mut b));
        assert_eq!(a, b, "seek({p1}); seek({p2}) diverged from seek({p2})");
    }
}

#[test]
fn failed_streams_stay_failed() {
    struct RefusingSink;
    impl Sink for RefusingSink {
        fn write_internal(&mut self, _src: &[u8], _pos: Position) -> Result<(), Status> {
            Err(Status::internal("refused"))
        }
    }

    let mut writer = BufferedWriter::new(
        RefusingSink,
        BufferOptions::new().with_min_buffer_size(4).with_max_buffer_size(8),
    );
    assert!(writer.write(b"fits"));
    assert!(!writer.flush(FlushType::FromObject));
    assert!(!writer.ok());
    assert!(!writer.write(b"more"), "operations fast-fail after a failure");
    assert!(!writer.close());
    assert!(!writer.ok(), "closing does not heal a failure");
}

#[test]
fn null_writer_swallows_pipelines() {
    let mut reader = BytesReader::new(b"x".repeat(10_000));
    let mut sink = NullWriter::new();
    assert!(reader.copy_to(10_000, &mut sink));
    assert_eq!(sink.pos(), 10_000);
}

#[test]
fn shifted_reader_over_shifted_writer_round_trips() {
    let mut writer = BytesWriter::new();
    {
        let mut shifted = rill::PositionShiftingWriter::new(&mut writer, 4096);
        assert_eq!(shifted.pos(), 4096);
        assert!(shifted.write(b"payload at a logical offset"));
        assert_eq!(shifted.pos(), 4096 + 27);
        assert!(shifted.close());
    }
    assert!(writer.is_open(), "borrowed inner writer stays open");

    let mut shifted = PositionShiftingReader::new(BytesReader::new(writer.into_bytes()), 4096);
    assert!(shifted.seek(4096 + 11));
    let mut dest = [0; 16];
    assert_eq!(shifted.read(&mut dest), 16);
    assert_eq!(&dest, b"a logical offset");
}

#[test]
fn reading_at_the_position_limit_fails_instead_of_wrapping() {
    use rill::{BufferedReader, Source, StatusKind};

    struct EndlessSource;
    impl Source for EndlessSource {
        fn read_internal(&mut self, _min_length: usize, max_length: usize, _pos: Position, dest: &mut [u8]) -> usize {
            dest[..max_length].fill(0xAA);
            max_length
        }
    }

    let mut reader = BufferedReader::with_start_pos(EndlessSource, BufferOptions::new(), Position::MAX - 2);
    let mut dest = [0; 16];
    let n = reader.read(&mut dest);
    assert_eq!(n, 2, "only the bytes below the position limit are readable");
    assert!(!reader.ok());
    assert_eq!(reader.status().map(Status::kind), Some(StatusKind::ResourceExhausted));
}

#[test]
fn read_bytes_across_the_window_boundary_copies() {
    let mut reader = BytesReader::new(&b"abc"[..]);
    let taken = reader.read_bytes(10);
    assert_eq!(&taken[..], b"abc", "short result at end of source");
    assert!(reader.ok());
}
