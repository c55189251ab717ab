// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end decoder tests against fixtures produced by the `zstd` crate's
//! encoders.

use std::cell::RefCell;
use std::rc::Rc;

use rill::{BufferOptions, BufferedReader, BytesReader, Position, Reader, Source, Status, StatusKind};
use rill_zstd::{DecoderDictionary, ZstdDecoder, ZstdOptions};

fn sample_data() -> Vec<u8> {
    b"The quick brown fox ".repeat(1000)
}

/// Compresses with the frame content size recorded in the header.
fn compress(data: &[u8]) -> Vec<u8> {
    zstd::bulk::compress(data, 3).expect("compression succeeds")
}

#[test]
fn round_trip_restores_the_original() {
    let data = sample_data();
    let compressed = compress(&data);

    let mut decoder = ZstdDecoder::new(BytesReader::new(compressed), ZstdOptions::new());
    assert_eq!(decoder.size().ok(), Some(20_000), "size comes from the frame header");

    let mut out = bytes::BytesMut::new();
    assert!(decoder.read_all(&mut out));
    assert_eq!(&out[..], &data[..]);

    let mut more = [0; 16];
    assert_eq!(decoder.read(&mut more), 0, "a second read finds nothing");
    assert!(decoder.ok(), "end-of-stream is not a failure");
    assert!(decoder.close());
}

#[test]
fn single_byte_source_still_decodes() {
    /// Serves the compressed bytes at most one byte per refill.
    struct Trickle {
        data: Vec<u8>,
        offset: usize,
    }

    impl Source for Trickle {
        fn read_internal(&mut self, min_length: usize, _max_length: usize, pos: Position, dest: &mut [u8]) -> usize {
            assert_eq!(pos as usize, self.offset);
            // Serve the bare minimum the contract allows, one byte at a time
            // in the common case.
            let want = min_length.max(1).min(dest.len());
            let n = want.min(self.data.len() - self.offset);
            dest[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
            self.offset += n;
            n
        }
    }

    let data = sample_data();
    let compressed = compress(&data);
    let source = Trickle {
        data: compressed,
        offset: 0,
    };
    let src = BufferedReader::new(source, BufferOptions::new().with_min_buffer_size(1).with_max_buffer_size(16));

    let mut decoder = ZstdDecoder::new(src, ZstdOptions::new());
    let mut out = bytes::BytesMut::new();
    assert!(decoder.read_all(&mut out));
    assert_eq!(&out[..], &data[..]);
}

#[test]
fn stable_output_path_matches_the_general_path() {
    let data = sample_data();
    let compressed = compress(&data);

    // One read covering the whole declared size takes the direct route into
    // the caller's buffer and enables the stable-output promise.
    let mut direct = ZstdDecoder::new(BytesReader::new(compressed.clone()), ZstdOptions::new());
    let mut direct_out = vec![0; data.len()];
    assert_eq!(direct.read(&mut direct_out), data.len());

    // Small chunked reads stay on the general buffered path.
    let mut chunked = ZstdDecoder::new(BytesReader::new(compressed), ZstdOptions::new());
    let mut chunked_out = Vec::new();
    let mut piece = [0; 293];
    loop {
        let n = chunked.read(&mut piece);
        chunked_out.extend_from_slice(&piece[..n]);
        if n < piece.len() {
            break;
        }
    }

    assert_eq!(direct_out, data);
    assert_eq!(chunked_out, data);
}

#[test]
fn truncated_stream_fails_when_not_growing() {
    let data = sample_data();
    let mut compressed = compress(&data);
    compressed.truncate(compressed.len() - 10);

    let mut decoder = ZstdDecoder::new(BytesReader::new(compressed), ZstdOptions::new());
    let mut out = bytes::BytesMut::new();
    assert!(!decoder.read_all(&mut out));
    assert!(!decoder.ok());
    let status = decoder.status().expect("failure latched");
    assert_eq!(status.kind(), StatusKind::InvalidArgument);
    assert_eq!(status.message(), "Truncated Zstd-compressed stream");
    assert!(
        status.to_string().contains("at uncompressed byte"),
        "{status}",
    );
}

/// A source over shared bytes that can gain more bytes after end-of-source
/// was already reported.
#[derive(Clone)]
struct SharedSource {
    data: Rc<RefCell<Vec<u8>>>,
    offset: usize,
}

impl Source for SharedSource {
    fn read_internal(&mut self, _min_length: usize, max_length: usize, _pos: Position, dest: &mut [u8]) -> usize {
        let data = self.data.borrow();
        // A short count below `min_length` tells the wrapper the source has
        // run dry for now; more bytes may appear in `data` later.
        let n = (data.len() - self.offset).min(max_length);
        dest[..n].copy_from_slice(&data[self.offset..self.offset + n]);
        self.offset += n;
        n
    }
}

#[test]
fn growing_source_resumes_after_more_bytes_arrive() {
    let data = sample_data();
    let compressed = compress(&data);
    let (head, tail) = compressed.split_at(compressed.len() - 10);

    let shared = Rc::new(RefCell::new(head.to_vec()));
    let src = BufferedReader::new(
        SharedSource {
            data: Rc::clone(&shared),
            offset: 0,
        },
        BufferOptions::new(),
    );

    let mut decoder = ZstdDecoder::new(src, ZstdOptions::new().with_growing_source(true));
    let mut out = bytes::BytesMut::new();
    assert!(!decoder.read_all(&mut out), "the stream is not complete yet");
    assert!(decoder.ok(), "running dry on a growing source is not a failure");
    assert!(decoder.is_truncated());
    assert!(out.len() < data.len());

    // The missing compressed bytes arrive; reading resumes and finishes.
    shared.borrow_mut().extend_from_slice(tail);
    assert!(decoder.read_all(&mut out));
    assert_eq!(&out[..], &data[..]);
    assert!(!decoder.is_truncated());
}

#[test]
fn rewind_replays_the_frame() {
    let data = sample_data();
    let compressed = compress(&data);

    let mut decoder = ZstdDecoder::new(BytesReader::new(compressed), ZstdOptions::new());
    assert!(decoder.supports_rewind());
    assert!(!decoder.supports_random_access());

    // Read far enough that the buffer window has moved past the target, so
    // seeking back really does replay the frame.
    let mut first = [0; 8000];
    assert_eq!(decoder.read(&mut first), 8000);

    assert!(decoder.seek(10));
    let mut replay = [0; 100];
    assert_eq!(decoder.read(&mut replay), 100);
    assert_eq!(&replay[..], &data[10..110]);
}

#[test]
fn new_reader_decompresses_independently() {
    let data = sample_data();
    let compressed = compress(&data);

    let mut decoder = ZstdDecoder::new(BytesReader::new(compressed), ZstdOptions::new());
    assert!(decoder.supports_new_reader());

    let mut skip = [0; 5000];
    assert_eq!(decoder.read(&mut skip), 5000);

    let mut other = decoder.new_reader(40).expect("independent reader");
    let mut from_other = [0; 60];
    assert_eq!(other.read(&mut from_other), 60);
    assert_eq!(&from_other[..], &data[40..100]);

    // The original keeps its own position.
    assert_eq!(decoder.pos(), 5000);
}

#[test]
fn skippable_frame_reports_size_zero() {
    // Magic 0x184D2A50, 4-byte little-endian length, then opaque payload.
    let mut frame = Vec::new();
    frame.extend_from_slice(&0x184D_2A50u32.to_le_bytes());
    frame.extend_from_slice(&8u32.to_le_bytes());
    frame.extend_from_slice(b"metadata");

    let mut decoder = ZstdDecoder::new(BytesReader::new(frame), ZstdOptions::new());
    assert_eq!(decoder.size().ok(), Some(0));
    let mut out = [0; 16];
    assert_eq!(decoder.read(&mut out), 0);
    assert!(decoder.ok());
}

#[test]
fn frame_exceeding_its_declared_size_fails_with_overflow() {
    // Hand-assembled frame (RFC 8878): magic, a header declaring 300 bytes
    // of content in a 2-byte field, a 1 KiB window, then two raw blocks
    // carrying 400 bytes in total. The declared size understates the frame.
    let mut frame = Vec::new();
    frame.extend_from_slice(&0xFD2F_B528u32.to_le_bytes());
    frame.push(0x40); // frame content size in a 2-byte field
    frame.push(0x00); // window descriptor: 1 KiB
    frame.extend_from_slice(&(300u16 - 256).to_le_bytes());
    let first_block = 300u32 << 3; // raw, not last
    frame.extend_from_slice(&first_block.to_le_bytes()[..3]);
    frame.extend_from_slice(&[b'a'; 300]);
    let last_block = (100u32 << 3) | 1; // raw, last
    frame.extend_from_slice(&last_block.to_le_bytes()[..3]);
    frame.extend_from_slice(&[b'b'; 100]);

    let mut decoder = ZstdDecoder::new(BytesReader::new(frame), ZstdOptions::new());
    assert_eq!(decoder.size().ok(), Some(300), "the header declares 300 bytes");

    // A read covering the declared size takes the stable-output route; the
    // frame overrunning its declaration must fail instead of looking like a
    // clean short read.
    let mut out = [0; 300];
    assert_eq!(decoder.read(&mut out), 300, "bytes produced before the failure are delivered");
    assert!(out.iter().all(|&b| b == b'a'));
    assert!(!decoder.ok());
    let status = decoder.status().expect("failure latched");
    assert_eq!(status.kind(), StatusKind::ResourceExhausted);
    assert!(status.to_string().contains("at uncompressed byte"), "{status}");
}

#[test]
fn dictionary_round_trip() {
    let dict = b"The quick brown fox jumps over the lazy dog, repeatedly and verbosely.".to_vec();
    let data = sample_data();

    let mut compressor = zstd::bulk::Compressor::with_dictionary(3, &dict).expect("compressor");
    let compressed = compressor.compress(&data).expect("compress with dictionary");

    let options = ZstdOptions::new().with_dictionary(DecoderDictionary::new(dict));
    let mut decoder = ZstdDecoder::new(BytesReader::new(compressed), options);
    let mut out = bytes::BytesMut::new();
    assert!(decoder.read_all(&mut out), "{:?}", decoder.status().map(Status::to_string));
    assert_eq!(&out[..], &data[..]);
}

#[test]
fn unknown_content_size_leaves_size_unimplemented() {
    // The streaming encoder does not pledge a source size, so the frame
    // header carries no content size.
    let data = sample_data();
    let compressed = zstd::stream::encode_all(&data[..], 3).expect("streaming compression");

    let mut decoder = ZstdDecoder::new(BytesReader::new(compressed), ZstdOptions::new());
    assert_eq!(decoder.size().err().map(|s| s.kind()), Some(StatusKind::Unimplemented));

    let mut out = bytes::BytesMut::new();
    assert!(decoder.read_all(&mut out));
    assert_eq!(&out[..], &data[..]);
}
