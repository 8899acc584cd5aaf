use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use encoding_rs_io::DecodeReaderBytesBuilder;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

pub type EncodedBufReader = BufReader<encoding_rs_io::DecodeReaderBytes<File, Vec<u8>>>;

/// Open a file for line reading. UTF-16 input with a BOM is transcoded to
/// UTF-8; anything else is passed through unchanged.
pub fn open_encoded_reader(path: &Path, buffer_size: usize) -> io::Result<EncodedBufReader> {
    let file = File::open(path)?;
    let decoder = DecodeReaderBytesBuilder::new()
        .encoding(None)
        .build(file);
    Ok(BufReader::with_capacity(buffer_size, decoder))
}

/// Detect text encoding from a byte slice.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Decode a byte slice to a UTF-8 `String` using automatic encoding detection.
pub fn decode_bytes_auto(bytes: &[u8]) -> String {
    let (enc, bom_len) = match Encoding::for_bom(bytes) {
        Some((enc, len)) => (enc, len),
        None => (detect_encoding(bytes), 0),
    };
    let (cow, _, _) = enc.decode(&bytes[bom_len..]);
    cow.into_owned()
}
