//! Transparent payload decoding
//!
//! Marketplace exports arrive either plain or gzip-compressed, with no
//! reliable Content-Encoding header. The decoder peeks the leading bytes and
//! gunzips on the fly when they carry the gzip signature; otherwise the
//! peeked bytes are re-served verbatim ahead of the underlying source.

use flate2::read::GzDecoder;
use std::io::{self, Read};

/// Leading bytes of every gzip stream
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const PEEK_LEN: usize = 4;

/// Re-serves already-peeked leading bytes before delegating to the inner
/// source. A short inner read is passed through honestly; no bytes are ever
/// fabricated past end-of-stream.
struct PrependReader<R> {
    head: Vec<u8>,
    pos: usize,
    inner: R,
}

impl<R: Read> Read for PrependReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        if self.pos < self.head.len() {
            let take = (self.head.len() - self.pos).min(buf.len());
            buf[..take].copy_from_slice(&self.head[self.pos..self.pos + take]);
            self.pos += take;
            filled = take;
        }
        if filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(n) => filled += n,
                // Buffered bytes were already copied out; surface the error
                // on the next call instead of losing them.
                Err(e) if filled == 0 => return Err(e),
                Err(_) => {}
            }
        }
        Ok(filled)
    }
}

/// Wrap a raw byte source in a functionally drop-in reader that gunzips when
/// the stream leads with [`GZIP_MAGIC`] and passes bytes through unchanged
/// otherwise.
pub fn transparent_reader<'a, R: Read + 'a>(mut inner: R) -> io::Result<Box<dyn Read + Send + 'a>>
where
    R: Send,
{
    let mut head = [0u8; PEEK_LEN];
    let mut filled = 0;
    while filled < PEEK_LEN {
        let n = inner.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let restored = PrependReader {
        head: head[..filled].to_vec(),
        pos: 0,
        inner,
    };
    if filled >= GZIP_MAGIC.len() && head[..GZIP_MAGIC.len()] == GZIP_MAGIC {
        Ok(Box::new(GzDecoder::new(restored)))
    } else {
        Ok(Box::new(restored))
    }
}

/// Decode a fully fetched payload into plain bytes.
pub fn decode_payload(raw: &[u8]) -> io::Result<Vec<u8>> {
    let mut reader = transparent_reader(raw)?;
    let mut plain = Vec::with_capacity(raw.len());
    reader.read_to_end(&mut plain)?;
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_payload_is_decompressed() {
        let original = br#"[{"market_hash_name":"AK-47 | Redline"}]"#;
        let compressed = gzip(original);
        assert_eq!(&compressed[..2], &GZIP_MAGIC);
        let decoded = decode_payload(&compressed).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_plain_payload_passes_through_bit_for_bit() {
        let original = b"{\"a\":1}";
        let decoded = decode_payload(original).unwrap();
        assert_eq!(&decoded[..4], &original[..4]);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_payload_shorter_than_peek_window() {
        let original = b"[]";
        let decoded = decode_payload(original).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_source_yields_empty_stream() {
        let decoded = decode_payload(b"").unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_partial_reads_pull_from_underlying_source() {
        let original = b"abcdefghij";
        let mut reader = transparent_reader(&original[..]).unwrap();
        // First read spans the peeked head and the underlying source.
        let mut buf = [0u8; 6];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcdef");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"ghij");
    }
}
