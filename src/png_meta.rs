//! PNG text-chunk reading for images returned by the service.
//!
//! NovelAI embeds the generation parameters it actually used in a `Comment`
//! text chunk holding JSON. Reading it back gives the real seed for requests
//! that asked for a random one.

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{Cursor, Read};

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];
const CRC_LEN: usize = 4;

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

/// Collects the keyword/text pairs of every tEXt, zTXt and iTXt chunk.
///
/// Pixel data is never decoded. A truncated chunk ends the walk; what was
/// read before it is kept.
pub fn extract_text_chunks(bytes: &[u8]) -> std::io::Result<HashMap<String, String>> {
    if !is_png(bytes) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "not a PNG image",
        ));
    }

    let body = &bytes[PNG_SIGNATURE.len()..];
    let mut reader = Cursor::new(body);
    let mut texts = HashMap::new();

    while let Ok(length) = reader.read_u32::<BigEndian>() {
        let mut kind = [0u8; 4];
        if reader.read_exact(&mut kind).is_err() || &kind == b"IEND" {
            break;
        }

        let start = reader.position() as usize;
        let Some(end) = start
            .checked_add(length as usize)
            .filter(|end| *end <= body.len())
        else {
            log::debug!(
                "PNG chunk {} overruns the buffer",
                String::from_utf8_lossy(&kind)
            );
            break;
        };

        if let Some((keyword, text)) = decode_text_chunk(&kind, &body[start..end]) {
            texts.insert(keyword, text);
        }
        reader.set_position((end + CRC_LEN) as u64);
    }

    Ok(texts)
}

/// Parses the NovelAI `Comment` chunk, if present and valid JSON.
pub fn generation_comment(bytes: &[u8]) -> Option<Value> {
    let texts = extract_text_chunks(bytes).ok()?;
    let comment = texts.get("Comment").or_else(|| texts.get("comment"))?;
    serde_json::from_str::<Value>(comment.trim()).ok()
}

/// The seed the service reports having used, if the image carries one.
pub fn resolved_seed(bytes: &[u8]) -> Option<i64> {
    match generation_comment(bytes)?.get("seed")? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_u64().and_then(|value| i64::try_from(value).ok())),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Decodes one text chunk body into its keyword and text. Other chunk
/// kinds, unknown compression methods and invalid UTF-8 yield `None`.
fn decode_text_chunk(kind: &[u8; 4], data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|&byte| byte == 0)?;
    let keyword = std::str::from_utf8(&data[..nul]).ok()?.to_string();
    let rest = &data[nul + 1..];

    let text = match kind {
        b"tEXt" => std::str::from_utf8(rest).ok()?.to_string(),
        b"zTXt" => {
            // Method 0 (zlib) is the only one defined.
            let (&method, compressed) = rest.split_first()?;
            if method != 0 {
                return None;
            }
            inflate(compressed)?
        }
        b"iTXt" => {
            if rest.len() < 2 {
                return None;
            }
            let (compressed, method) = (rest[0], rest[1]);
            // Language tag and translated keyword precede the text.
            let mut fields = rest[2..].splitn(3, |&byte| byte == 0);
            let (_language, _translated) = (fields.next()?, fields.next()?);
            let text = fields.next()?;
            match (compressed, method) {
                (0, _) => std::str::from_utf8(text).ok()?.to_string(),
                (1, 0) => inflate(text)?,
                _ => return None,
            }
        }
        _ => return None,
    };

    Some((keyword, text))
}

fn inflate(compressed: &[u8]) -> Option<String> {
    let mut text = String::new();
    ZlibDecoder::new(compressed).read_to_string(&mut text).ok()?;
    Some(text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Signature, a 1x1 RGB header, `chunks` in order, then IEND. CRCs are
    /// zero since the reader never checks them.
    pub(crate) fn png_with_chunks(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let header: [u8; 13] = [0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0];
        let mut out = PNG_SIGNATURE.to_vec();
        for (kind, data) in std::iter::once((b"IHDR", header.to_vec()))
            .chain(chunks.iter().map(|(kind, data)| (*kind, data.clone())))
            .chain(std::iter::once((b"IEND", Vec::new())))
        {
            out.write_u32::<BigEndian>(data.len() as u32)
                .expect("write to Vec cannot fail");
            out.extend_from_slice(kind);
            out.extend_from_slice(&data);
            out.write_u32::<BigEndian>(0).expect("write to Vec cannot fail");
        }
        out
    }

    fn keyed(keyword: &str, payload: &[u8]) -> Vec<u8> {
        [keyword.as_bytes(), &[0u8][..], payload].concat()
    }

    pub(crate) fn novelai_png(comment: &str) -> Vec<u8> {
        png_with_chunks(&[
            (b"tEXt", keyed("Software", b"NovelAI")),
            (b"tEXt", keyed("Comment", comment.as_bytes())),
        ])
    }

    fn zlib(text: &str) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(text.as_bytes())
            .expect("failed to compress text");
        encoder.finish().expect("failed to finish zlib stream")
    }

    #[test]
    fn test_extract_text_chunks_reads_all_chunk_types() {
        let ztxt = [&[0u8][..], zlib("deflated").as_slice()].concat();
        let compressed_itxt = [&b"\x01\x00\x00\x00"[..], zlib("{}").as_slice()].concat();
        let png = png_with_chunks(&[
            (b"tEXt", keyed("Title", b"plain")),
            (b"zTXt", keyed("Source", &ztxt)),
            (b"iTXt", keyed("Description", b"\x00\x00en\x00\x00international")),
            (b"iTXt", keyed("Comment", &compressed_itxt)),
        ]);

        let texts = extract_text_chunks(&png).expect("chunk extraction failed");
        assert_eq!(texts.get("Title").map(String::as_str), Some("plain"));
        assert_eq!(texts.get("Source").map(String::as_str), Some("deflated"));
        assert_eq!(
            texts.get("Description").map(String::as_str),
            Some("international")
        );
        assert_eq!(texts.get("Comment").map(String::as_str), Some("{}"));
    }

    #[test]
    fn test_unknown_compression_is_skipped() {
        let png = png_with_chunks(&[(b"zTXt", keyed("Source", b"\x07garbage"))]);
        let texts = extract_text_chunks(&png).expect("chunk extraction failed");
        assert!(texts.is_empty());
    }

    #[test]
    fn test_extract_text_chunks_rejects_non_png() {
        assert!(extract_text_chunks(b"\xff\xd8\xff\xe0 jpeg").is_err());
    }

    #[test]
    fn test_extract_text_chunks_stops_on_truncated_chunk() {
        let mut png = novelai_png(r#"{"seed":1}"#);
        png.truncate(png.len() - 20);
        let texts = extract_text_chunks(&png).expect("truncated PNG should not error");
        assert_eq!(texts.get("Software").map(String::as_str), Some("NovelAI"));
        assert!(!texts.contains_key("Comment"));
    }

    #[test]
    fn test_resolved_seed_reads_novelai_comment() {
        let png = novelai_png(r#"{"uc":"lowres","steps":28,"seed":3141592653,"scale":11}"#);
        assert_eq!(resolved_seed(&png), Some(3_141_592_653));
    }

    #[test]
    fn test_resolved_seed_accepts_string_seed() {
        let png = novelai_png(r#"{"seed":" 42 "}"#);
        assert_eq!(resolved_seed(&png), Some(42));
    }

    #[test]
    fn test_resolved_seed_absent_without_comment() {
        assert_eq!(resolved_seed(&png_with_chunks(&[])), None);
        assert_eq!(resolved_seed(&novelai_png("not json")), None);
        assert_eq!(resolved_seed(b"GIF89a"), None);
    }
}
