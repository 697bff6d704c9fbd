// Response compression negotiated from Accept-Encoding

use crate::HttpResponse;
use std::io::Write;
use tracing::{trace, warn};

/// Bodies shorter than this are sent as-is.
pub const MIN_COMPRESS_SIZE: usize = 200;

const GZIP_LEVEL: u32 = 6;
const BROTLI_QUALITY: i32 = 4;

/// Content-type prefixes that are already compressed.
const INCOMPRESSIBLE: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "application/zip",
    "application/gzip",
    "application/x-gzip",
    "application/octet-stream",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Brotli,
    Gzip,
    Deflate,
}

impl Encoding {
    /// Pick an encoding from an `Accept-Encoding` value.
    ///
    /// Preference is br, then gzip, then deflate; entries with `q=0` are
    /// refused and `*` stands for gzip.
    pub fn negotiate(accept_encoding: &str) -> Option<Self> {
        let mut accepted = Vec::new();
        for item in accept_encoding.split(',') {
            let mut parts = item.split(';');
            let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let refused = parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            if !refused && !name.is_empty() {
                accepted.push(name);
            }
        }

        let has = |name: &str| accepted.iter().any(|a| a == name);
        if has("br") {
            Some(Encoding::Brotli)
        } else if has("gzip") || has("*") {
            Some(Encoding::Gzip)
        } else if has("deflate") {
            Some(Encoding::Deflate)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    pub fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Encoding::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::new(GZIP_LEVEL),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
            Encoding::Deflate => {
                let mut encoder = flate2::write::ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::new(GZIP_LEVEL),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
            Encoding::Brotli => {
                let params = brotli::enc::BrotliEncoderParams {
                    quality: BROTLI_QUALITY,
                    ..Default::default()
                };
                let mut output = Vec::with_capacity(data.len() / 2);
                brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut output, &params)?;
                Ok(output)
            }
        }
    }
}

fn should_compress(response: &HttpResponse) -> bool {
    if response.body.len() < MIN_COMPRESS_SIZE {
        return false;
    }
    if let Some(existing) = response.header("content-encoding")
        && !existing.is_empty()
        && existing != "identity"
    {
        return false;
    }
    match response.header("content-type") {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            !INCOMPRESSIBLE.iter().any(|prefix| ct.starts_with(prefix))
        }
        None => true,
    }
}

/// Compress the body in place when it is worth it.
///
/// The body is only replaced when the encoded form is smaller; `Vary`
/// always gains `Accept-Encoding` for eligible responses.
pub fn compress_response(response: &mut HttpResponse, encoding: Encoding) {
    if !should_compress(response) {
        return;
    }

    let vary = match response.header("vary") {
        Some(existing) if existing.to_ascii_lowercase().contains("accept-encoding") => {
            existing.to_string()
        }
        Some(existing) if !existing.is_empty() => format!("{}, Accept-Encoding", existing),
        _ => "Accept-Encoding".to_string(),
    };
    response.set_header("vary", vary);

    match encoding.compress(&response.body) {
        Ok(compressed) if compressed.len() < response.body.len() => {
            trace!(
                encoding = encoding.as_str(),
                from = response.body.len(),
                to = compressed.len(),
                "Compressed response"
            );
            response.body = compressed;
            response.headers.remove("content-length");
            response.set_header("content-encoding", encoding.as_str());
        }
        Ok(_) => {}
        Err(e) => warn!(encoding = encoding.as_str(), error = %e, "Compression failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn page() -> HttpResponse {
        HttpResponse::new(200)
            .with_header("content-type", "text/html")
            .with_body("<p>trellis</p>".repeat(64).into_bytes())
    }

    #[test]
    fn test_negotiate_preference() {
        assert_eq!(Encoding::negotiate("gzip, deflate, br"), Some(Encoding::Brotli));
        assert_eq!(Encoding::negotiate("deflate, gzip"), Some(Encoding::Gzip));
        assert_eq!(Encoding::negotiate("deflate"), Some(Encoding::Deflate));
        assert_eq!(Encoding::negotiate("*"), Some(Encoding::Gzip));
        assert_eq!(Encoding::negotiate("identity"), None);
        assert_eq!(Encoding::negotiate(""), None);
    }

    #[test]
    fn test_negotiate_respects_zero_quality() {
        assert_eq!(Encoding::negotiate("br;q=0, gzip;q=0.8"), Some(Encoding::Gzip));
        assert_eq!(Encoding::negotiate("gzip; q=0"), None);
    }

    #[test]
    fn test_gzip_response() {
        let mut resp = page();
        let original = resp.body.clone();
        compress_response(&mut resp, Encoding::Gzip);

        assert_eq!(resp.header("content-encoding"), Some("gzip"));
        assert_eq!(resp.header("vary"), Some("Accept-Encoding"));
        assert!(resp.body.len() < original.len());

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(resp.body.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_brotli_response() {
        let mut resp = page();
        let original = resp.body.clone();
        compress_response(&mut resp, Encoding::Brotli);
        assert_eq!(resp.header("content-encoding"), Some("br"));

        let mut decoded = Vec::new();
        brotli::Decompressor::new(resp.body.as_slice(), 4096)
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_small_or_binary_bodies_untouched() {
        let mut small = HttpResponse::new(200).with_body(b"tiny".to_vec());
        compress_response(&mut small, Encoding::Gzip);
        assert!(small.header("content-encoding").is_none());
        assert!(small.header("vary").is_none());

        let mut image = page().with_header("content-type", "image/png");
        compress_response(&mut image, Encoding::Gzip);
        assert!(image.header("content-encoding").is_none());
    }

    #[test]
    fn test_already_encoded_untouched() {
        let mut resp = page().with_header("content-encoding", "br");
        let before = resp.body.clone();
        compress_response(&mut resp, Encoding::Gzip);
        assert_eq!(resp.body, before);
        assert_eq!(resp.header("content-encoding"), Some("br"));
    }

    #[test]
    fn test_vary_appended() {
        let mut resp = page().with_header("vary", "Origin");
        compress_response(&mut resp, Encoding::Deflate);
        assert_eq!(resp.header("vary"), Some("Origin, Accept-Encoding"));
        assert_eq!(resp.header("content-encoding"), Some("deflate"));
    }
}
