//! Body framing: one flag byte, then either the raw body or its DEFLATE stream.
//!
//! The frame is built before encryption, so the flag is as private as the body.

use anyhow::{bail, Context};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

const FRAME_RAW: u8 = 0;
const FRAME_DEFLATE: u8 = 1;
const ESTIMATE_SAMPLE_BYTES: usize = 4 * 1024;

pub fn deflate(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).context("deflate body")?;
    encoder.finish().context("finish deflate stream")
}

/// Inflate at most `limit` bytes; anything larger is rejected.
pub fn inflate(data: &[u8], limit: usize) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .context("inflate body")?;
    if out.len() > limit {
        bail!("inflated body exceeds {limit} bytes");
    }
    Ok(out)
}

/// Fraction of bytes DEFLATE would save, judged on a leading sample.
pub fn estimate_savings(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let sample = &data[..data.len().min(ESTIMATE_SAMPLE_BYTES)];
    match deflate(sample) {
        Ok(compressed) => (1.0 - compressed.len() as f64 / sample.len() as f64).max(0.0),
        Err(_) => 0.0,
    }
}

pub fn frame(body: &[u8], compress: bool) -> anyhow::Result<Vec<u8>> {
    if compress {
        let compressed = deflate(body)?;
        // Keep the raw form when DEFLATE does not actually help.
        if compressed.len() < body.len() {
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(FRAME_DEFLATE);
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(FRAME_RAW);
    out.extend_from_slice(body);
    Ok(out)
}

pub fn is_compressed(framed: &[u8]) -> bool {
    framed.first() == Some(&FRAME_DEFLATE)
}

/// Returns the body and whether it had been compressed.
pub fn unframe(framed: &[u8], limit: usize) -> anyhow::Result<(Vec<u8>, bool)> {
    match framed.split_first() {
        Some((&FRAME_RAW, body)) => {
            if body.len() > limit {
                bail!("body exceeds {limit} bytes");
            }
            Ok((body.to_vec(), false))
        }
        Some((&FRAME_DEFLATE, body)) => Ok((inflate(body, limit)?, true)),
        Some((flag, _)) => bail!("unknown body frame flag {flag}"),
        None => bail!("empty body frame"),
    }
}
