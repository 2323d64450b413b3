use std::io::Read;

use bzip2::read::MultiBzDecoder;

/// Whether `data` starts with the bzip2 stream magic.
pub fn is_bz2(data: &[u8]) -> bool {
    data.len() >= 4 && &data[..3] == b"BZh" && (b'1'..=b'9').contains(&data[3])
}

/// Decompress a (possibly multi-stream) bzip2 buffer.
pub fn decompress_bz2(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    MultiBzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
