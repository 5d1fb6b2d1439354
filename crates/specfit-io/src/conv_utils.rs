/// Convert a big-endian 16-bit byte buffer to `Vec<u16>`.
pub fn convert_buf_u8_u16(buf: &[u8]) -> Vec<u16> {
    buf.chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Convert `u16` samples to the big-endian byte layout used by png.
pub fn convert_buf_u16_u8(buf: &[u16]) -> Vec<u8> {
    let mut buf_u8: Vec<u8> = Vec::with_capacity(buf.len() * 2);

    for byte in buf {
        buf_u8.extend_from_slice(&byte.to_be_bytes());
    }

    buf_u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_round_trip() {
        let samples = vec![0u16, 1, 256, 65535];
        let bytes = convert_buf_u16_u8(&samples);
        assert_eq!(bytes, vec![0, 0, 0, 1, 1, 0, 255, 255]);
        assert_eq!(convert_buf_u8_u16(&bytes), samples);
    }
}
