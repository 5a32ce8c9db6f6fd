//! CRC-16/CCITT-FALSE checksum used by link frames.

/// Compute the CRC-16/CCITT-FALSE of `bytes` (poly 0x1021, init 0xFFFF).
///
/// Both endpoints of a link run this over the same slice of a frame, from
/// the first LENGTH byte through the last payload byte.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
