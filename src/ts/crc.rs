use crc::{Crc, CRC_32_MPEG_2};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// CRC-32/MPEG-2 (reflect=false, init=0xFFFFFFFF, xorout=0).
///
/// A section including its trailing CRC field sums to zero, so
/// `crc32(section) == 0` is the validity check.
#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(crc32(&[0x01, 0x01]), 0xD66FB816);
    }

    #[test]
    fn section_with_appended_crc_sums_to_zero() {
        let mut section = vec![0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00];
        section.extend_from_slice(&[0x00, 0x01, 0xE1, 0x00]);
        let crc = crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(crc32(&section), 0);
    }
}
