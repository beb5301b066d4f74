use super::{
    crc32, desc::assemble_descriptors, parse_descriptors, pat::finalize_section, Descriptor, Psi,
    PsiError, CRC32_SIZE, PSI_TABLE_MAX_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtItem {
    pub pnr: u16,
    pub eit_schedule: bool,
    pub eit_present_following: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

/// Service Description Table (actual TS, table id 0x42).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sdt {
    pub stream_id: u16,
    pub version: u8,
    pub current_next: bool,
    pub network_id: u16,
    pub items: Vec<SdtItem>,
}

impl Sdt {
    pub fn parse(psi: &Psi) -> Result<Sdt, PsiError> {
        let section = psi.section();
        if section.len() < 11 + CRC32_SIZE {
            return Err(PsiError::NotReady);
        }
        if section[0] != 0x42 && section[0] != 0x46 {
            return Err(PsiError::TableId(section[0]));
        }
        if section[1] & 0xC0 != 0x80 {
            return Err(PsiError::FixedBits);
        }
        if section.len() > PSI_TABLE_MAX_SIZE {
            return Err(PsiError::Length);
        }
        if crc32(section) != 0 {
            return Err(PsiError::Crc);
        }

        let mut sdt = Sdt {
            stream_id: u16::from_be_bytes([section[3], section[4]]),
            version: (section[5] & 0x3E) >> 1,
            current_next: section[5] & 0x01 != 0,
            network_id: u16::from_be_bytes([section[8], section[9]]),
            items: Vec::new(),
        };

        let body_end = section.len() - CRC32_SIZE;
        let mut pos = 11;
        while pos + 5 <= body_end {
            let pnr = u16::from_be_bytes([section[pos], section[pos + 1]]);
            let eit_flags = section[pos + 2];
            let rs_ca = section[pos + 3];
            let loop_len = (((rs_ca & 0x0F) as usize) << 8) | section[pos + 4] as usize;
            pos += 5;
            if pos + loop_len > body_end {
                return Err(PsiError::Truncated);
            }
            sdt.items.push(SdtItem {
                pnr,
                eit_schedule: eit_flags & 0x02 != 0,
                eit_present_following: eit_flags & 0x01 != 0,
                running_status: rs_ca >> 5,
                free_ca_mode: rs_ca & 0x10 != 0,
                descriptors: parse_descriptors(&section[pos..pos + loop_len]),
            });
            pos += loop_len;
        }
        Ok(sdt)
    }

    pub fn assemble(&self, psi: &mut Psi) {
        let mut section = vec![
            0x42,
            0x80 | 0x30,
            0x00,
            (self.stream_id >> 8) as u8,
            self.stream_id as u8,
            0xC0 | ((self.version << 1) & 0x3E) | self.current_next as u8,
            0x00,
            0x00,
            (self.network_id >> 8) as u8,
            self.network_id as u8,
            0xFF,
        ];
        for item in &self.items {
            section.extend_from_slice(&item.pnr.to_be_bytes());
            section.push(
                0xFC | ((item.eit_schedule as u8) << 1) | item.eit_present_following as u8,
            );
            let mut loop_bytes = Vec::new();
            assemble_descriptors(&item.descriptors, &mut loop_bytes);
            section.push(
                (item.running_status << 5)
                    | ((item.free_ca_mode as u8) << 4)
                    | ((loop_bytes.len() >> 8) as u8 & 0x0F),
            );
            section.push(loop_bytes.len() as u8);
            section.extend_from_slice(&loop_bytes);
        }
        finalize_section(&mut section);
        psi.set_section(&section);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::PsiKind;

    #[test]
    fn sdt_roundtrip() {
        let sdt = Sdt {
            stream_id: 1,
            version: 0,
            current_next: true,
            network_id: 0x2000,
            items: vec![SdtItem {
                pnr: 1,
                eit_schedule: false,
                eit_present_following: true,
                running_status: 4,
                free_ca_mode: true,
                descriptors: vec![Descriptor::Service {
                    service_type: 1,
                    provider: b"Prov".to_vec(),
                    name: b"Chan".to_vec(),
                }],
            }],
        };
        let mut psi = Psi::new(PsiKind::Sdt, 17);
        sdt.assemble(&mut psi);
        assert!(psi.check_crc());
        assert_eq!(Sdt::parse(&psi).unwrap(), sdt);
    }
}
