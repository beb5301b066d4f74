use super::{
    crc32, desc::assemble_descriptors, parse_descriptors, pat::finalize_section, Descriptor, Psi,
    PsiError, CRC32_SIZE, PSI_TABLE_MAX_SIZE,
};

/// One elementary stream record of a PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtItem {
    pub stream_type: u8,
    pub pid: u16,
    pub descriptors: Vec<Descriptor>,
}

/// Program Map Table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pmt {
    pub pnr: u16,
    pub version: u8,
    pub current_next: bool,
    pub pcr_pid: u16,
    pub descriptors: Vec<Descriptor>,
    pub items: Vec<PmtItem>,
}

impl Pmt {
    pub fn parse(psi: &Psi) -> Result<Pmt, PsiError> {
        let section = psi.section();
        if section.len() < 12 + CRC32_SIZE {
            return Err(PsiError::NotReady);
        }
        if section[0] != 0x02 {
            return Err(PsiError::TableId(section[0]));
        }
        if section[1] & 0xCC != 0x80 {
            return Err(PsiError::FixedBits);
        }
        if section.len() > PSI_TABLE_MAX_SIZE {
            return Err(PsiError::Length);
        }
        if crc32(section) != 0 {
            return Err(PsiError::Crc);
        }

        let pinfo_len = (((section[10] & 0x0F) as usize) << 8) | section[11] as usize;
        let body_end = section.len() - CRC32_SIZE;
        if 12 + pinfo_len > body_end {
            return Err(PsiError::Truncated);
        }

        let mut pmt = Pmt {
            pnr: u16::from_be_bytes([section[3], section[4]]),
            version: (section[5] & 0x3E) >> 1,
            current_next: section[5] & 0x01 != 0,
            pcr_pid: (((section[8] & 0x1F) as u16) << 8) | section[9] as u16,
            descriptors: parse_descriptors(&section[12..12 + pinfo_len]),
            items: Vec::new(),
        };

        let mut pos = 12 + pinfo_len;
        while pos + 5 <= body_end {
            let stream_type = section[pos];
            let pid = (((section[pos + 1] & 0x1F) as u16) << 8) | section[pos + 2] as u16;
            let es_len = (((section[pos + 3] & 0x0F) as usize) << 8) | section[pos + 4] as usize;
            pos += 5;
            if pos + es_len > body_end {
                return Err(PsiError::Truncated);
            }
            pmt.items.push(PmtItem {
                stream_type,
                pid,
                descriptors: parse_descriptors(&section[pos..pos + es_len]),
            });
            pos += es_len;
        }
        Ok(pmt)
    }

    pub fn assemble(&self, psi: &mut Psi) {
        let mut section = vec![
            0x02,
            0xB0,
            0x00,
            (self.pnr >> 8) as u8,
            self.pnr as u8,
            0xC0 | ((self.version << 1) & 0x3E) | self.current_next as u8,
            0x00,
            0x00,
            0xE0 | (self.pcr_pid >> 8) as u8,
            self.pcr_pid as u8,
        ];

        let mut pinfo = Vec::new();
        assemble_descriptors(&self.descriptors, &mut pinfo);
        section.push(0xF0 | ((pinfo.len() >> 8) as u8 & 0x0F));
        section.push(pinfo.len() as u8);
        section.extend_from_slice(&pinfo);

        for item in &self.items {
            section.push(item.stream_type);
            section.push(0xE0 | (item.pid >> 8) as u8);
            section.push(item.pid as u8);
            let mut es_info = Vec::new();
            assemble_descriptors(&item.descriptors, &mut es_info);
            section.push(0xF0 | ((es_info.len() >> 8) as u8 & 0x0F));
            section.push(es_info.len() as u8);
            section.extend_from_slice(&es_info);
        }

        finalize_section(&mut section);
        psi.set_section(&section);
    }

    /// ECM PIDs scoped to the program (program descriptor loop).
    pub fn program_ecm_pids(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        ca_pids(&self.descriptors)
    }

    /// A copy with every CA descriptor removed, for downstream
    /// emission by the descrambler.
    pub fn without_ca_descriptors(&self) -> Pmt {
        let strip = |descs: &[Descriptor]| {
            descs
                .iter()
                .filter(|d| !matches!(d, Descriptor::Ca { .. }))
                .cloned()
                .collect::<Vec<_>>()
        };
        Pmt {
            descriptors: strip(&self.descriptors),
            items: self
                .items
                .iter()
                .map(|item| PmtItem {
                    stream_type: item.stream_type,
                    pid: item.pid,
                    descriptors: strip(&item.descriptors),
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// (caid, pid) pairs of CA descriptors in a loop.
pub(crate) fn ca_pids(descs: &[Descriptor]) -> impl Iterator<Item = (u16, u16)> + '_ {
    descs.iter().filter_map(|d| match d {
        Descriptor::Ca { caid, pid, .. } => Some((*caid, *pid)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::PsiKind;

    fn sample() -> Pmt {
        Pmt {
            pnr: 1,
            version: 2,
            current_next: true,
            pcr_pid: 258,
            descriptors: vec![Descriptor::Ca {
                caid: 0x0500,
                pid: 1010,
                data: vec![],
            }],
            items: vec![
                PmtItem {
                    stream_type: 0x02,
                    pid: 258,
                    descriptors: vec![],
                },
                PmtItem {
                    stream_type: 0x04,
                    pid: 259,
                    descriptors: vec![Descriptor::Iso639Language(vec![(*b"eng", 0)])],
                },
            ],
        }
    }

    #[test]
    fn parse_serialize_roundtrip() {
        // parse(serialize(pmt)) == pmt
        let pmt = sample();
        let mut psi = Psi::new(PsiKind::Pmt, 256);
        pmt.assemble(&mut psi);
        assert!(psi.check_crc());
        assert_eq!(Pmt::parse(&psi).unwrap(), pmt);
    }

    #[test]
    fn program_scope_ecm_pids() {
        let pmt = sample();
        assert_eq!(
            pmt.program_ecm_pids().collect::<Vec<_>>(),
            vec![(0x0500, 1010)]
        );
    }

    #[test]
    fn ca_strip_keeps_other_descriptors() {
        let clean = sample().without_ca_descriptors();
        assert!(clean.descriptors.is_empty());
        assert_eq!(clean.items[1].descriptors.len(), 1);
        assert_eq!(clean.pcr_pid, 258);
    }

    #[test]
    fn version_change_produces_new_crc() {
        let pmt = sample();
        let mut psi = Psi::new(PsiKind::Pmt, 256);
        pmt.assemble(&mut psi);
        let crc_a = psi.stored_crc();

        let mut changed = pmt;
        changed.version = 3;
        changed.assemble(&mut psi);
        assert_ne!(psi.stored_crc(), crc_a);
    }
}
