use super::{
    crc32, desc::assemble_descriptors, parse_descriptors, pat::finalize_section, Descriptor, Psi,
    PsiError, CRC32_SIZE, PSI_TABLE_MAX_SIZE,
};

/// Conditional Access Table: a bare descriptor loop. CA descriptors
/// here carry (caid, emm_pid) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cat {
    pub version: u8,
    pub current_next: bool,
    pub descriptors: Vec<Descriptor>,
}

impl Cat {
    pub fn parse(psi: &Psi) -> Result<Cat, PsiError> {
        let section = psi.section();
        if section.len() < 8 + CRC32_SIZE {
            return Err(PsiError::NotReady);
        }
        if section[0] != 0x01 {
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

        Ok(Cat {
            version: (section[5] & 0x3E) >> 1,
            current_next: section[5] & 0x01 != 0,
            descriptors: parse_descriptors(&section[8..section.len() - CRC32_SIZE]),
        })
    }

    pub fn assemble(&self, psi: &mut Psi) {
        let mut section = vec![
            0x01,
            0xB0,
            0x00,
            0xFF,
            0xFF,
            0xC0 | ((self.version << 1) & 0x3E) | self.current_next as u8,
            0x00,
            0x00,
        ];
        assemble_descriptors(&self.descriptors, &mut section);
        finalize_section(&mut section);
        psi.set_section(&section);
    }

    /// (caid, emm_pid) pairs advertised by this CAT.
    pub fn emm_pids(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::Ca { caid, pid, .. } => Some((*caid, *pid)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::PsiKind;

    #[test]
    fn cat_roundtrip_and_emm_extraction() {
        let cat = Cat {
            version: 1,
            current_next: true,
            descriptors: vec![
                Descriptor::Ca {
                    caid: 0x0B00,
                    pid: 0x300,
                    data: vec![],
                },
                Descriptor::Raw {
                    tag: 0x80,
                    data: vec![1, 2],
                },
            ],
        };
        let mut psi = Psi::new(PsiKind::Cat, 1);
        cat.assemble(&mut psi);
        let parsed = Cat::parse(&psi).unwrap();
        assert_eq!(parsed, cat);
        assert_eq!(parsed.emm_pids().collect::<Vec<_>>(), vec![(0x0B00, 0x300)]);
    }
}
