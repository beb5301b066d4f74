use super::CamInfo;

#[derive(Default)]
pub struct Mediaguard {
    /// shared address of the provider the descriptor matched
    sa: Option<[u8; 8]>,
}

impl Mediaguard {
    pub fn check_caid(caid: u16) -> bool {
        caid == 0x0100
    }

    /// The descriptor carries a provider id in its private bytes;
    /// only descriptors of a provider the card knows are followed.
    pub fn select_descriptor(
        &mut self,
        cam: &CamInfo,
        pid: u16,
        private: &[u8],
    ) -> Option<u16> {
        if private.len() < 2 {
            return None;
        }
        for prov in &cam.providers {
            if prov.ident[1] == private[0] && prov.ident[2] == private[1] {
                if self.sa.is_none() {
                    self.sa = Some(prov.sa);
                }
                return Some(pid);
            }
        }
        None
    }

    pub fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        let accept = match payload[0] {
            // unique
            0x82 => payload.len() >= 9 && payload[3..9] == cam.ua[2..8],
            // shared
            0x84 => match &self.sa {
                Some(sa) => payload.len() >= 8 && payload[5..8] == sa[5..8],
                None => false,
            },
            _ => false,
        };
        if accept {
            Some(payload.to_vec())
        } else {
            None
        }
    }
}
