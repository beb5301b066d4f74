use super::CamInfo;

const ECM_MAX_ID: usize = 16;

/// Irdeto multiplexes several channels over one ECM PID, each tagged
/// with a channel id. Until one answers with a valid key, candidate
/// ids are probed one at a time.
#[derive(Default)]
pub struct Irdeto {
    chid: Option<u16>,
    checking: bool,
    current_id: u8,
    seen: [(u8, u16); ECM_MAX_ID], // (parity, chid) per ecm id
}

impl Irdeto {
    pub fn check_caid(caid: u16) -> bool {
        caid & 0xFF00 == 0x0600
    }

    fn ecm_chid(payload: &[u8]) -> u16 {
        u16::from_be_bytes([payload[6], payload[7]])
    }

    pub fn filter_ecm(&mut self, _cam: &CamInfo, payload: &[u8]) -> bool {
        if payload.len() < 8 {
            return false;
        }
        let chid = Self::ecm_chid(payload);

        if let Some(selected) = self.chid {
            return selected == chid;
        }

        // probe one candidate channel id at a time
        if self.checking {
            return false;
        }
        let ecm_id = payload[4];
        if ecm_id as usize >= ECM_MAX_ID {
            return false;
        }
        if self.seen[ecm_id as usize].0 == payload[0] {
            return false;
        }
        self.checking = true;
        self.current_id = ecm_id;
        self.seen[ecm_id as usize] = (payload[0], chid);
        true
    }

    /// A valid key for the probed id locks the channel id in; a
    /// reject moves the probe on.
    pub fn on_key_reply(&mut self, accepted: bool) {
        if !self.checking {
            return;
        }
        self.checking = false;
        if accepted && self.chid.is_none() {
            self.chid = Some(self.seen[self.current_id as usize].1);
        }
    }

    pub fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() < 10 {
            return None;
        }
        // unique and shared messages address by serial prefix
        let accept = match payload[0] {
            0x82 | 0x83 => {
                let addr = &payload[3..6];
                addr == [0, 0, 0] || addr == &cam.ua[4..7]
            }
            _ => false,
        };
        if accept {
            Some(payload.to_vec())
        } else {
            None
        }
    }
}
