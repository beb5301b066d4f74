//! Conditional-access system dispatch. Each variant differs only in
//! how it filters entitlement messages and where it finds its ECM
//! PID; parity suppression for ECMs is universal.

mod biss;
mod bulcrypt;
mod conax;
mod cryptoworks;
mod dre;
mod irdeto;
mod mediaguard;
mod nagra;
mod viaccess;
mod videoguard;

use {
    super::{CamInfo, EmKind, EmPacket, EM_MAX_SIZE},
    log::warn,
};

pub use {
    biss::Biss, bulcrypt::Bulcrypt, conax::Conax, cryptoworks::Cryptoworks, dre::Dre,
    irdeto::Irdeto, mediaguard::Mediaguard, nagra::Nagra, viaccess::Viaccess,
    videoguard::Videoguard,
};

enum System {
    Biss(Biss),
    Bulcrypt(Bulcrypt),
    Conax(Conax),
    Cryptoworks(Cryptoworks),
    Dre(Dre),
    Irdeto(Irdeto),
    Mediaguard(Mediaguard),
    Nagra(Nagra),
    Viaccess(Viaccess),
    Videoguard(Videoguard),
}

/// CAS instance bound to one program.
pub struct Cas {
    pnr: u16,
    parity: u8,
    system: System,
}

impl Cas {
    /// Selects the variant serving `caid`, or `None` when no system
    /// claims it.
    pub fn for_caid(caid: u16, pnr: u16) -> Option<Cas> {
        let system = if Biss::check_caid(caid) {
            System::Biss(Biss::default())
        } else if Bulcrypt::check_caid(caid) {
            System::Bulcrypt(Bulcrypt::default())
        } else if Conax::check_caid(caid) {
            System::Conax(Conax::default())
        } else if Cryptoworks::check_caid(caid) {
            System::Cryptoworks(Cryptoworks::default())
        } else if Dre::check_caid(caid) {
            System::Dre(Dre::default())
        } else if Irdeto::check_caid(caid) {
            System::Irdeto(Irdeto::default())
        } else if Mediaguard::check_caid(caid) {
            System::Mediaguard(Mediaguard::default())
        } else if Nagra::check_caid(caid) {
            System::Nagra(Nagra::default())
        } else if Viaccess::check_caid(caid) {
            System::Viaccess(Viaccess::default())
        } else if Videoguard::check_caid(caid) {
            System::Videoguard(Videoguard::default())
        } else {
            return None;
        };
        Some(Cas {
            pnr,
            parity: 0,
            system,
        })
    }

    pub fn name(&self) -> &'static str {
        match &self.system {
            System::Biss(..) => "biss",
            System::Bulcrypt(..) => "bulcrypt",
            System::Conax(..) => "conax",
            System::Cryptoworks(..) => "cryptoworks",
            System::Dre(..) => "dre",
            System::Irdeto(..) => "irdeto",
            System::Mediaguard(..) => "mediaguard",
            System::Nagra(..) => "nagra",
            System::Viaccess(..) => "viaccess",
            System::Videoguard(..) => "videoguard",
        }
    }

    #[inline]
    pub fn pnr(&self) -> u16 {
        self.pnr
    }

    /// Decides whether a reassembled entitlement section is worth a
    /// CAM round-trip. ECMs are suppressed while the parity byte
    /// repeats; EMMs go through the per-system subscriber filter.
    pub fn filter_em(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<EmPacket> {
        if payload.len() < 3 {
            return None;
        }
        let size = ((((payload[1] & 0x0F) as usize) << 8) | payload[2] as usize) + 3;
        if size > payload.len() || size >= EM_MAX_SIZE {
            warn!(
                "[cas {}] entitlement message is too long (pnr:{} type:0x{:02X} size:{})",
                self.name(),
                self.pnr,
                payload[0],
                size
            );
            return None;
        }
        let payload = &payload[..size];

        let em_type = payload[0];
        match em_type {
            0x80 | 0x81 => {
                if self.tracks_parity() && em_type == self.parity {
                    return None;
                }
                if !self.filter_ecm(cam, payload) {
                    return None;
                }
                if self.tracks_parity() {
                    self.parity = em_type;
                }
                Some(EmPacket {
                    kind: EmKind::Ecm,
                    pnr: self.pnr,
                    payload: payload.to_vec(),
                })
            }
            0x82..=0x8F => {
                if cam.disable_emm {
                    return None;
                }
                self.filter_emm(cam, payload).map(|payload| EmPacket {
                    kind: EmKind::Emm,
                    pnr: self.pnr,
                    payload,
                })
            }
            other => {
                warn!("[cas {}] wrong em type 0x{:02X}", self.name(), other);
                None
            }
        }
    }

    /// ECM PID carried by a CA descriptor already matched by CAID.
    /// `private` is the descriptor payload past the PID field.
    pub fn extract_ecm_pid(&mut self, cam: &CamInfo, pid: u16, private: &[u8]) -> Option<u16> {
        match &mut self.system {
            System::Biss(s) => s.select_descriptor(cam, pid, private),
            System::Mediaguard(s) => s.select_descriptor(cam, pid, private),
            System::Viaccess(s) => s.select_descriptor(cam, pid, private),
            _ => Some(pid),
        }
    }

    /// Reply bookkeeping (Irdeto channel-id autoselect).
    pub fn on_key_reply(&mut self, accepted: bool) {
        if let System::Irdeto(s) = &mut self.system {
            s.on_key_reply(accepted);
        }
    }

    fn tracks_parity(&self) -> bool {
        !matches!(self.system, System::Biss(..))
    }

    fn filter_ecm(&mut self, cam: &CamInfo, payload: &[u8]) -> bool {
        match &mut self.system {
            System::Biss(s) => s.filter_ecm(cam, payload),
            System::Irdeto(s) => s.filter_ecm(cam, payload),
            _ => true,
        }
    }

    fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        match &mut self.system {
            System::Biss(s) => s.filter_emm(cam, payload),
            System::Bulcrypt(s) => s.filter_emm(cam, payload),
            System::Conax(s) => s.filter_emm(cam, payload),
            System::Cryptoworks(s) => s.filter_emm(cam, payload),
            System::Dre(s) => s.filter_emm(cam, payload),
            System::Irdeto(s) => s.filter_emm(cam, payload),
            System::Mediaguard(s) => s.filter_emm(cam, payload),
            System::Nagra(s) => s.filter_emm(cam, payload),
            System::Viaccess(s) => s.filter_emm(cam, payload),
            System::Videoguard(s) => s.filter_emm(cam, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(bytes: &[u8]) -> Vec<u8> {
        let mut s = bytes.to_vec();
        let len = s.len() - 3;
        s[1] = 0x80 | ((len >> 8) as u8 & 0x0F);
        s[2] = len as u8;
        s
    }

    fn ecm(parity: u8, body: &[u8]) -> Vec<u8> {
        let mut s = vec![parity, 0, 0];
        s.extend_from_slice(body);
        section(&s)
    }

    #[test]
    fn dispatch_by_caid() {
        assert_eq!(Cas::for_caid(0x2600, 1).unwrap().name(), "biss");
        assert_eq!(Cas::for_caid(0x0500, 1).unwrap().name(), "viaccess");
        assert_eq!(Cas::for_caid(0x0B02, 1).unwrap().name(), "conax");
        assert_eq!(Cas::for_caid(0x0624, 1).unwrap().name(), "irdeto");
        assert_eq!(Cas::for_caid(0x0963, 1).unwrap().name(), "videoguard");
        assert_eq!(Cas::for_caid(0x4AEE, 1).unwrap().name(), "bulcrypt");
        assert_eq!(Cas::for_caid(0x5581, 1).unwrap().name(), "bulcrypt");
        assert_eq!(Cas::for_caid(0x4AE1, 1).unwrap().name(), "dre");
        assert_eq!(Cas::for_caid(0x0D22, 1).unwrap().name(), "cryptoworks");
        assert_eq!(Cas::for_caid(0x0100, 1).unwrap().name(), "mediaguard");
        assert_eq!(Cas::for_caid(0x1801, 1).unwrap().name(), "nagra");
        assert!(Cas::for_caid(0x1234, 1).is_none());
    }

    #[test]
    fn ecm_parity_suppression_is_universal() {
        let mut cas = Cas::for_caid(0x0B00, 7).unwrap();
        let cam = CamInfo::default();

        let even = ecm(0x80, &[0; 16]);
        let odd = ecm(0x81, &[0; 16]);
        assert!(cas.filter_em(&cam, &even).is_some());
        assert!(cas.filter_em(&cam, &even).is_none());
        assert!(cas.filter_em(&cam, &odd).is_some());
        assert!(cas.filter_em(&cam, &odd).is_none());
        let packet = cas.filter_em(&cam, &even).unwrap();
        assert_eq!(packet.kind, EmKind::Ecm);
        assert_eq!(packet.pnr, 7);
    }

    #[test]
    fn oversized_em_is_dropped() {
        let mut cas = Cas::for_caid(0x0B00, 1).unwrap();
        let cam = CamInfo::default();
        let huge = ecm(0x80, &[0u8; EM_MAX_SIZE]);
        assert!(cas.filter_em(&cam, &huge).is_none());
    }

    #[test]
    fn emm_respects_disable_flag() {
        let mut cas = Cas::for_caid(0x0B00, 1).unwrap();
        let mut cam = CamInfo::default();
        cam.ua = [1, 2, 3, 4, 5, 6, 7, 8];
        // conax unique emm: ua[4..8] at payload[6..10]
        let mut body = vec![0u8; 16];
        body[3..7].copy_from_slice(&cam.ua[4..8]);
        let emm = {
            let mut s = vec![0x82u8, 0, 0];
            s.extend_from_slice(&body);
            section(&s)
        };
        assert!(cas.filter_em(&cam, &emm).is_some());

        cam.disable_emm = true;
        assert!(cas.filter_em(&cam, &emm).is_none());
    }
}
