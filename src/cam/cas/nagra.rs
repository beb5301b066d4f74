use super::CamInfo;

#[derive(Default)]
pub struct Nagra;

impl Nagra {
    pub fn check_caid(caid: u16) -> bool {
        caid & 0xFF00 == 0x1800
    }

    pub fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() < 8 {
            return None;
        }
        let accept = match payload[0] {
            // unique
            0x82 => payload[3..7] == cam.ua[4..8],
            // shared
            0x84 => payload[3..6] == cam.ua[4..7],
            // global
            0x83 => true,
            _ => false,
        };
        if accept {
            Some(payload.to_vec())
        } else {
            None
        }
    }
}
