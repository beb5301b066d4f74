use super::CamInfo;

#[derive(Default)]
pub struct Dre;

impl Dre {
    pub fn check_caid(caid: u16) -> bool {
        let caid = caid & !1;
        caid == 0x4AE0 || caid == 0x7BE0
    }

    pub fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        let accept = match payload[0] {
            // unique
            0x87 | 0x8B => payload.len() >= 7 && payload[3..7] == cam.ua[4..8],
            // group
            0x86 | 0x88 | 0x89 | 0x8C => payload.len() >= 4 && payload[3] == cam.ua[4],
            _ => false,
        };
        if accept {
            Some(payload.to_vec())
        } else {
            None
        }
    }
}
