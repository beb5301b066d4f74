use super::CamInfo;

#[derive(Default)]
pub struct Videoguard;

impl Videoguard {
    pub fn check_caid(caid: u16) -> bool {
        caid & 0xFF00 == 0x0900
    }

    pub fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() < 4 {
            return None;
        }
        let emm_type = (payload[3] & 0xC0) >> 6;
        let accept = match emm_type {
            // global
            0 => true,
            // unique/shared: up to four serials packed behind the header
            1 | 2 => {
                let serial_count = ((payload[3] >> 4) & 3) as usize + 1;
                let serial_len = if payload[3] & 0x80 != 0 { 3 } else { 4 };
                (0..serial_count).any(|i| {
                    payload
                        .get(i * 4 + 4..i * 4 + 4 + serial_len)
                        .map(|serial| serial == &cam.ua[4..4 + serial_len])
                        .unwrap_or(false)
                })
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
