use super::CamInfo;

#[derive(Default)]
pub struct Cryptoworks;

impl Cryptoworks {
    pub fn check_caid(caid: u16) -> bool {
        caid & 0xFF00 == 0x0D00
    }

    pub fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        // every variant opens with the A9 FF nano
        if payload.len() < 10 || payload[3] != 0xA9 || payload[4] != 0xFF {
            return None;
        }
        let accept = match payload[0] {
            // unique
            0x82 => {
                payload.len() >= 15
                    && payload[13] == 0x80
                    && payload[14] == 0x05
                    && payload[5..10] == cam.ua[3..8]
            }
            // shared
            0x84 => {
                payload.len() >= 14
                    && payload[12] == 0x80
                    && payload[13] == 0x04
                    && payload[5..9] == cam.ua[3..7]
            }
            // global
            0x86 => payload[5] == 0x83 && payload[6] == 0x01 && payload[8] == 0x85,
            0x88 | 0x89 => payload.len() >= 10 && payload[8] == 0x83 && payload[9] == 0x01,
            _ => false,
        };
        if accept {
            Some(payload.to_vec())
        } else {
            None
        }
    }
}
