use super::CamInfo;

#[derive(Default)]
pub struct Conax;

impl Conax {
    pub fn check_caid(caid: u16) -> bool {
        caid & 0xFF00 == 0x0B00
    }

    pub fn filter_emm(&mut self, cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() < 10 {
            return None;
        }
        let addr = &payload[6..10];
        let shared = cam
            .providers
            .first()
            .map(|prov| addr == &prov.sa[4..8])
            .unwrap_or(false);
        if shared || addr == &cam.ua[4..8] {
            Some(payload.to_vec())
        } else {
            None
        }
    }
}
