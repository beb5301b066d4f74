use super::CamInfo;

/// BISS has no entitlement stream: a single fixed key is fetched
/// once and never rotates.
#[derive(Default)]
pub struct Biss {
    sent: bool,
}

impl Biss {
    pub fn check_caid(caid: u16) -> bool {
        caid == 0x2600
    }

    pub fn filter_ecm(&mut self, _cam: &CamInfo, _payload: &[u8]) -> bool {
        if self.sent {
            return false;
        }
        self.sent = true;
        true
    }

    pub fn filter_emm(&mut self, _cam: &CamInfo, _payload: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// BISS carries no CA descriptor worth following; the key request
    /// is driven from configuration instead.
    pub fn select_descriptor(
        &mut self,
        _cam: &CamInfo,
        _pid: u16,
        _private: &[u8],
    ) -> Option<u16> {
        None
    }
}
