use super::CamInfo;

const SHARED_MAX: usize = 128;

/// Viaccess addresses subscribers with a shared EMM part (0x8C/0x8D)
/// that a later unique part (0x8E) references; the CAM wants them
/// merged into one message with the nanos sorted.
#[derive(Default)]
pub struct Viaccess {
    ident: Option<[u8; 3]>,
    sa: Option<[u8; 8]>,
    shared_type: u8,
    shared: Vec<u8>,
}

fn ident_matches(ident: &[u8; 3], candidate: &[u8]) -> bool {
    ident[0] == candidate[0]
        && ident[1] == candidate[1]
        && ident[2] & 0xF0 == candidate[2] & 0xF0
}

/// Reorders nanos ascending by tag, as the card expects. Returns
/// `None` when the nano lengths disagree with the buffer.
fn sort_nanos(src: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut current: i32 = -1;
    loop {
        let mut next = 0x100;
        let mut pos = 0;
        while pos + 2 <= src.len() {
            let tag = src[pos] as i32;
            let len = src[pos + 1] as usize + 2;
            if pos + len > src.len() {
                return None;
            }
            if tag == current {
                out.extend_from_slice(&src[pos..pos + len]);
            } else if tag > current && tag < next {
                next = tag;
            }
            pos += len;
        }
        if next == 0x100 {
            break;
        }
        current = next;
    }
    Some(out)
}

fn em_size(payload: &[u8]) -> usize {
    ((((payload[1] & 0x0F) as usize) << 8) | payload[2] as usize) + 3
}

impl Viaccess {
    pub fn check_caid(caid: u16) -> bool {
        caid == 0x0500
    }

    /// Follows the 0x14 ident nano of the descriptor: the PID is
    /// selected when the card serves that provider.
    pub fn select_descriptor(
        &mut self,
        cam: &CamInfo,
        pid: u16,
        private: &[u8],
    ) -> Option<u16> {
        let has_cas_data = cam.cas_data[0] != 0 || cam.cas_data[1] != 0;

        let mut ident_count = 0;
        let mut pos = 0;
        while pos + 2 <= private.len() {
            let dtype = private[pos];
            let dlen = private[pos + 1] as usize + 2;
            if dtype == 0x14 && dlen == 5 && pos + 5 <= private.len() {
                ident_count += 1;
                let ident = &private[pos + 2..pos + 5];
                let cas_data_ok = !has_cas_data
                    || ident_matches(
                        &[cam.cas_data[0], cam.cas_data[1], cam.cas_data[2]],
                        ident,
                    );
                if cas_data_ok {
                    for prov in &cam.providers {
                        if ident_matches(&prov.ident, ident) {
                            if self.ident.is_none() {
                                self.ident = Some(prov.ident);
                                self.sa = Some(prov.sa);
                            }
                            return Some(pid);
                        }
                    }
                }
            }
            pos += dlen;
        }

        // no ident nano at all: nothing to disambiguate with
        if ident_count == 0 {
            return Some(pid);
        }
        None
    }

    pub fn filter_emm(&mut self, _cam: &CamInfo, payload: &[u8]) -> Option<Vec<u8>> {
        match payload[0] {
            // shared part: hold until the unique part arrives
            em_type @ (0x8C | 0x8D) => {
                let ident = self.ident?;
                let nano = payload.get(3..8)?;
                if !(nano[0] == 0x90 && nano[1] == 0x03 && ident_matches(&ident, &nano[2..5])) {
                    return None;
                }
                if em_type != self.shared_type {
                    let size = em_size(payload);
                    if size > SHARED_MAX || size > payload.len() {
                        return None;
                    }
                    self.shared = payload[..size].to_vec();
                    self.shared_type = em_type;
                }
                None
            }
            // unique part keyed to our shared address
            0x8E => {
                if self.shared.is_empty() {
                    return None;
                }
                let sa = self.sa?;
                if payload.get(3..6)? != &sa[4..7] {
                    return None;
                }
                if payload[6] & 0x02 != 0 {
                    return None;
                }

                let size = em_size(payload);
                if size > payload.len() || size < 16 {
                    return None;
                }
                let unique_nanos = &payload[7..size];
                if unique_nanos.len() < 8 {
                    return None;
                }
                let (head, key) = unique_nanos.split_at(unique_nanos.len() - 8);

                // merge: 9E <unique> F0 08 <key> + shared nanos
                let mut merged = Vec::with_capacity(size + self.shared.len());
                merged.push(0x9E);
                merged.push(head.len() as u8);
                merged.extend_from_slice(head);
                merged.push(0xF0);
                merged.push(0x08);
                merged.extend_from_slice(key);
                merged.extend_from_slice(&self.shared[3..]);

                let sorted = sort_nanos(&merged)?;

                let mut out = payload[..7].to_vec();
                out[2] = (sorted.len() + 4) as u8;
                out.extend_from_slice(&sorted);
                Some(out)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanos_sort_ascending_by_tag() {
        // tags 0xF0, 0x9E, 0xA1 with bodies
        let src = [0xF0u8, 0x01, 0xAA, 0x9E, 0x02, 0x01, 0x02, 0xA1, 0x00];
        let sorted = sort_nanos(&src).unwrap();
        assert_eq!(sorted, vec![0x9E, 0x02, 0x01, 0x02, 0xA1, 0x00, 0xF0, 0x01, 0xAA]);
    }

    #[test]
    fn truncated_nano_is_refused() {
        assert_eq!(sort_nanos(&[0xF0, 0x05, 0x01]), None);
    }
}
