//! Per-resource application protocols: Resource Manager, Application
//! Information, Conditional Access Support, Date-Time and high-level
//! MMI.

use {
    super::{
        apdu::{self, *},
        spdu::{ST_CLOSE_SESSION_REQUEST, ST_SESSION_NUMBER},
        tpdu::TT_DATA_LAST,
        CiClock, CiEvent, CiHost, MmiState, SessionData,
    },
    itertools::Itertools,
    log::{debug, error, info},
};

/// display control commands
const DCC_SET_MMI_MODE: u8 = 0x01;
/// MMI modes
const MM_HIGH_LEVEL: u8 = 0x01;
/// display reply ids
const DRI_MMI_MODE_ACK: u8 = 0x01;

impl CiHost {
    /// First APDU of a freshly opened session.
    pub(crate) fn session_open(
        &mut self,
        slot_id: u8,
        session_id: u16,
        resource_id: u32,
        clock: CiClock,
    ) {
        match resource_id {
            RI_RESOURCE_MANAGER => {
                self.apdu_send(slot_id, session_id, AOT_PROFILE_ENQ, &[], clock.monotonic_ms);
            }
            RI_APPLICATION_INFORMATION => {
                self.apdu_send(
                    slot_id,
                    session_id,
                    AOT_APPLICATION_INFO_ENQ,
                    &[],
                    clock.monotonic_ms,
                );
            }
            RI_CONDITIONAL_ACCESS_SUPPORT => {
                self.session(slot_id, session_id).data = SessionData::CaSupport {
                    caids: Vec::new(),
                };
                self.apdu_send(slot_id, session_id, AOT_CA_INFO_ENQ, &[], clock.monotonic_ms);
            }
            RI_DATE_TIME => {
                self.session(slot_id, session_id).data = SessionData::DateTime {
                    interval_ms: 0,
                    last_ms: 0,
                };
                self.date_time_send(slot_id, session_id, clock);
            }
            RI_MMI => {
                self.session(slot_id, session_id).data = SessionData::Mmi(None);
            }
            other => {
                error!(
                    "[{}] slot {} session {} unknown resource 0x{:08X}",
                    self.label(),
                    slot_id,
                    session_id,
                    other
                );
                self.session(slot_id, session_id).resource_id = 0;
            }
        }
    }

    /// APDU arriving on an established session.
    pub(crate) fn session_event(
        &mut self,
        slot_id: u8,
        session_id: u16,
        resource_id: u32,
        spdu: &[u8],
        clock: CiClock,
    ) {
        match resource_id {
            RI_RESOURCE_MANAGER => self.resource_manager_event(slot_id, session_id, spdu, clock),
            RI_APPLICATION_INFORMATION => self.application_info_event(slot_id, spdu),
            RI_CONDITIONAL_ACCESS_SUPPORT => {
                self.conditional_access_event(slot_id, session_id, spdu, clock)
            }
            RI_DATE_TIME => self.date_time_event(slot_id, session_id, spdu, clock),
            RI_MMI => self.mmi_event(slot_id, session_id, spdu, clock),
            _ => {}
        }
    }

    fn resource_manager_event(
        &mut self,
        slot_id: u8,
        session_id: u16,
        spdu: &[u8],
        clock: CiClock,
    ) {
        match apdu::tag(spdu) {
            AOT_PROFILE_ENQ => {
                let mut profile = Vec::with_capacity(20);
                for id in [
                    RI_RESOURCE_MANAGER,
                    RI_APPLICATION_INFORMATION,
                    RI_CONDITIONAL_ACCESS_SUPPORT,
                    RI_DATE_TIME,
                    RI_MMI,
                ] {
                    profile.extend_from_slice(&id.to_be_bytes());
                }
                self.apdu_send(slot_id, session_id, AOT_PROFILE, &profile, clock.monotonic_ms);
            }
            AOT_PROFILE => {
                self.apdu_send(
                    slot_id,
                    session_id,
                    AOT_PROFILE_CHANGE,
                    &[],
                    clock.monotonic_ms,
                );
            }
            tag => {
                error!(
                    "[{}] resource manager: wrong event 0x{:08X}",
                    self.label(),
                    tag
                );
            }
        }
    }

    fn application_info_event(&mut self, slot_id: u8, spdu: &[u8]) {
        match apdu::tag(spdu) {
            AOT_APPLICATION_INFO => {
                let body = apdu::body(spdu);
                if body.len() < 5 {
                    return;
                }
                let kind = body[0];
                let manufacturer = u16::from_be_bytes([body[1], body[2]]);
                let product = u16::from_be_bytes([body[3], body[4]]);
                let name = match super::asn1::decode(&body[5..]) {
                    Some((size, skip)) => {
                        let from = 5 + skip;
                        let to = (from + size as usize).min(body.len());
                        String::from_utf8_lossy(&body[from..to]).into_owned()
                    }
                    None => String::new(),
                };
                info!(
                    "[{}] module {}. 0x{:02X} 0x{:04X} 0x{:04X}",
                    self.label(),
                    name,
                    kind,
                    manufacturer,
                    product
                );
                self.push_event(CiEvent::ApplicationInfo {
                    slot: slot_id,
                    kind,
                    manufacturer,
                    product,
                    name,
                });
            }
            tag => {
                error!(
                    "[{}] application information: wrong event 0x{:08X}",
                    self.label(),
                    tag
                );
            }
        }
    }

    fn conditional_access_event(
        &mut self,
        slot_id: u8,
        session_id: u16,
        spdu: &[u8],
        clock: CiClock,
    ) {
        match apdu::tag(spdu) {
            AOT_CA_INFO => {
                let caids: Vec<u16> = apdu::body(spdu)
                    .iter()
                    .copied()
                    .tuples()
                    .map(|(hi, lo)| u16::from_be_bytes([hi, lo]))
                    .collect();
                for caid in &caids {
                    info!(
                        "[{}] module CAID:0x{:04X} (session {}:{})",
                        self.label(),
                        caid,
                        slot_id,
                        session_id
                    );
                }
                if let SessionData::CaSupport { caids: stored } =
                    &mut self.session(slot_id, session_id).data
                {
                    *stored = caids.clone();
                }
                self.on_ca_info(clock.monotonic_ms);
                self.push_event(CiEvent::CaInfo {
                    slot: slot_id,
                    caids,
                });
            }
            AOT_CA_UPDATE | AOT_CA_PMT_REPLY => {}
            tag => {
                error!(
                    "[{}] conditional access: wrong event 0x{:08X}",
                    self.label(),
                    tag
                );
            }
        }
    }

    /* date-time */

    fn date_time_send(&mut self, slot_id: u8, session_id: u16, clock: CiClock) {
        let offset = self.utc_offset_minutes();
        let mut body = [0u8; 7];

        // days since the unix epoch put MJD at 40587
        let mjd = (clock.unix_seconds / 86400 + 40587) as u16;
        body[0] = (mjd >> 8) as u8;
        body[1] = mjd as u8;

        let day_seconds = clock.unix_seconds % 86400;
        let bcd = |v: u64| (((v / 10) << 4) | (v % 10)) as u8;
        body[2] = bcd(day_seconds / 3600);
        body[3] = bcd(day_seconds / 60 % 60);
        body[4] = bcd(day_seconds % 60);

        body[5] = (offset >> 8) as u8;
        body[6] = offset as u8;

        self.apdu_send(slot_id, session_id, AOT_DATE_TIME, &body, clock.monotonic_ms);

        if let SessionData::DateTime { last_ms, .. } =
            &mut self.session(slot_id, session_id).data
        {
            *last_ms = clock.monotonic_ms;
        }
    }

    fn date_time_event(&mut self, slot_id: u8, session_id: u16, spdu: &[u8], clock: CiClock) {
        match apdu::tag(spdu) {
            AOT_DATE_TIME_ENQ => {
                let body = apdu::body(spdu);
                let interval_ms = body.first().map(|&s| s as u64 * 1000).unwrap_or(0);
                if let SessionData::DateTime { interval_ms: stored, .. } =
                    &mut self.session(slot_id, session_id).data
                {
                    *stored = interval_ms;
                }
                self.date_time_send(slot_id, session_id, clock);
            }
            tag => {
                error!("[{}] date-time: wrong event 0x{:08X}", self.label(), tag);
            }
        }
    }

    /// Periodic Date-Time refresh at the CAM-requested interval.
    pub(crate) fn date_time_manage(&mut self, slot_id: u8, clock: CiClock) {
        if self.slots[slot_id as usize].busy {
            return;
        }
        let mut due = Vec::new();
        for (session_id, session) in self.slots[slot_id as usize].sessions.iter_mut().enumerate()
        {
            if let SessionData::DateTime {
                interval_ms,
                last_ms,
            } = &mut session.data
            {
                if *last_ms > clock.monotonic_ms {
                    // monotonic source changed under us
                    *last_ms = clock.monotonic_ms;
                    continue;
                }
                if *interval_ms > 0 && clock.monotonic_ms >= *last_ms + *interval_ms {
                    due.push(session_id as u16);
                }
            }
        }
        for session_id in due {
            self.date_time_send(slot_id, session_id, clock);
        }
    }

    /* MMI, high-level mode only */

    fn mmi_event(&mut self, slot_id: u8, session_id: u16, spdu: &[u8], clock: CiClock) {
        let tag = apdu::tag(spdu);
        match tag {
            AOT_DISPLAY_CONTROL => {
                let body = apdu::body(spdu);
                if body.first() != Some(&DCC_SET_MMI_MODE) {
                    error!(
                        "[{}] mmi: unknown display command 0x{:02X}",
                        self.label(),
                        body.first().copied().unwrap_or(0)
                    );
                    return;
                }
                if body.len() != 2 || body[1] != MM_HIGH_LEVEL {
                    error!("[{}] mmi: unsupported mode", self.label());
                    return;
                }
                self.apdu_send(
                    slot_id,
                    session_id,
                    AOT_DISPLAY_REPLY,
                    &[DRI_MMI_MODE_ACK, MM_HIGH_LEVEL],
                    clock.monotonic_ms,
                );
            }
            AOT_ENQ => {
                let body = apdu::body(spdu);
                if body.len() < 2 {
                    return;
                }
                let blind = body[0] & 0x01 != 0;
                let text = String::from_utf8_lossy(&body[2..]).into_owned();
                if let SessionData::Mmi(state) = &mut self.session(slot_id, session_id).data {
                    *state = Some(MmiState {
                        blind,
                        text: text.clone(),
                    });
                }
                self.push_event(CiEvent::MmiEnquiry {
                    slot: slot_id,
                    blind,
                    text,
                });
            }
            AOT_MENU_LAST | AOT_LIST_LAST => {
                let body = apdu::body(spdu).to_vec();
                if body.is_empty() {
                    return;
                }
                let is_list = tag == AOT_LIST_LAST;
                let mut skip = 1; // choice_nb

                let mut next_text = |skip: &mut usize| -> String {
                    let (text, used) = mmi_text(&body[*skip..]);
                    *skip += used;
                    text
                };
                let title = next_text(&mut skip);
                let subtitle = next_text(&mut skip);
                let bottom = next_text(&mut skip);

                let mut choices = Vec::new();
                while skip < body.len() {
                    let (text, used) = mmi_text(&body[skip..]);
                    if used == 0 {
                        break;
                    }
                    choices.push(text);
                    skip += used;
                }

                debug!(
                    "[{}] mmi {}: {} ({} choices)",
                    self.label(),
                    if is_list { "list" } else { "menu" },
                    title,
                    choices.len()
                );
                self.push_event(CiEvent::MmiMenu {
                    slot: slot_id,
                    is_list,
                    title,
                    subtitle,
                    bottom,
                    choices,
                });

                // back out of the menu right away
                self.mmi_answer(slot_id, session_id, 0, clock);
            }
            AOT_CLOSE_MMI => {
                let mut response = vec![ST_CLOSE_SESSION_REQUEST, 0x02];
                response.extend_from_slice(&session_id.to_be_bytes());
                self.tpdu_send(slot_id, TT_DATA_LAST, &response, clock.monotonic_ms);
            }
            tag => {
                error!("[{}] mmi: wrong event 0x{:08X}", self.label(), tag);
            }
        }
    }

    /// Selects a menu entry; choice 0 returns to the previous level.
    pub fn mmi_answer(&mut self, slot_id: u8, session_id: u16, choice: u8, clock: CiClock) {
        let mut answer = vec![ST_SESSION_NUMBER, 0x02];
        answer.extend_from_slice(&session_id.to_be_bytes());
        apdu::pack(&mut answer, AOT_MENU_ANSW, &[choice]);
        self.tpdu_send(slot_id, TT_DATA_LAST, &answer, clock.monotonic_ms);
    }
}

/// One `TEXT_LAST`-framed string: `(text, bytes consumed)`. Consumed
/// is clamped to the buffer so a lying length cannot walk past it.
fn mmi_text(buffer: &[u8]) -> (String, usize) {
    if buffer.len() < 4 {
        return (String::new(), 0);
    }
    let tag = ((buffer[0] as u32) << 16) | ((buffer[1] as u32) << 8) | buffer[2] as u32;
    if tag != AOT_TEXT_LAST {
        return (String::new(), 0);
    }
    let len = buffer[3] as usize;
    let end = (4 + len).min(buffer.len());
    (String::from_utf8_lossy(&buffer[4..end]).into_owned(), end)
}
