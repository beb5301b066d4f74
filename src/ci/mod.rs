//! EN 50221 Common Interface host.
//!
//! [`CiHost`] is byte-oriented and I/O-free: the owner reads link
//! frames from the CA device and pushes them in with [`CiHost::on_frame`],
//! drives the 100 ms poll with [`CiHost::tick`], and writes whatever
//! [`CiHost::pop_frame`] yields back to the device. Time is passed in
//! explicitly, so the protocol layers are testable against a stub CAM.

pub mod asn1;
pub mod apdu;
pub mod capmt;
pub mod spdu;
pub mod tpdu;

mod resource;

use {
    crate::ts::Pmt,
    apdu::*,
    log::{error, info, warn},
    spdu::*,
    std::collections::VecDeque,
    tpdu::*,
};

/// TPDU fragmentation boundary and reassembly buffer bound.
pub const MAX_TPDU_SIZE: usize = 2048;

/// sessions per slot, index 0 unused
pub const MAX_SESSIONS: usize = 33;

const CONNECT_TIMEOUT_MS: u64 = 1000;

/// Wall + monotonic clock snapshot handed into the host.
#[derive(Debug, Clone, Copy)]
pub struct CiClock {
    pub monotonic_ms: u64,
    pub unix_seconds: u64,
}

/// Host-visible protocol milestones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiEvent {
    /// Transport connection established.
    SlotActive { slot: u8 },
    /// The slot must be hardware-reset by the owner.
    SlotReset { slot: u8 },
    ApplicationInfo {
        slot: u8,
        kind: u8,
        manufacturer: u16,
        product: u16,
        name: String,
    },
    /// CAM advertised its CA system ids.
    CaInfo { slot: u8, caids: Vec<u16> },
    MmiEnquiry {
        slot: u8,
        blind: bool,
        text: String,
    },
    MmiMenu {
        slot: u8,
        is_list: bool,
        title: String,
        subtitle: String,
        bottom: String,
        choices: Vec<String>,
    },
}

pub(crate) struct MmiState {
    pub blind: bool,
    pub text: String,
}

pub(crate) enum SessionData {
    None,
    CaSupport { caids: Vec<u16> },
    DateTime { interval_ms: u64, last_ms: u64 },
    Mmi(Option<MmiState>),
}

pub(crate) struct Session {
    pub resource_id: u32,
    pub data: SessionData,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            resource_id: 0,
            data: SessionData::None,
        }
    }
}

struct Slot {
    id: u8,
    active: bool,
    busy: bool,
    busy_since: Option<u64>,
    queue: VecDeque<Vec<u8>>,
    buffer: Vec<u8>,
    pending_session: u16,
    sessions: Vec<Session>,
}

impl Slot {
    fn new(id: u8) -> Self {
        Slot {
            id,
            active: false,
            busy: false,
            busy_since: None,
            queue: VecDeque::new(),
            buffer: Vec::new(),
            pending_session: 0,
            sessions: (0..MAX_SESSIONS).map(|_| Session::default()).collect(),
        }
    }
}

struct Program {
    pnr: u16,
    crc: u32,
    pmt: Pmt,
    /// sent to the CAM at least once since the last CA_INFO
    sent: bool,
    dirty: bool,
}

pub struct CiHost {
    label: String,
    utc_offset_minutes: i16,
    slots: Vec<Slot>,
    out: VecDeque<Vec<u8>>,
    events: Vec<CiEvent>,
    programs: Vec<Program>,
    /// CA-PMT dispatch is held off for this long after CA_INFO
    pmt_delay_ms: u64,
    pmt_ready_at: Option<u64>,
}

impl CiHost {
    pub fn new(label: &str, slots: u32, utc_offset_minutes: i16) -> Self {
        CiHost {
            label: label.to_owned(),
            utc_offset_minutes,
            slots: (0..slots as u8).map(Slot::new).collect(),
            out: VecDeque::new(),
            events: Vec::new(),
            programs: Vec::new(),
            pmt_delay_ms: 500,
            pmt_ready_at: None,
        }
    }

    /// Next link frame to write to the CA device.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        self.out.pop_front()
    }

    pub fn take_events(&mut self) -> Vec<CiEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn utc_offset_minutes(&self) -> i16 {
        self.utc_offset_minutes
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// CAIDs advertised by any conditional-access session.
    pub fn caids(&self) -> Vec<u16> {
        let mut out = Vec::new();
        for slot in &self.slots {
            for session in &slot.sessions {
                if let SessionData::CaSupport { caids } = &session.data {
                    out.extend_from_slice(caids);
                }
            }
        }
        out
    }

    /* transport */

    fn slot_mut(&mut self, slot_id: u8) -> Option<&mut Slot> {
        self.slots.get_mut(slot_id as usize)
    }

    fn flush_queue(&mut self, slot_id: u8, now_ms: u64) {
        let slot = match self.slot_mut(slot_id) {
            Some(s) => s,
            None => return,
        };
        if slot.busy {
            return;
        }
        if let Some(frame) = slot.queue.pop_front() {
            slot.busy = true;
            slot.busy_since = Some(now_ms);
            self.out.push_back(frame);
        }
    }

    pub(crate) fn tpdu_send(&mut self, slot_id: u8, tag: u8, data: &[u8], now_ms: u64) {
        let frame = tpdu::frame(slot_id, tag, data);
        if let Some(slot) = self.slot_mut(slot_id) {
            slot.queue.push_back(frame);
        }
        self.flush_queue(slot_id, now_ms);
    }

    /// Wraps an APDU into SESSION_NUMBER SPDU and fragments it over
    /// DATA_MORE/DATA_LAST at the 2048-byte boundary.
    pub(crate) fn apdu_send(
        &mut self,
        slot_id: u8,
        session_id: u16,
        tag: u32,
        data: &[u8],
        now_ms: u64,
    ) {
        let mut spdu = Vec::with_capacity(data.len() + 16);
        spdu.push(ST_SESSION_NUMBER);
        spdu.push(0x02);
        spdu.extend_from_slice(&session_id.to_be_bytes());
        apdu::pack(&mut spdu, tag, data);

        let mut skip = 0;
        while skip < spdu.len() {
            let remain = spdu.len() - skip;
            if remain > MAX_TPDU_SIZE {
                self.tpdu_send(slot_id, TT_DATA_MORE, &spdu[skip..skip + MAX_TPDU_SIZE], now_ms);
                skip += MAX_TPDU_SIZE;
            } else {
                self.tpdu_send(slot_id, TT_DATA_LAST, &spdu[skip..], now_ms);
                break;
            }
        }
    }

    /* slot lifecycle */

    fn reset_slot(&mut self, slot_id: u8) {
        let label = self.label.clone();
        if let Some(slot) = self.slot_mut(slot_id) {
            slot.active = false;
            slot.busy = false;
            slot.busy_since = None;
            slot.queue.clear();
            slot.buffer.clear();
            slot.pending_session = 0;
            for session in &mut slot.sessions {
                *session = Session::default();
            }
        }
        info!("[{}] slot {} reset", label, slot_id);
        self.events.push(CiEvent::SlotReset { slot: slot_id });
    }

    /// Runs the 100 ms poll: slot lifecycle, per-session periodic
    /// work and CA-PMT dispatch. `ready[i]` mirrors the module
    /// presence bit of slot `i`.
    pub fn tick(&mut self, clock: CiClock, ready: &[bool]) {
        for slot_id in 0..self.slots.len() as u8 {
            let is_ready = ready.get(slot_id as usize).copied().unwrap_or(false);
            let (active, busy, busy_since) = {
                let slot = &self.slots[slot_id as usize];
                (slot.active, slot.busy, slot.busy_since)
            };

            if !is_ready {
                if active {
                    warn!("[{}] slot {} is not ready", self.label, slot_id);
                    self.reset_slot(slot_id);
                }
                continue;
            }

            if !active {
                if !busy {
                    info!("[{}] slot {} ready to go", self.label, slot_id);
                    self.tpdu_send(slot_id, TT_CREATE_TC, &[], clock.monotonic_ms);
                } else if busy_since
                    .map(|t| clock.monotonic_ms - t >= CONNECT_TIMEOUT_MS)
                    .unwrap_or(false)
                {
                    warn!("[{}] slot {} timeout, reset", self.label, slot_id);
                    self.reset_slot(slot_id);
                }
                continue;
            }

            self.date_time_manage(slot_id, clock);

            // idle poll picks up the status byte
            if !self.slots[slot_id as usize].busy {
                self.tpdu_send(slot_id, TT_DATA_LAST, &[], clock.monotonic_ms);
            }
        }

        self.dispatch_ca_pmt(clock.monotonic_ms);
    }

    /// Feeds one link frame read from the CA device.
    pub fn on_frame(&mut self, frame: &[u8], clock: CiClock) {
        let parsed = match tpdu::parse(frame) {
            Some(parsed) => parsed,
            None => {
                error!("[{}] short or malformed link frame", self.label);
                return;
            }
        };
        let slot_id = parsed.slot_id;
        if slot_id as usize >= self.slots.len() {
            error!("[{}] frame for unknown slot {}", self.label, slot_id);
            return;
        }

        {
            let slot = &mut self.slots[slot_id as usize];
            slot.busy = false;
            slot.busy_since = None;
        }

        match parsed.tag {
            TT_CTC_REPLY => {
                self.slots[slot_id as usize].active = true;
                info!("[{}] slot {} is active", self.label, slot_id);
                self.events.push(CiEvent::SlotActive { slot: slot_id });
            }
            TT_DATA_LAST | TT_DATA_MORE => {
                let overflow = {
                    let slot = &mut self.slots[slot_id as usize];
                    if slot.buffer.len() + parsed.data.len() > MAX_TPDU_SIZE {
                        slot.buffer.clear();
                        true
                    } else {
                        slot.buffer.extend_from_slice(parsed.data);
                        false
                    }
                };
                if overflow {
                    error!("[{}] slot {} tpdu buffer limit", self.label, slot_id);
                } else if parsed.tag == TT_DATA_LAST {
                    let spdu = std::mem::take(&mut self.slots[slot_id as usize].buffer);
                    if !spdu.is_empty() {
                        self.spdu_dispatch(slot_id, &spdu, clock);
                    }
                }
            }
            TT_SB => {}
            other => {
                warn!("[{}] slot {} wrong tag 0x{:02X}", self.label, slot_id, other);
            }
        }

        self.flush_queue(slot_id, clock.monotonic_ms);

        // a session accepted with OPEN_SESSION_RESPONSE starts its
        // resource once the response frame is out
        let pending = {
            let slot = &self.slots[slot_id as usize];
            if !slot.busy && slot.pending_session != 0 {
                slot.pending_session
            } else {
                0
            }
        };
        if pending != 0 {
            self.slots[slot_id as usize].pending_session = 0;
            let resource_id = self.slots[slot_id as usize].sessions[pending as usize].resource_id;
            self.session_open(slot_id, pending, resource_id, clock);
        }

        if !self.slots[slot_id as usize].busy && parsed.has_data {
            self.tpdu_send(slot_id, TT_RCV, &[], clock.monotonic_ms);
        }
    }

    /* session layer */

    fn spdu_dispatch(&mut self, slot_id: u8, spdu: &[u8], clock: CiClock) {
        match spdu[0] {
            ST_SESSION_NUMBER => {
                if spdu.len() <= SPDU_HEADER_SIZE {
                    return;
                }
                let session_id = u16::from_be_bytes([spdu[2], spdu[3]]);
                if session_id as usize >= MAX_SESSIONS {
                    return;
                }
                let resource_id = self.slots[slot_id as usize].sessions[session_id as usize]
                    .resource_id;
                self.session_event(slot_id, session_id, resource_id, spdu, clock);
            }
            ST_OPEN_SESSION_REQUEST => {
                if spdu.len() != 6 || spdu[1] != 0x04 {
                    return;
                }
                self.spdu_open(slot_id, spdu, clock);
            }
            ST_CLOSE_SESSION_REQUEST => {
                if spdu.len() != 4 || spdu[1] != 0x02 {
                    return;
                }
                let session_id = u16::from_be_bytes([spdu[2], spdu[3]]);
                if (session_id as usize) < MAX_SESSIONS {
                    self.slots[slot_id as usize].sessions[session_id as usize] =
                        Session::default();
                }
                let mut response = vec![ST_CLOSE_SESSION_RESPONSE, 0x03, SPDU_STATUS_OPENED];
                response.extend_from_slice(&session_id.to_be_bytes());
                self.tpdu_send(slot_id, TT_DATA_LAST, &response, clock.monotonic_ms);
            }
            ST_CREATE_SESSION_RESPONSE => {
                if spdu.len() != 9 || spdu[1] != 0x07 {
                    return;
                }
                let session_id = u16::from_be_bytes([spdu[7], spdu[8]]);
                let resource_id = u32::from_be_bytes([spdu[3], spdu[4], spdu[5], spdu[6]]);
                if spdu[2] != SPDU_STATUS_OPENED {
                    error!(
                        "[{}] slot {} failed to open session {}",
                        self.label, slot_id, session_id
                    );
                    return;
                }
                if (session_id as usize) < MAX_SESSIONS {
                    self.slots[slot_id as usize].sessions[session_id as usize].resource_id =
                        resource_id;
                    self.session_open(slot_id, session_id, resource_id, clock);
                }
            }
            ST_CLOSE_SESSION_RESPONSE => {
                if spdu.len() != 5 || spdu[1] != 0x03 {
                    return;
                }
                let session_id = u16::from_be_bytes([spdu[3], spdu[4]]);
                if (session_id as usize) < MAX_SESSIONS {
                    self.slots[slot_id as usize].sessions[session_id as usize] =
                        Session::default();
                }
            }
            other => {
                error!("[{}] wrong SPDU tag 0x{:02X}", self.label, other);
            }
        }
    }

    fn spdu_open(&mut self, slot_id: u8, spdu: &[u8], clock: CiClock) {
        let resource_id = u32::from_be_bytes([spdu[2], spdu[3], spdu[4], spdu[5]]);

        let session_id = {
            let slot = &self.slots[slot_id as usize];
            (1..MAX_SESSIONS as u16).find(|&i| slot.sessions[i as usize].resource_id == 0)
        };
        let session_id = match session_id {
            Some(id) => id,
            None => {
                error!("[{}] slot {} session limit", self.label, slot_id);
                return;
            }
        };

        let known = matches!(
            resource_id,
            RI_RESOURCE_MANAGER
                | RI_APPLICATION_INFORMATION
                | RI_CONDITIONAL_ACCESS_SUPPORT
                | RI_DATE_TIME
                | RI_MMI
        );

        let mut response = vec![
            ST_OPEN_SESSION_RESPONSE,
            0x07,
            if known {
                SPDU_STATUS_OPENED
            } else {
                SPDU_STATUS_NOT_EXISTS
            },
        ];
        response.extend_from_slice(&resource_id.to_be_bytes());
        response.extend_from_slice(&session_id.to_be_bytes());
        self.tpdu_send(slot_id, TT_DATA_LAST, &response, clock.monotonic_ms);

        if known {
            let slot = &mut self.slots[slot_id as usize];
            slot.sessions[session_id as usize].resource_id = resource_id;
            slot.pending_session = session_id;
        }
    }

    /* CA-PMT list */

    /// Registers or refreshes a program for descrambling. Returns
    /// true when the PMT actually changed (by CRC).
    pub fn set_program(&mut self, pmt: &Pmt, crc: u32) -> bool {
        if let Some(entry) = self.programs.iter_mut().find(|p| p.pnr == pmt.pnr) {
            if entry.crc == crc {
                return false;
            }
            info!("[{}] PMT changed, pnr {}", self.label, pmt.pnr);
            entry.crc = crc;
            entry.pmt = pmt.clone();
            entry.dirty = true;
            return true;
        }
        self.programs.push(Program {
            pnr: pmt.pnr,
            crc,
            pmt: pmt.clone(),
            sent: false,
            dirty: true,
        });
        true
    }

    /// Deselects a program: update/not_selected to every CA session.
    pub fn remove_program(&mut self, pnr: u16, clock: CiClock) {
        let entry = match self.programs.iter().position(|p| p.pnr == pnr) {
            Some(i) => self.programs.remove(i),
            None => return,
        };
        if entry.sent {
            self.ca_pmt_send_all(
                &entry.pmt,
                capmt::CA_PMT_LM_UPDATE,
                capmt::CA_PMT_CMD_NOT_SELECTED,
                clock.monotonic_ms,
            );
        }
    }

    fn ca_pmt_send_all(&mut self, pmt: &Pmt, list_management: u8, cmd_id: u8, now_ms: u64) {
        let mut targets = Vec::new();
        for slot in &self.slots {
            for (session_id, session) in slot.sessions.iter().enumerate() {
                if let SessionData::CaSupport { caids } = &session.data {
                    if !caids.is_empty() {
                        targets.push((slot.id, session_id as u16, caids.clone()));
                    }
                }
            }
        }
        for (slot_id, session_id, caids) in targets {
            if let Some(wire) = capmt::build(pmt, &caids, list_management, cmd_id) {
                self.apdu_send(slot_id, session_id, AOT_CA_PMT, &wire, now_ms);
            }
        }
    }

    fn dispatch_ca_pmt(&mut self, now_ms: u64) {
        match self.pmt_ready_at {
            Some(at) if now_ms >= at => {}
            _ => return,
        }

        let next = self
            .programs
            .iter()
            .filter(|p| p.dirty)
            .min_by_key(|p| p.pnr)
            .map(|p| p.pnr);
        let pnr = match next {
            Some(pnr) => pnr,
            None => return,
        };

        let (pmt, lm) = {
            let entry = self.programs.iter_mut().find(|p| p.pnr == pnr).unwrap();
            entry.dirty = false;
            let lm = if entry.sent {
                capmt::CA_PMT_LM_UPDATE
            } else {
                capmt::CA_PMT_LM_ADD
            };
            entry.sent = true;
            (entry.pmt.clone(), lm)
        };
        self.ca_pmt_send_all(&pmt, lm, capmt::CA_PMT_CMD_OK_DESCRAMBLING, now_ms);
        self.pmt_ready_at = Some(now_ms + self.pmt_delay_ms);
    }

    /// Called by the CA support resource when CA_INFO arrives.
    pub(crate) fn on_ca_info(&mut self, now_ms: u64) {
        for program in &mut self.programs {
            program.sent = false;
            program.dirty = true;
        }
        self.pmt_ready_at = Some(now_ms + self.pmt_delay_ms);
    }

    pub(crate) fn push_event(&mut self, event: CiEvent) {
        self.events.push(event);
    }

    pub(crate) fn session(&mut self, slot_id: u8, session_id: u16) -> &mut Session {
        &mut self.slots[slot_id as usize].sessions[session_id as usize]
    }
}

#[cfg(test)]
mod tests;
