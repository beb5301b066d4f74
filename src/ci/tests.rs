use super::{
    apdu::{self, *},
    capmt, spdu, tpdu,
    tpdu::{DATA_INDICATOR, TT_CREATE_TC, TT_CTC_REPLY, TT_DATA_LAST, TT_SB},
    CiClock, CiEvent, CiHost,
};
use crate::ts::{Descriptor, Pmt, PmtItem};

fn clock(ms: u64) -> CiClock {
    CiClock {
        monotonic_ms: ms,
        unix_seconds: 1_000_000 + ms / 1000,
    }
}

/// Frame as the CAM would send it: TPDU plus the status trailer.
fn cam_frame(slot: u8, tag: u8, data: &[u8], has_data: bool) -> Vec<u8> {
    let mut frame = tpdu::frame(slot, tag, data);
    frame.extend_from_slice(&[
        TT_SB,
        2,
        slot + 1,
        if has_data { DATA_INDICATOR } else { 0 },
    ]);
    frame
}

fn sb_ack(slot: u8) -> Vec<u8> {
    let mut frame = vec![slot, slot + 1, TT_SB];
    frame.extend_from_slice(&[TT_SB, 2, slot + 1, 0]);
    frame
}

/// Drains host frames, acking each so the queue keeps moving.
fn drain(host: &mut CiHost, ms: u64) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(frame) = host.pop_frame() {
        frames.push(frame);
        host.on_frame(&sb_ack(0), clock(ms));
    }
    frames
}

fn apdu_of(frame: &[u8]) -> Option<(u32, Vec<u8>)> {
    let parsed = tpdu::parse(frame)?;
    if parsed.data.first() != Some(&spdu::ST_SESSION_NUMBER) {
        return None;
    }
    Some((apdu::tag(parsed.data), apdu::body(parsed.data).to_vec()))
}

/// Brings slot 0 to active with one session of `resource_id` open.
/// Returns the session id and every frame the host emitted on the
/// way, the resource's opening APDU included.
fn negotiate(host: &mut CiHost, resource_id: u32, ms: u64) -> (u16, Vec<Vec<u8>>) {
    host.tick(clock(ms), &[true]);
    let mut frames = drain(host, ms);
    assert!(frames.iter().any(|f| f[2] == TT_CREATE_TC));

    host.on_frame(&cam_frame(0, TT_CTC_REPLY, &[], false), clock(ms));
    assert_eq!(host.take_events(), vec![CiEvent::SlotActive { slot: 0 }]);

    let mut open = vec![spdu::ST_OPEN_SESSION_REQUEST, 0x04];
    open.extend_from_slice(&resource_id.to_be_bytes());
    host.on_frame(&cam_frame(0, TT_DATA_LAST, &open, false), clock(ms));

    // response carries status opened + the assigned session id
    frames.extend(drain(host, ms));
    let response = frames
        .iter()
        .find_map(|f| {
            let parsed = tpdu::parse(f)?;
            if parsed.data.first() == Some(&spdu::ST_OPEN_SESSION_RESPONSE) {
                Some(parsed.data.to_vec())
            } else {
                None
            }
        })
        .expect("no open session response");
    assert_eq!(response[2], spdu::SPDU_STATUS_OPENED);
    (u16::from_be_bytes([response[7], response[8]]), frames)
}

#[test]
fn resource_manager_profile_exchange() {
    let mut host = CiHost::new("ci-test", 1, 0);
    let (session, frames) = negotiate(&mut host, RI_RESOURCE_MANAGER, 0);
    assert_eq!(session, 1);

    // session open fired PROFILE_ENQ
    assert!(frames
        .iter()
        .any(|f| apdu_of(f).map(|(t, _)| t) == Some(AOT_PROFILE_ENQ)));

    // CAM asks for our profile: all five resources, big-endian
    let mut enq = vec![spdu::ST_SESSION_NUMBER, 0x02];
    enq.extend_from_slice(&session.to_be_bytes());
    apdu::pack(&mut enq, AOT_PROFILE_ENQ, &[]);
    host.on_frame(&cam_frame(0, TT_DATA_LAST, &enq, false), clock(1));

    let frames = drain(&mut host, 1);
    let (tag, body) = frames.iter().find_map(|f| apdu_of(f)).unwrap();
    assert_eq!(tag, AOT_PROFILE);
    assert_eq!(body.len(), 20);
    assert_eq!(&body[0..4], &RI_RESOURCE_MANAGER.to_be_bytes());
    assert_eq!(&body[16..20], &RI_MMI.to_be_bytes());
}

#[test]
fn unknown_resource_is_refused() {
    let mut host = CiHost::new("ci-test", 1, 0);
    host.tick(clock(0), &[true]);
    drain(&mut host, 0);
    host.on_frame(&cam_frame(0, TT_CTC_REPLY, &[], false), clock(0));

    let mut open = vec![spdu::ST_OPEN_SESSION_REQUEST, 0x04];
    open.extend_from_slice(&RI_HOST_CONTROL.to_be_bytes());
    host.on_frame(&cam_frame(0, TT_DATA_LAST, &open, false), clock(0));

    let frames = drain(&mut host, 0);
    let response = frames
        .iter()
        .find_map(|f| {
            let parsed = tpdu::parse(f)?;
            (parsed.data.first() == Some(&spdu::ST_OPEN_SESSION_RESPONSE))
                .then(|| parsed.data.to_vec())
        })
        .unwrap();
    assert_eq!(response[2], spdu::SPDU_STATUS_NOT_EXISTS);
}

#[test]
fn ca_info_is_stored_and_reported() {
    let mut host = CiHost::new("ci-test", 1, 0);
    let (session, _) = negotiate(&mut host, RI_CONDITIONAL_ACCESS_SUPPORT, 0);

    let mut info = vec![spdu::ST_SESSION_NUMBER, 0x02];
    info.extend_from_slice(&session.to_be_bytes());
    apdu::pack(&mut info, AOT_CA_INFO, &[0x05, 0x00, 0x0B, 0x00]);
    host.on_frame(&cam_frame(0, TT_DATA_LAST, &info, false), clock(2));

    assert_eq!(host.caids(), vec![0x0500, 0x0B00]);
    assert_eq!(
        host.take_events(),
        vec![CiEvent::CaInfo {
            slot: 0,
            caids: vec![0x0500, 0x0B00],
        }]
    );
}

#[test]
fn date_time_resends_at_requested_interval() {
    // one reply answers the enquiry; the next follows after the
    // requested interval
    let mut host = CiHost::new("ci-test", 1, 120);
    let (session, frames) = negotiate(&mut host, RI_DATE_TIME, 0);

    // the session open already sent one unsolicited date-time
    assert!(frames
        .iter()
        .any(|f| apdu_of(f).map(|(t, _)| t) == Some(AOT_DATE_TIME)));

    let mut enq = vec![spdu::ST_SESSION_NUMBER, 0x02];
    enq.extend_from_slice(&session.to_be_bytes());
    apdu::pack(&mut enq, AOT_DATE_TIME_ENQ, &[30]);
    host.on_frame(&cam_frame(0, TT_DATA_LAST, &enq, false), clock(1_000));

    let frames = drain(&mut host, 1_000);
    let (tag, body) = frames.iter().find_map(|f| apdu_of(f)).unwrap();
    assert_eq!(tag, AOT_DATE_TIME);
    assert_eq!(body.len(), 7);
    // local offset in minutes, big-endian
    assert_eq!(&body[5..7], &120i16.to_be_bytes());

    // polls before the interval elapses carry no date-time
    for ms in [6_000u64, 16_000, 26_000] {
        host.tick(clock(ms), &[true]);
        let frames = drain(&mut host, ms);
        assert!(
            !frames
                .iter()
                .any(|f| apdu_of(f).map(|(t, _)| t) == Some(AOT_DATE_TIME)),
            "premature date-time at {}ms",
            ms
        );
    }

    host.tick(clock(31_050), &[true]);
    let frames = drain(&mut host, 31_050);
    assert!(frames
        .iter()
        .any(|f| apdu_of(f).map(|(t, _)| t) == Some(AOT_DATE_TIME)));
}

#[test]
fn mjd_and_bcd_encoding() {
    let mut host = CiHost::new("ci-test", 1, 0);
    let (session, _) = negotiate(&mut host, RI_DATE_TIME, 0);

    let mut enq = vec![spdu::ST_SESSION_NUMBER, 0x02];
    enq.extend_from_slice(&session.to_be_bytes());
    apdu::pack(&mut enq, AOT_DATE_TIME_ENQ, &[0]);
    // 2021-01-01 12:34:56 UTC
    let wall = 1_609_504_496u64;
    host.on_frame(
        &cam_frame(0, TT_DATA_LAST, &enq, false),
        CiClock {
            monotonic_ms: 5,
            unix_seconds: wall,
        },
    );
    let frames = drain(&mut host, 5);
    let (_, body) = frames
        .iter()
        .filter_map(|f| apdu_of(f))
        .find(|(t, _)| *t == AOT_DATE_TIME)
        .unwrap();
    let mjd = u16::from_be_bytes([body[0], body[1]]);
    assert_eq!(mjd, (wall / 86400) as u16 + 40587); // 59215
    assert_eq!(body[2], 0x12);
    assert_eq!(body[3], 0x34);
    assert_eq!(body[4], 0x56);
}

fn scrambled_pmt(version: u8) -> Pmt {
    Pmt {
        pnr: 1,
        version,
        current_next: true,
        pcr_pid: 258,
        descriptors: vec![Descriptor::Ca {
            caid: 0x0500,
            pid: 1010,
            data: vec![],
        }],
        items: vec![PmtItem {
            stream_type: 0x02,
            pid: 258,
            descriptors: vec![],
        }],
    }
}

#[test]
fn ca_pmt_add_then_update_on_crc_change() {
    // a PMT version bump changes the CRC and re-announces the
    // program with list_management=update
    let mut host = CiHost::new("ci-test", 1, 0);
    let (session, _) = negotiate(&mut host, RI_CONDITIONAL_ACCESS_SUPPORT, 0);

    let mut info = vec![spdu::ST_SESSION_NUMBER, 0x02];
    info.extend_from_slice(&session.to_be_bytes());
    apdu::pack(&mut info, AOT_CA_INFO, &[0x05, 0x00]);
    host.on_frame(&cam_frame(0, TT_DATA_LAST, &info, false), clock(0));

    assert!(host.set_program(&scrambled_pmt(1), 0xAAAA_0001));
    // unchanged CRC is a no-op
    assert!(!host.set_program(&scrambled_pmt(1), 0xAAAA_0001));

    host.tick(clock(1_000), &[true]);
    let frames = drain(&mut host, 1_000);
    let (_, body) = frames
        .iter()
        .filter_map(|f| apdu_of(f))
        .find(|(t, _)| *t == AOT_CA_PMT)
        .expect("no ca_pmt");
    assert_eq!(body[0], capmt::CA_PMT_LM_ADD);
    assert_eq!(body[6], capmt::CA_PMT_CMD_OK_DESCRAMBLING);

    // version bump changes the CRC: exactly one update
    assert!(host.set_program(&scrambled_pmt(2), 0xAAAA_0002));
    host.tick(clock(2_000), &[true]);
    let frames = drain(&mut host, 2_000);
    let updates: Vec<_> = frames
        .iter()
        .filter_map(|f| apdu_of(f))
        .filter(|(t, _)| *t == AOT_CA_PMT)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1[0], capmt::CA_PMT_LM_UPDATE);
}

#[test]
fn deselect_sends_not_selected() {
    let mut host = CiHost::new("ci-test", 1, 0);
    let (session, _) = negotiate(&mut host, RI_CONDITIONAL_ACCESS_SUPPORT, 0);

    let mut info = vec![spdu::ST_SESSION_NUMBER, 0x02];
    info.extend_from_slice(&session.to_be_bytes());
    apdu::pack(&mut info, AOT_CA_INFO, &[0x05, 0x00]);
    host.on_frame(&cam_frame(0, TT_DATA_LAST, &info, false), clock(0));

    host.set_program(&scrambled_pmt(1), 1);
    host.tick(clock(1_000), &[true]);
    drain(&mut host, 1_000);

    host.remove_program(1, clock(1_100));
    let frames = drain(&mut host, 1_100);
    let (_, body) = frames
        .iter()
        .filter_map(|f| apdu_of(f))
        .find(|(t, _)| *t == AOT_CA_PMT)
        .expect("no ca_pmt");
    assert_eq!(body[0], capmt::CA_PMT_LM_UPDATE);
    assert_eq!(body[6], capmt::CA_PMT_CMD_NOT_SELECTED);
}

#[test]
fn module_loss_resets_slot() {
    let mut host = CiHost::new("ci-test", 1, 0);
    negotiate(&mut host, RI_RESOURCE_MANAGER, 0);
    host.take_events();

    host.tick(clock(100), &[false]);
    assert_eq!(host.take_events(), vec![CiEvent::SlotReset { slot: 0 }]);
    assert!(host.caids().is_empty());
}
