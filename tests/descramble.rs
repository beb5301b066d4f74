//! End-to-end pipeline scenarios: PSI routing through the decrypt
//! node and control-word installation against a stub CAM.

use {
    dvbpipe::{
        cam::{Cam, CamEvent, CamInfo, DecryptConfig, Decrypt, EmPacket, KeyReply},
        csa::PassthroughCsa,
        pipeline::{Ctx, Graph, Node, NodeId},
        ts::{self, Descriptor, Pat, Pmt, PmtItem, Psi, PsiKind, TS_PACKET_SIZE},
    },
    std::{cell::RefCell, rc::Rc},
};

struct Source;

impl Node for Source {
    fn name(&self) -> &str {
        "source"
    }
    fn on_ts(&mut self, _ctx: &mut Ctx, _ts: &[u8]) {}
}

struct Sink {
    seen: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Node for Sink {
    fn name(&self) -> &str {
        "sink"
    }
    fn on_ts(&mut self, _ctx: &mut Ctx, packet: &[u8]) {
        self.seen.borrow_mut().push(packet.to_vec());
    }
}

struct StubCam {
    info: CamInfo,
    ready: bool,
    sent: Vec<EmPacket>,
}

impl Cam for StubCam {
    fn info(&self) -> &CamInfo {
        &self.info
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn queue_em(&mut self, packet: EmPacket) {
        self.sent.push(packet);
    }
}

fn stub_cam(caid: u16) -> Rc<RefCell<StubCam>> {
    Rc::new(RefCell::new(StubCam {
        info: CamInfo {
            caid,
            disable_emm: true,
            ..CamInfo::default()
        },
        ready: true,
        sent: Vec::new(),
    }))
}

fn psi_packets(kind: PsiKind, pid: u16, assemble: impl FnOnce(&mut Psi)) -> Vec<Vec<u8>> {
    let mut psi = Psi::new(kind, pid);
    assemble(&mut psi);
    let mut out = Vec::new();
    psi.demux(|p| out.push(p.to_vec()));
    out
}

fn pat_packets() -> Vec<Vec<u8>> {
    psi_packets(PsiKind::Pat, 0, |psi| {
        Pat {
            stream_id: 1,
            version: 0,
            current_next: true,
            items: vec![(1, 256)],
        }
        .assemble(psi)
    })
}

fn pmt_packets(with_ca: bool) -> Vec<Vec<u8>> {
    psi_packets(PsiKind::Pmt, 256, |psi| {
        Pmt {
            pnr: 1,
            version: 1,
            current_next: true,
            pcr_pid: 258,
            descriptors: if with_ca {
                vec![Descriptor::Ca {
                    caid: 0x0500,
                    pid: 1010,
                    data: vec![],
                }]
            } else {
                vec![]
            },
            items: vec![
                PmtItem {
                    stream_type: 0x02,
                    pid: 258,
                    descriptors: vec![],
                },
                PmtItem {
                    stream_type: 0x04,
                    pid: 259,
                    descriptors: vec![],
                },
            ],
        }
        .assemble(psi)
    })
}

fn ecm_packets(parity: u8, cc: u8) -> Vec<Vec<u8>> {
    let mut packets = psi_packets(PsiKind::Ecm, 1010, |psi| {
        let mut section = vec![parity, 0, 0];
        section.extend_from_slice(&[0xA5; 20]);
        let len = section.len() - 3;
        section[1] = 0x80 | ((len >> 8) as u8 & 0x0F);
        section[2] = len as u8;
        psi.set_section(&section);
    });
    for packet in &mut packets {
        ts::set_cc(packet, cc);
    }
    packets
}

fn video_packet(cc: u8, scrambled: bool) -> Vec<u8> {
    let mut packet = vec![0xFFu8; TS_PACKET_SIZE];
    packet[0] = 0x47;
    packet[1] = 0x01; // pid 258
    packet[2] = 0x02;
    packet[3] = 0x10 | (cc & 0x0F);
    if scrambled {
        packet[3] |= 0x80;
    }
    packet
}

struct Bench {
    graph: Graph,
    source: NodeId,
    handle: dvbpipe::cam::DecryptHandle,
    cam: Rc<RefCell<StubCam>>,
    seen: Rc<RefCell<Vec<Vec<u8>>>>,
}

fn bench(sink_pids: &[u16], cluster: usize) -> Bench {
    let mut graph = Graph::new();
    let source = graph.add(Box::new(Source));
    let cam = stub_cam(0x0500);
    let handle = Decrypt::create(
        &mut graph,
        DecryptConfig {
            name: "svc1".into(),
            ..DecryptConfig::default()
        },
        Box::new(PassthroughCsa::new(cluster)),
        cam.clone(),
    );
    graph.attach(source, handle.node_id()).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = graph.add(Box::new(Sink { seen: seen.clone() }));
    graph.attach(handle.node_id(), sink).unwrap();
    for &pid in sink_pids {
        graph.join_pid(sink, pid);
    }

    handle.cam_status(&mut graph, true);

    Bench {
        graph,
        source,
        handle,
        cam,
        seen,
    }
}

#[test]
fn clear_program_pmt_only_sink() {
    // a sink wanting the PMT PID only: the source ends up demanded
    // for exactly the PAT and the PMT
    let mut b = bench(&[256], 4);

    // the sink's demand is already lifted into the source; the CAM
    // brought the PAT subscription
    assert_eq!(b.graph.demanded_pids(b.source), vec![0, 256]);

    for p in pat_packets() {
        b.graph.send(b.source, &p);
    }
    assert_eq!(b.graph.demanded_pids(b.source), vec![0, 256]);

    for p in pmt_packets(false) {
        b.graph.send(b.source, &p);
    }
    // clear program: no ECM PID appears
    assert_eq!(b.graph.demanded_pids(b.source), vec![0, 256]);

    // the sink saw the PMT stream only, and the sections check out
    let seen = b.seen.borrow();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|p| ts::get_pid(p) == 256));

    let mut reassembly = Psi::new(PsiKind::Pmt, 256);
    let mut sections = Vec::new();
    for packet in seen.iter() {
        reassembly.push_ts(packet, |p| {
            assert!(p.check_crc());
            sections.push(Pmt::parse(p).unwrap());
        });
    }
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].pnr, 1);
    // the re-emitted map carries no CA descriptors
    assert!(sections[0].descriptors.is_empty());
}

#[test]
fn scrambled_program_descrambles_after_cw_install() {
    // canned ECMs with alternating parity; a stub CAM returns
    // fixed control words; the video turns clear within a few packets
    let mut b = bench(&[258], 1);

    for p in pat_packets() {
        b.graph.send(b.source, &p);
    }
    for p in pmt_packets(true) {
        b.graph.send(b.source, &p);
    }
    // the descrambler followed the CA descriptor to the ECM PID
    assert!(b.graph.demanded_pids(b.source).contains(&1010));

    // first ECM reaches the CAM (parity 0x80)
    for p in ecm_packets(0x80, 0) {
        b.graph.send(b.source, &p);
    }
    assert_eq!(b.cam.borrow().sent.len(), 1);
    assert_eq!(b.cam.borrow().sent[0].payload[0], 0x80);
    let pnr = b.cam.borrow().sent[0].pnr;
    assert_eq!(pnr, 1);

    // scrambled video before any key: passes through untouched
    b.graph.send(b.source, &video_packet(0, true));
    {
        let seen = b.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(ts::get_sc(&seen[0]), 0x80);
    }
    b.seen.borrow_mut().clear();

    // key arrives with 10 ms latency (immediately here)
    b.handle.on_cam_event(
        &mut b.graph,
        &CamEvent::Key {
            pnr,
            reply: KeyReply {
                parity: 0x80,
                cw: Some([0x11; 16]),
            },
        },
    );
    assert!(b.handle.has_keys());

    // scrambling control goes to 00 within three packets
    for cc in 1..8u8 {
        b.graph.send(b.source, &video_packet(cc, true));
    }
    let seen = b.seen.borrow();
    assert!(seen.len() >= 5);
    for (i, packet) in seen.iter().enumerate() {
        if i >= 3 {
            assert_eq!(ts::get_sc(packet), 0x00, "packet {} still scrambled", i);
        }
    }
    drop(seen);

    // second ECM with the opposite parity is forwarded too
    for p in ecm_packets(0x81, 1) {
        b.graph.send(b.source, &p);
    }
    assert_eq!(b.cam.borrow().sent.len(), 2);
    assert_eq!(b.cam.borrow().sent[1].payload[0], 0x81);

    // the repeated parity is suppressed even on a fresh packet
    for p in ecm_packets(0x81, 2) {
        b.graph.send(b.source, &p);
    }
    assert_eq!(b.cam.borrow().sent.len(), 2);
}

#[test]
fn cam_loss_drops_subscriptions_and_keys() {
    let mut b = bench(&[258], 1);
    for p in pat_packets() {
        b.graph.send(b.source, &p);
    }
    for p in pmt_packets(true) {
        b.graph.send(b.source, &p);
    }
    assert!(!b.graph.demanded_pids(b.source).is_empty());

    b.handle.on_cam_event(&mut b.graph, &CamEvent::Down);
    // only the sink's own demand survives
    assert_eq!(b.graph.demanded_pids(b.source), vec![258]);
    assert!(!b.handle.has_keys());

    // back up: the PAT subscription returns
    b.handle.on_cam_event(&mut b.graph, &CamEvent::Ready);
    assert_eq!(b.graph.demanded_pids(b.source), vec![0, 258]);
}
