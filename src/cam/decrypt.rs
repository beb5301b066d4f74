//! Descrambling pipeline node.
//!
//! Scans PAT/CAT/PMT on its input, follows ECM/EMM PIDs through the
//! CAS filter to the CAM, re-emits a CA-stripped PMT downstream, and
//! batches payload packets into CSA clusters. A control word latched
//! by parity is installed only at a cluster boundary, after the last
//! packet of the opposite parity has been consumed.

use {
    super::{cas::Cas, Cam, CamEvent, KeyReply},
    crate::{
        csa::Descrambler,
        pipeline::{Ctx, Graph, Node, NodeId},
        ts::{self, Cat, Pat, Pmt, Psi, PsiKind, TS_PACKET_SIZE},
    },
    std::convert::TryInto,
    log::{error, info, warn},
    std::{cell::RefCell, collections::HashMap, rc::Rc},
};

#[derive(Debug, Clone)]
pub struct DecryptConfig {
    pub name: String,
    /// program number reported to the key server instead of the
    /// PMT's own
    pub real_pnr: Option<u16>,
    /// fixed ECM PID, skipping descriptor selection
    pub ecm_pid: Option<u16>,
    /// parse entitlements but never touch payload packets
    pub fake: bool,
}

impl Default for DecryptConfig {
    fn default() -> Self {
        DecryptConfig {
            name: String::from("decrypt"),
            real_pnr: None,
            ecm_pid: None,
            fake: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKey {
    None,
    Even,
    Odd,
}

struct Core {
    config: DecryptConfig,
    cam: Rc<RefCell<dyn Cam>>,
    cam_ready: bool,

    stream: HashMap<u16, Psi>,
    joined: Vec<u16>,
    reload: bool,
    custom_pmt: Option<Psi>,
    cas: Option<Cas>,

    csa: Box<dyn Descrambler>,
    is_keys: bool,
    current_key: [u8; 16],
    pending: PendingKey,

    cluster_bytes: usize,
    front: Vec<u8>,
    shadow: Vec<u8>,
    skip: usize,
}

impl Core {
    fn join(&mut self, ctx: &mut Ctx, pid: u16, kind: PsiKind) {
        if self.stream.contains_key(&pid) {
            return;
        }
        self.stream.insert(pid, Psi::new(kind, pid));
        self.joined.push(pid);
        ctx.join_pid(pid);
    }

    /// Drops every subscription and parser this node set up itself.
    fn teardown(&mut self, ctx: &mut Ctx) {
        for pid in self.joined.drain(..) {
            ctx.leave_pid(pid);
        }
        self.stream.clear();
        self.custom_pmt = None;
        self.cas = None;
        self.is_keys = false;
        self.pending = PendingKey::None;
    }

    fn restart(&mut self, ctx: &mut Ctx) {
        self.teardown(ctx);
        if self.cam_ready {
            self.join(ctx, 0, PsiKind::Pat);
        }
    }

    fn scan_pat(&mut self, ctx: &mut Ctx, psi: &mut Psi) {
        let crc = psi.stored_crc();
        if crc == psi.last_crc {
            return;
        }
        let pat = match Pat::parse(psi) {
            Ok(pat) => pat,
            Err(e) => {
                error!("[decrypt {}] PAT: {}", self.config.name, e);
                return;
            }
        };
        if psi.last_crc != 0 {
            info!("[decrypt {}] PAT changed, reload stream info", self.config.name);
            self.reload = true;
            return;
        }
        psi.last_crc = crc;

        for &(pnr, pid) in &pat.items {
            if pnr > 0 {
                self.join(ctx, pid, PsiKind::Pmt);
            }
        }
    }

    fn scan_cat(&mut self, ctx: &mut Ctx, psi: &mut Psi) {
        let crc = psi.stored_crc();
        if crc == psi.last_crc {
            return;
        }
        let cat = match Cat::parse(psi) {
            Ok(cat) => cat,
            Err(e) => {
                error!("[decrypt {}] CAT: {}", self.config.name, e);
                return;
            }
        };
        if psi.last_crc != 0 {
            info!("[decrypt {}] CAT changed, reload stream info", self.config.name);
            self.reload = true;
            return;
        }
        psi.last_crc = crc;

        let caid = self.cam.borrow().info().caid;
        let mut emm_pids = Vec::new();
        for (desc_caid, emm_pid) in cat.emm_pids() {
            if desc_caid == caid && emm_pid > 0 && emm_pid < ts::MAX_PID {
                emm_pids.push(emm_pid);
            }
        }
        for emm_pid in emm_pids {
            info!("[decrypt {}] select EMM pid:{}", self.config.name, emm_pid);
            self.join(ctx, emm_pid, PsiKind::Emm);
        }
    }

    /// ECM PID out of one CA descriptor loop. Returns how many PIDs
    /// were selected.
    fn select_ecm_pids(
        &mut self,
        ctx: &mut Ctx,
        descriptors: &[ts::Descriptor],
    ) -> usize {
        let cam_info = self.cam.borrow().info().clone();
        let mut selected = 0;
        for desc in descriptors {
            let (caid, pid, private) = match desc {
                ts::Descriptor::Ca { caid, pid, data } => (*caid, *pid, data.as_slice()),
                _ => continue,
            };

            if let Some(forced) = self.config.ecm_pid {
                if pid == forced {
                    self.join(ctx, pid, PsiKind::Ecm);
                    selected += 1;
                }
                continue;
            }

            if caid != cam_info.caid {
                continue;
            }
            let cas = match &mut self.cas {
                Some(cas) => cas,
                None => continue,
            };
            if let Some(ecm_pid) = cas.extract_ecm_pid(&cam_info, pid, private) {
                if ecm_pid > 0 && ecm_pid < ts::MAX_PID && !self.stream.contains_key(&ecm_pid) {
                    info!("[decrypt {}] select ECM pid:{}", self.config.name, ecm_pid);
                    self.join(ctx, ecm_pid, PsiKind::Ecm);
                    selected += 1;
                }
            }
        }
        selected
    }

    fn scan_pmt(&mut self, ctx: &mut Ctx, psi: &mut Psi) {
        let crc = psi.stored_crc();
        if crc == psi.last_crc {
            // repetition keeps the downstream PMT alive
            if let Some(custom) = &mut self.custom_pmt {
                custom.demux(|packet| ctx.send(packet));
            }
            return;
        }
        let pmt = match Pmt::parse(psi) {
            Ok(pmt) => pmt,
            Err(e) => {
                error!("[decrypt {}] PMT: {}", self.config.name, e);
                return;
            }
        };
        if psi.last_crc != 0 {
            info!("[decrypt {}] PMT changed, reload stream info", self.config.name);
            self.reload = true;
            return;
        }
        psi.last_crc = crc;

        // bind the CAS once, on the first program map seen
        if self.cas.is_none() {
            let caid = self.cam.borrow().info().caid;
            let cas_pnr = self.config.real_pnr.unwrap_or(pmt.pnr);
            match Cas::for_caid(caid, cas_pnr) {
                Some(cas) => {
                    info!(
                        "[decrypt {}] {} selected. caid:0x{:04X}",
                        self.config.name,
                        cas.name(),
                        caid
                    );
                    self.cas = Some(cas);
                }
                None => {
                    error!(
                        "[decrypt {}] cas with caid:0x{:04X} is not found",
                        self.config.name, caid
                    );
                }
            }
        }

        let mut ecm_count = self.select_ecm_pids(ctx, &pmt.descriptors);
        if ecm_count == 0 {
            let items = pmt.items.clone();
            for item in &items {
                ecm_count += self.select_ecm_pids(ctx, &item.descriptors);
            }
        }

        let disable_emm = self.cam.borrow().info().disable_emm;
        if ecm_count > 0 && !disable_emm {
            self.join(ctx, 1, PsiKind::Cat);
        }

        // downstream sees the map without its CA descriptors
        let custom = self
            .custom_pmt
            .get_or_insert_with(|| Psi::new(PsiKind::Pmt, psi.pid));
        pmt.without_ca_descriptors().assemble(custom);
        custom.demux(|packet| ctx.send(packet));
    }

    fn scan_em(&mut self, section: &[u8]) {
        let cas = match &mut self.cas {
            Some(cas) => cas,
            None => return,
        };
        let mut cam = self.cam.borrow_mut();
        if !cam.is_ready() {
            return;
        }
        if let Some(packet) = cas.filter_em(cam.info(), section) {
            cam.queue_em(packet);
        }
    }

    /// Accumulates payload into the front cluster while sending the
    /// shadow cluster (previous, already descrambled) downstream.
    fn descramble_path(&mut self, ctx: &mut Ctx, packet: &[u8]) {
        self.front.extend_from_slice(packet);

        if !self.shadow.is_empty() {
            let from = self.skip;
            let shadow_packet: [u8; TS_PACKET_SIZE] =
                self.shadow[from..from + TS_PACKET_SIZE].try_into().unwrap();
            ctx.send(&shadow_packet);
        }
        self.skip += TS_PACKET_SIZE;

        if self.skip < self.cluster_bytes {
            return;
        }

        let packets = self.cluster_bytes / TS_PACKET_SIZE;
        let mut done = 0;
        while done < packets {
            let processed = self.csa.descramble(&mut self.front[done * TS_PACKET_SIZE..]);
            if processed == 0 {
                break;
            }
            done += processed;
        }

        // the opposite-parity run is finished: rotate the latched key
        match self.pending {
            PendingKey::Even => {
                let mut cw = [0u8; 8];
                cw.copy_from_slice(&self.current_key[0..8]);
                self.csa.set_even_cw(&cw);
            }
            PendingKey::Odd => {
                let mut cw = [0u8; 8];
                cw.copy_from_slice(&self.current_key[8..16]);
                self.csa.set_odd_cw(&cw);
            }
            PendingKey::None => {}
        }
        self.pending = PendingKey::None;

        std::mem::swap(&mut self.front, &mut self.shadow);
        self.front.clear();
        self.skip = 0;
    }

    fn set_keys(&mut self, reply: &KeyReply) {
        match reply.cw {
            // an all-zero word never descrambles anything
            Some(cw) if cw == [0u8; 16] => self.key_negative(),
            Some(cw) => {
                if let Some(cas) = &mut self.cas {
                    cas.on_key_reply(true);
                }
                if !self.is_keys {
                    self.is_keys = true;
                    self.pending = PendingKey::None;
                    let (even, odd) = cw.split_at(8);
                    self.csa.set_even_cw(even.try_into().unwrap());
                    self.csa.set_odd_cw(odd.try_into().unwrap());
                    self.current_key = cw;
                    return;
                }
                if cw == self.current_key {
                    // replayed answer, nothing to rotate
                    return;
                }
                if self.current_key[3] == cw[3] && self.current_key[7] == cw[7] {
                    self.pending = PendingKey::Odd;
                    self.current_key[8..].copy_from_slice(&cw[8..]);
                } else if self.current_key[11] == cw[11] && self.current_key[15] == cw[15] {
                    self.pending = PendingKey::Even;
                    self.current_key[..8].copy_from_slice(&cw[..8]);
                } else {
                    warn!("[decrypt {}] both keys changed", self.config.name);
                    self.pending = PendingKey::None;
                    let (even, odd) = cw.split_at(8);
                    self.csa.set_even_cw(even.try_into().unwrap());
                    self.csa.set_odd_cw(odd.try_into().unwrap());
                    self.current_key = cw;
                }
            }
            None => self.key_negative(),
        }
    }

    /// Rejected or unusable word: streaming continues untouched.
    fn key_negative(&mut self) {
        error!("[decrypt {}] CW: key negative", self.config.name);
        if let Some(cas) = &mut self.cas {
            cas.on_key_reply(false);
        }
        self.is_keys = false;
    }
}

/// The pipeline node; build with [`Decrypt::create`].
pub struct Decrypt {
    core: Rc<RefCell<Core>>,
}

impl Decrypt {
    /// Adds a decrypt node to the graph and returns the reactor-side
    /// handle used to route CAM events into it.
    pub fn create(
        graph: &mut Graph,
        config: DecryptConfig,
        csa: Box<dyn Descrambler>,
        cam: Rc<RefCell<dyn Cam>>,
    ) -> DecryptHandle {
        let cluster_bytes = csa.cluster_size().max(1) * TS_PACKET_SIZE;
        let core = Rc::new(RefCell::new(Core {
            config,
            cam,
            cam_ready: false,
            stream: HashMap::new(),
            joined: Vec::new(),
            reload: false,
            custom_pmt: None,
            cas: None,
            csa,
            is_keys: false,
            current_key: [0; 16],
            pending: PendingKey::None,
            cluster_bytes,
            front: Vec::with_capacity(cluster_bytes),
            shadow: Vec::new(),
            skip: 0,
        }));
        let node = graph.add(Box::new(Decrypt { core: core.clone() }));
        DecryptHandle { core, node }
    }
}

impl Node for Decrypt {
    fn name(&self) -> &str {
        "decrypt"
    }

    fn on_ts(&mut self, ctx: &mut Ctx, packet: &[u8]) {
        let mut core = self.core.borrow_mut();

        if core.reload {
            core.reload = false;
            core.restart(ctx);
        }

        if !core.cam_ready {
            ctx.send(packet);
            return;
        }

        let pid = ts::get_pid(packet);
        if let Some(mut psi) = core.stream.remove(&pid) {
            let kind = psi.kind;
            let mut sections: Vec<Vec<u8>> = Vec::new();
            psi.push_ts(packet, |p| sections.push(p.section().to_vec()));

            for _ in &sections {
                match kind {
                    PsiKind::Pat => core.scan_pat(ctx, &mut psi),
                    PsiKind::Cat => core.scan_cat(ctx, &mut psi),
                    PsiKind::Pmt => core.scan_pmt(ctx, &mut psi),
                    _ => {}
                }
            }
            if matches!(kind, PsiKind::Ecm | PsiKind::Emm) {
                for section in &sections {
                    core.scan_em(section);
                }
            }

            core.stream.insert(pid, psi);
            // PAT packets flow through so children can follow the mux
            if kind != PsiKind::Pat {
                return;
            }
            ctx.send(packet);
            return;
        }

        if core.config.fake {
            return;
        }
        if !core.is_keys {
            ctx.send(packet);
            return;
        }
        core.descramble_path(ctx, packet);
    }
}

/// Reactor-side handle: routes key replies and CAM lifecycle into
/// the node.
pub struct DecryptHandle {
    core: Rc<RefCell<Core>>,
    node: NodeId,
}

impl DecryptHandle {
    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// True while the descrambler holds a valid control word pair.
    pub fn has_keys(&self) -> bool {
        self.core.borrow().is_keys
    }

    pub fn set_keys(&self, reply: &KeyReply) {
        self.core.borrow_mut().set_keys(reply);
    }

    /// CAM went up or down; subscriptions follow.
    pub fn cam_status(&self, graph: &mut Graph, ready: bool) {
        let core = self.core.clone();
        graph.with_node(self.node, move |_node, ctx| {
            let mut core = core.borrow_mut();
            core.cam_ready = ready;
            if ready {
                if !core.stream.contains_key(&0) {
                    core.join(ctx, 0, PsiKind::Pat);
                }
            } else {
                core.is_keys = false;
                core.teardown(ctx);
            }
        });
    }

    /// Routes one CAM event; `Key` replies are filtered by the CAS
    /// program number.
    pub fn on_cam_event(&self, graph: &mut Graph, event: &CamEvent) {
        match event {
            CamEvent::Ready => self.cam_status(graph, true),
            CamEvent::Down => self.cam_status(graph, false),
            CamEvent::Key { pnr, reply } => {
                let matches = {
                    let core = self.core.borrow();
                    core.cas.as_ref().map(|cas| cas.pnr() == *pnr).unwrap_or(false)
                };
                if matches {
                    self.set_keys(reply);
                }
            }
        }
    }
}
