//! Single-program channel filter: rewrites the PAT down to one
//! program, follows that program's PMT to subscribe its elementary
//! PIDs, and lets everything it subscribed flow through.

use {
    crate::{
        pipeline::{Ctx, Graph, Node, NodeId},
        ts::{self, Pat, Pmt, Psi, PsiKind},
    },
    log::{error, info},
};

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub pnr: u16,
}

pub struct Channel {
    config: ChannelConfig,
    pat: Psi,
    custom_pat: Psi,
    pat_version: u8,
    pmt_pid: Option<u16>,
    pmt: Option<Psi>,
    es_pids: Vec<u16>,
}

impl Channel {
    /// Adds the filter to the graph, already subscribed to the PAT.
    pub fn create(graph: &mut Graph, config: ChannelConfig) -> NodeId {
        let node = graph.add(Box::new(Channel {
            config,
            pat: Psi::new(PsiKind::Pat, 0),
            custom_pat: Psi::new(PsiKind::Pat, 0),
            pat_version: 0,
            pmt_pid: None,
            pmt: None,
            es_pids: Vec::new(),
        }));
        graph.join_pid(node, 0);
        node
    }

    fn on_pat(&mut self, ctx: &mut Ctx) {
        let crc = self.pat.stored_crc();
        let first = self.pat.last_crc == 0;
        if crc == self.pat.last_crc {
            // repetition: keep the rewritten PAT flowing
            self.custom_pat.demux(|packet| ctx.send(packet));
            return;
        }
        let pat = match Pat::parse(&self.pat) {
            Ok(pat) => pat,
            Err(e) => {
                error!("[channel {}] PAT: {}", self.config.name, e);
                return;
            }
        };
        self.pat.last_crc = crc;
        if !first {
            info!("[channel {}] PAT changed", self.config.name);
        }

        let pmt_pid = match pat.pmt_pid(self.config.pnr) {
            Some(pid) => pid,
            None => {
                error!(
                    "[channel {}] pnr {} is not announced",
                    self.config.name, self.config.pnr
                );
                return;
            }
        };

        if self.pmt_pid != Some(pmt_pid) {
            if let Some(old) = self.pmt_pid.take() {
                ctx.leave_pid(old);
            }
            self.drop_es(ctx);
            self.pmt_pid = Some(pmt_pid);
            self.pmt = Some(Psi::new(PsiKind::Pmt, pmt_pid));
            ctx.join_pid(pmt_pid);
        }

        let custom = Pat {
            stream_id: pat.stream_id,
            version: self.pat_version,
            current_next: true,
            items: vec![(self.config.pnr, pmt_pid)],
        };
        self.pat_version = (self.pat_version + 1) & 0x1F;
        custom.assemble(&mut self.custom_pat);
        self.custom_pat.demux(|packet| ctx.send(packet));
    }

    fn drop_es(&mut self, ctx: &mut Ctx) {
        for pid in self.es_pids.drain(..) {
            ctx.leave_pid(pid);
        }
    }

    fn on_pmt(&mut self, ctx: &mut Ctx) {
        let psi = self.pmt.as_mut().unwrap();
        let crc = psi.stored_crc();
        if crc == psi.last_crc {
            return;
        }
        let pmt = match Pmt::parse(psi) {
            Ok(pmt) => pmt,
            Err(e) => {
                error!("[channel {}] PMT: {}", self.config.name, e);
                return;
            }
        };
        if pmt.pnr != self.config.pnr {
            return;
        }
        psi.last_crc = crc;

        self.drop_es(ctx);
        let mut wanted: Vec<u16> = pmt.items.iter().map(|item| item.pid).collect();
        if pmt.pcr_pid < ts::NULL_PID && !wanted.contains(&pmt.pcr_pid) {
            wanted.push(pmt.pcr_pid);
        }
        for &pid in &wanted {
            ctx.join_pid(pid);
        }
        self.es_pids = wanted;
    }
}

impl Node for Channel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn on_ts(&mut self, ctx: &mut Ctx, packet: &[u8]) {
        let pid = ts::get_pid(packet);

        if pid == 0 {
            let mut complete = false;
            self.pat.push_ts(packet, |_| complete = true);
            if complete {
                self.on_pat(ctx);
            }
            // the rewritten PAT replaces the original
            return;
        }

        if Some(pid) == self.pmt_pid {
            let mut complete = false;
            if let Some(psi) = &mut self.pmt {
                psi.push_ts(packet, |_| complete = true);
            }
            if complete {
                self.on_pmt(ctx);
            }
            ctx.send(packet);
            return;
        }

        ctx.send(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Graph;
    use std::{cell::RefCell, rc::Rc};

    struct Sink {
        seen: Rc<RefCell<Vec<(u16, Vec<u8>)>>>,
    }

    impl Node for Sink {
        fn name(&self) -> &str {
            "sink"
        }
        fn on_ts(&mut self, _ctx: &mut Ctx, packet: &[u8]) {
            self.seen
                .borrow_mut()
                .push((ts::get_pid(packet), packet.to_vec()));
        }
    }

    fn pat_packets(items: &[(u16, u16)]) -> Vec<Vec<u8>> {
        let pat = Pat {
            stream_id: 1,
            version: 0,
            current_next: true,
            items: items.to_vec(),
        };
        let mut psi = Psi::new(PsiKind::Pat, 0);
        pat.assemble(&mut psi);
        let mut out = Vec::new();
        psi.demux(|p| out.push(p.to_vec()));
        out
    }

    fn pmt_packets(pnr: u16, pid: u16, es: &[u16]) -> Vec<Vec<u8>> {
        let pmt = Pmt {
            pnr,
            version: 0,
            current_next: true,
            pcr_pid: es[0],
            descriptors: vec![],
            items: es
                .iter()
                .map(|&pid| ts::PmtItem {
                    stream_type: 0x02,
                    pid,
                    descriptors: vec![],
                })
                .collect(),
        };
        let mut psi = Psi::new(PsiKind::Pmt, pid);
        pmt.assemble(&mut psi);
        let mut out = Vec::new();
        psi.demux(|p| out.push(p.to_vec()));
        out
    }

    #[test]
    fn selects_one_program_and_rewrites_pat() {
        let mut graph = Graph::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        // a bare source node to originate packets
        struct Source;
        impl Node for Source {
            fn name(&self) -> &str {
                "src"
            }
            fn on_ts(&mut self, _ctx: &mut Ctx, _ts: &[u8]) {}
        }
        let source = graph.add(Box::new(Source));
        let channel = Channel::create(
            &mut graph,
            ChannelConfig {
                name: "ch".into(),
                pnr: 2,
            },
        );
        let sink = graph.add(Box::new(Sink { seen: seen.clone() }));
        graph.attach(source, channel).unwrap();
        graph.attach(channel, sink).unwrap();
        graph.join_pid(sink, 0);
        graph.join_pid(sink, 300);

        // channel demanded the PAT from the source
        assert_eq!(graph.demand_count(source, 0), 2);

        for p in pat_packets(&[(1, 256), (2, 257)]) {
            graph.send(source, &p);
        }
        // channel followed program 2
        assert_eq!(graph.demand_count(source, 257), 1);
        assert_eq!(graph.demand_count(source, 256), 0);

        for p in pmt_packets(2, 257, &[300, 301]) {
            graph.send(source, &p);
        }
        assert!(graph.demand_count(source, 300) >= 1);
        assert_eq!(graph.demand_count(source, 301), 1);

        // the sink got a rewritten single-program PAT
        let seen = seen.borrow();
        let pats: Vec<_> = seen.iter().filter(|(pid, _)| *pid == 0).collect();
        assert_eq!(pats.len(), 1);
        let mut psi = Psi::new(PsiKind::Pat, 0);
        let mut got = None;
        psi.push_ts(&pats[0].1, |p| got = Some(Pat::parse(p).unwrap()));
        let got = got.unwrap();
        assert_eq!(got.items, vec![(2, 257)]);
    }
}
