//! Per-stream pipeline graph: sources feed 188-byte packets to
//! filters and sinks with per-PID fan-out and reference-counted
//! demand that propagates upstream.
//!
//! One reactor thread owns the whole graph; delivery is synchronous.
//! Structural mutations requested while a delivery is iterating are
//! parked in an edit log and applied when the outermost `send`
//! unwinds.

use {
    crate::{
        error::Error as PipeError,
        ts::{get_pid, MAX_PID},
    },
    log::warn,
    thiserror::Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("node is gone")]
    NoSuchNode,
    #[error("attach would create a cycle")]
    Cycle,
    #[error("edge already exists")]
    DuplicateEdge,
    #[error("nodes are not attached")]
    NotAttached,
}

/// A pipeline component. Hooks run on the reactor thread only.
pub trait Node {
    fn name(&self) -> &str;

    /// One TS packet delivered from an attached parent.
    fn on_ts(&mut self, ctx: &mut Ctx, ts: &[u8]);

    /// This node's own demand for `pid` went 0 -> 1. Sources program
    /// their hardware filter set here.
    fn on_join(&mut self, _ctx: &mut Ctx, _pid: u16) {}

    /// This node's own demand for `pid` went 1 -> 0.
    fn on_leave(&mut self, _ctx: &mut Ctx, _pid: u16) {}

    /// Recoverable failure propagated from upstream (device lost,
    /// CAM reset, key server down).
    fn on_error(&mut self, _ctx: &mut Ctx, _error: &PipeError) {}
}

/// Graph handle passed into node hooks; `id` is the hook owner.
pub struct Ctx<'a> {
    graph: &'a mut Graph,
    pub id: NodeId,
}

impl<'a> Ctx<'a> {
    /// Forwards a packet to this node's children.
    #[inline]
    pub fn send(&mut self, ts: &[u8]) {
        self.graph.send(self.id, ts);
    }

    #[inline]
    pub fn join_pid(&mut self, pid: u16) {
        self.graph.join_pid(self.id, pid);
    }

    #[inline]
    pub fn leave_pid(&mut self, pid: u16) {
        self.graph.leave_pid(self.id, pid);
    }

    #[inline]
    pub fn raise_error(&mut self, error: PipeError) {
        self.graph.raise_error(self.id, error);
    }
}

struct Meta {
    name: String,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    demand: Vec<u16>,
    saturation_reported: bool,
}

struct Slot {
    node: Option<Box<dyn Node>>,
    meta: Meta,
}

enum Edit {
    Attach(NodeId, NodeId),
    Detach(NodeId, NodeId),
    Remove(NodeId),
}

enum Hook {
    Join(NodeId, u16),
    Leave(NodeId, u16),
    Error(NodeId, PipeError),
}

#[derive(Default)]
pub struct Graph {
    slots: Vec<Option<Slot>>,
    depth: usize,
    edits: Vec<Edit>,
    pending_hooks: Vec<Hook>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add(&mut self, node: Box<dyn Node>) -> NodeId {
        let slot = Slot {
            meta: Meta {
                name: node.name().to_owned(),
                parents: Vec::new(),
                children: Vec::new(),
                demand: vec![0u16; MAX_PID as usize],
                saturation_reported: false,
            },
            node: Some(node),
        };
        for (i, entry) in self.slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(slot);
                return NodeId(i);
            }
        }
        self.slots.push(Some(slot));
        NodeId(self.slots.len() - 1)
    }

    fn meta(&self, id: NodeId) -> Option<&Meta> {
        self.slots.get(id.0)?.as_ref().map(|s| &s.meta)
    }

    fn meta_mut(&mut self, id: NodeId) -> Option<&mut Meta> {
        self.slots.get_mut(id.0)?.as_mut().map(|s| &mut s.meta)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.meta(id).map(|m| m.name.as_str())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.meta(id).map(|m| m.children.as_slice()).unwrap_or(&[])
    }

    pub fn demand_count(&self, id: NodeId, pid: u16) -> u16 {
        self.meta(id)
            .map(|m| m.demand[pid as usize])
            .unwrap_or(0)
    }

    /// PIDs this node currently demands, ascending.
    pub fn demanded_pids(&self, id: NodeId) -> Vec<u16> {
        match self.meta(id) {
            Some(m) => m
                .demand
                .iter()
                .enumerate()
                .filter(|(_, &c)| c > 0)
                .map(|(pid, _)| pid as u16)
                .collect(),
            None => Vec::new(),
        }
    }

    /// True when `target` is reachable from `from` over child edges.
    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        if from == target {
            return true;
        }
        let mut stack = vec![from];
        let mut seen = vec![false; self.slots.len()];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if seen[id.0] {
                continue;
            }
            seen[id.0] = true;
            if let Some(meta) = self.meta(id) {
                stack.extend_from_slice(&meta.children);
            }
        }
        false
    }

    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        if self.meta(parent).is_none() || self.meta(child).is_none() {
            return Err(GraphError::NoSuchNode);
        }
        if self.meta(parent).unwrap().children.contains(&child) {
            return Err(GraphError::DuplicateEdge);
        }
        if self.reaches(child, parent) {
            return Err(GraphError::Cycle);
        }
        if self.depth > 0 {
            self.edits.push(Edit::Attach(parent, child));
            return Ok(());
        }
        self.attach_now(parent, child);
        Ok(())
    }

    fn attach_now(&mut self, parent: NodeId, child: NodeId) {
        // either endpoint may be gone by the time a deferred edit runs
        if self.meta(parent).is_none() || self.meta(child).is_none() {
            return;
        }
        self.meta_mut(parent).unwrap().children.push(child);
        self.meta_mut(child).unwrap().parents.push(parent);

        // lift the child's standing demand into the new parent chain
        let demands: Vec<(u16, u16)> = {
            let meta = self.meta(child).unwrap();
            meta.demand
                .iter()
                .enumerate()
                .filter(|(_, &c)| c > 0)
                .map(|(pid, &c)| (pid as u16, c))
                .collect()
        };
        for (pid, count) in demands {
            self.bump(parent, pid, count as i32);
        }
    }

    pub fn detach(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        match self.meta(parent) {
            None => return Err(GraphError::NoSuchNode),
            Some(m) if !m.children.contains(&child) => return Err(GraphError::NotAttached),
            _ => {}
        }
        if self.depth > 0 {
            self.edits.push(Edit::Detach(parent, child));
            return Ok(());
        }
        self.detach_now(parent, child);
        Ok(())
    }

    fn detach_now(&mut self, parent: NodeId, child: NodeId) {
        let demands: Vec<(u16, u16)> = match self.meta(child) {
            Some(meta) => meta
                .demand
                .iter()
                .enumerate()
                .filter(|(_, &c)| c > 0)
                .map(|(pid, &c)| (pid as u16, c))
                .collect(),
            None => Vec::new(),
        };
        for (pid, count) in demands {
            self.bump(parent, pid, -(count as i32));
        }

        if let Some(meta) = self.meta_mut(parent) {
            meta.children.retain(|&c| c != child);
        }
        if let Some(meta) = self.meta_mut(child) {
            meta.parents.retain(|&p| p != parent);
        }
    }

    /// Unsubscribes a node everywhere and drops it. Deferred edits
    /// are flushed first when called outside a delivery.
    pub fn remove(&mut self, id: NodeId) {
        if self.depth > 0 {
            self.edits.push(Edit::Remove(id));
            return;
        }
        self.remove_now(id);
    }

    fn remove_now(&mut self, id: NodeId) {
        let parents = match self.meta(id) {
            Some(m) => m.parents.clone(),
            None => return,
        };
        for parent in parents {
            self.detach_now(parent, id);
        }
        let children = self.meta(id).map(|m| m.children.clone()).unwrap_or_default();
        for child in children {
            self.detach_now(id, child);
        }
        self.slots[id.0] = None;
    }

    /// Raises this node's demand for `pid` by one and propagates the
    /// increment to every ancestor. The `on_join` hook of any node
    /// whose counter crosses 0 -> 1 runs synchronously (or at unwind
    /// if that node is currently mid-delivery).
    pub fn join_pid(&mut self, id: NodeId, pid: u16) {
        self.bump(id, pid, 1);
    }

    /// Idempotent for unsubscribed PIDs.
    pub fn leave_pid(&mut self, id: NodeId, pid: u16) {
        if self.demand_count(id, pid) == 0 {
            return;
        }
        self.bump(id, pid, -1);
    }

    fn bump(&mut self, id: NodeId, pid: u16, delta: i32) {
        if delta == 0 {
            return;
        }
        let (crossed_up, crossed_down) = match self.meta_mut(id) {
            None => return,
            Some(meta) => {
                let slot = &mut meta.demand[pid as usize];
                let old = *slot;
                let new = (old as i32 + delta).max(0);
                if new > u16::MAX as i32 {
                    *slot = u16::MAX;
                    if !meta.saturation_reported {
                        meta.saturation_reported = true;
                        warn!("[{}] pid {} demand counter saturated", meta.name, pid);
                    }
                } else {
                    *slot = new as u16;
                }
                (old == 0 && *slot > 0, old > 0 && *slot == 0)
            }
        };

        if crossed_up {
            self.run_hook(Hook::Join(id, pid));
        }
        if crossed_down {
            self.run_hook(Hook::Leave(id, pid));
        }

        let parents = match self.meta(id) {
            Some(m) => m.parents.clone(),
            None => return,
        };
        for parent in parents {
            self.bump(parent, pid, delta);
        }
    }

    fn run_hook(&mut self, hook: Hook) {
        let id = match &hook {
            Hook::Join(id, _) | Hook::Leave(id, _) | Hook::Error(id, _) => *id,
        };
        let node = match self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            Some(slot) => slot.node.take(),
            None => return,
        };
        let mut node = match node {
            Some(node) => node,
            None => {
                // owner is mid-delivery; run when the send unwinds
                self.pending_hooks.push(hook);
                return;
            }
        };
        let mut ctx = Ctx { graph: self, id };
        match hook {
            Hook::Join(_, pid) => node.on_join(&mut ctx, pid),
            Hook::Leave(_, pid) => node.on_leave(&mut ctx, pid),
            Hook::Error(_, error) => node.on_error(&mut ctx, &error),
        }
        if let Some(slot) = self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            slot.node = Some(node);
        }
    }

    /// Notifies every attached child's error callback.
    pub fn raise_error(&mut self, id: NodeId, error: PipeError) {
        let children = match self.meta(id) {
            Some(m) => m.children.clone(),
            None => return,
        };
        for child in children {
            self.run_hook(Hook::Error(child, error.clone()));
        }
    }

    /// Delivers one packet to every attached child whose demand bit
    /// for the packet's PID is set, in insertion order. Children run
    /// synchronously and may call back into the graph.
    pub fn send(&mut self, from: NodeId, ts: &[u8]) {
        let pid = get_pid(ts);
        let children = match self.meta(from) {
            Some(m) => m.children.clone(),
            None => return,
        };

        self.depth += 1;
        for child in children {
            let wants = self
                .meta(child)
                .map(|m| m.demand[pid as usize] > 0)
                .unwrap_or(false);
            if !wants {
                continue;
            }
            let node = match self.slots.get_mut(child.0).and_then(|s| s.as_mut()) {
                Some(slot) => slot.node.take(),
                None => continue,
            };
            // a cycle would have been rejected at attach; a taken-out
            // child here means a stale edit, skip it
            if let Some(mut node) = node {
                let mut ctx = Ctx {
                    graph: self,
                    id: child,
                };
                node.on_ts(&mut ctx, ts);
                if let Some(slot) = self.slots.get_mut(child.0).and_then(|s| s.as_mut()) {
                    slot.node = Some(node);
                }
            }
        }
        self.depth -= 1;

        if self.depth == 0 {
            self.flush();
        }
    }

    /// Applies parked hooks and structural edits.
    fn flush(&mut self) {
        while !self.pending_hooks.is_empty() || !self.edits.is_empty() {
            let hooks = std::mem::take(&mut self.pending_hooks);
            for hook in hooks {
                self.run_hook(hook);
            }
            let edits = std::mem::take(&mut self.edits);
            for edit in edits {
                match edit {
                    Edit::Attach(p, c) => self.attach_now(p, c),
                    Edit::Detach(p, c) => self.detach_now(p, c),
                    Edit::Remove(id) => self.remove_now(id),
                }
            }
        }
    }

    /// Access a node object directly, outside of delivery.
    pub fn with_node<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut dyn Node, &mut Ctx) -> R,
    ) -> Option<R> {
        let mut node = self.slots.get_mut(id.0).and_then(|s| s.as_mut())?.node.take()?;
        let mut ctx = Ctx { graph: self, id };
        let out = f(node.as_mut(), &mut ctx);
        if let Some(slot) = self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            slot.node = Some(node);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Default)]
    struct Trace {
        packets: Vec<(u16, Vec<u8>)>,
        joins: Vec<u16>,
        leaves: Vec<u16>,
        errors: Vec<String>,
    }

    struct Probe {
        name: String,
        trace: Rc<RefCell<Trace>>,
        forward: bool,
    }

    impl Probe {
        fn boxed(name: &str, trace: Rc<RefCell<Trace>>, forward: bool) -> Box<Self> {
            Box::new(Probe {
                name: name.to_owned(),
                trace,
                forward,
            })
        }
    }

    impl Node for Probe {
        fn name(&self) -> &str {
            &self.name
        }
        fn on_ts(&mut self, ctx: &mut Ctx, ts: &[u8]) {
            self.trace
                .borrow_mut()
                .packets
                .push((crate::ts::get_pid(ts), ts.to_vec()));
            if self.forward {
                ctx.send(ts);
            }
        }
        fn on_join(&mut self, _ctx: &mut Ctx, pid: u16) {
            self.trace.borrow_mut().joins.push(pid);
        }
        fn on_leave(&mut self, _ctx: &mut Ctx, pid: u16) {
            self.trace.borrow_mut().leaves.push(pid);
        }
        fn on_error(&mut self, _ctx: &mut Ctx, error: &PipeError) {
            self.trace.borrow_mut().errors.push(error.to_string());
        }
    }

    fn packet(pid: u16) -> [u8; 188] {
        let mut ts = [0xFFu8; 188];
        ts[0] = 0x47;
        ts[1] = (pid >> 8) as u8;
        ts[2] = pid as u8;
        ts[3] = 0x10;
        ts
    }

    fn subscribe(graph: &mut Graph, id: NodeId, pids: &[u16]) {
        for &pid in pids {
            graph.join_pid(id, pid);
        }
    }

    #[test]
    fn demand_sums_over_children() {
        // demand at a parent is the sum over its children
        let t = Rc::new(RefCell::new(Trace::default()));
        let source_trace = Rc::new(RefCell::new(Trace::default()));
        let mut g = Graph::new();
        let s = g.add(Probe::boxed("s", source_trace.clone(), false));
        let d = g.add(Probe::boxed("d", t.clone(), true));
        let a = g.add(Probe::boxed("a", t.clone(), false));
        let b = g.add(Probe::boxed("b", t.clone(), false));
        g.attach(s, d).unwrap();
        g.attach(d, a).unwrap();
        g.attach(d, b).unwrap();
        subscribe(&mut g, a, &[100]);
        subscribe(&mut g, b, &[100, 200]);

        assert_eq!(g.demand_count(d, 100), 2);
        assert_eq!(g.demand_count(d, 200), 1);
        assert_eq!(g.demand_count(s, 100), 2);

        g.detach(d, a).unwrap();
        assert_eq!(g.demand_count(d, 100), 1);
        assert_eq!(g.demand_count(d, 200), 1);

        source_trace.borrow_mut().leaves.clear();
        g.detach(d, b).unwrap();
        assert_eq!(g.demanded_pids(d), Vec::<u16>::new());
        // S saw leave(100) then leave(200)
        assert_eq!(source_trace.borrow().leaves, vec![100, 200]);
    }

    #[test]
    fn attach_detach_restores_state() {
        // attach then detach restores both endpoints exactly
        let t = Rc::new(RefCell::new(Trace::default()));
        let mut g = Graph::new();
        let a = g.add(Probe::boxed("a", t.clone(), false));
        let b = g.add(Probe::boxed("b", t.clone(), false));
        subscribe(&mut g, b, &[7, 7, 9]);

        let before_a: Vec<u16> = g.demanded_pids(a);
        g.attach(a, b).unwrap();
        assert_eq!(g.demand_count(a, 7), 2);
        g.detach(a, b).unwrap();
        assert_eq!(g.demanded_pids(a), before_a);
        assert_eq!(g.demand_count(b, 7), 2);
        assert_eq!(g.demand_count(b, 9), 1);
    }

    #[test]
    fn delivery_respects_demand_bits() {
        let t = Rc::new(RefCell::new(Trace::default()));
        let mut g = Graph::new();
        let s = g.add(Probe::boxed("s", t.clone(), false));
        let sink = g.add(Probe::boxed("sink", t.clone(), false));
        g.attach(s, sink).unwrap();
        subscribe(&mut g, sink, &[256]);

        g.send(s, &packet(256));
        g.send(s, &packet(257));
        g.send(s, &packet(256));

        let trace = t.borrow();
        assert_eq!(trace.packets.len(), 2);
        assert!(trace.packets.iter().all(|(pid, _)| *pid == 256));
    }

    #[test]
    fn cycle_is_rejected() {
        let t = Rc::new(RefCell::new(Trace::default()));
        let mut g = Graph::new();
        let a = g.add(Probe::boxed("a", t.clone(), true));
        let b = g.add(Probe::boxed("b", t.clone(), true));
        let c = g.add(Probe::boxed("c", t.clone(), true));
        g.attach(a, b).unwrap();
        g.attach(b, c).unwrap();
        assert_eq!(g.attach(c, a), Err(GraphError::Cycle));
        assert_eq!(g.attach(a, a), Err(GraphError::Cycle));
    }

    #[test]
    fn leave_of_unsubscribed_pid_is_idempotent() {
        let t = Rc::new(RefCell::new(Trace::default()));
        let mut g = Graph::new();
        let a = g.add(Probe::boxed("a", t.clone(), false));
        g.leave_pid(a, 42);
        assert_eq!(g.demand_count(a, 42), 0);
    }

    struct Detacher {
        parent: NodeId,
        victim: NodeId,
        done: bool,
    }

    impl Node for Detacher {
        fn name(&self) -> &str {
            "detacher"
        }
        fn on_ts(&mut self, ctx: &mut Ctx, _ts: &[u8]) {
            if !self.done {
                self.done = true;
                ctx.graph.detach(self.parent, self.victim).unwrap();
            }
        }
    }

    #[test]
    fn mutation_during_delivery_is_deferred() {
        let t = Rc::new(RefCell::new(Trace::default()));
        let mut g = Graph::new();
        let s = g.add(Probe::boxed("s", t.clone(), false));
        let sink = g.add(Probe::boxed("sink", t.clone(), false));
        g.attach(s, sink).unwrap();
        subscribe(&mut g, sink, &[100]);

        let det = g.add(Box::new(Detacher {
            parent: s,
            victim: sink,
            done: false,
        }));
        g.attach(s, det).unwrap();
        g.join_pid(det, 100);

        // both children still see this packet; the detach lands after
        g.send(s, &packet(100));
        assert_eq!(t.borrow().packets.len(), 1);
        assert!(!g.children(s).contains(&sink));

        g.send(s, &packet(100));
        assert_eq!(t.borrow().packets.len(), 1);
    }

    #[test]
    fn error_reaches_children() {
        let t = Rc::new(RefCell::new(Trace::default()));
        let mut g = Graph::new();
        let s = g.add(Probe::boxed("s", t.clone(), false));
        let sink = g.add(Probe::boxed("sink", t.clone(), false));
        g.attach(s, sink).unwrap();
        g.raise_error(s, PipeError::Recoverable("device_lost"));
        assert_eq!(t.borrow().errors, vec!["recoverable: device_lost"]);
    }
}
