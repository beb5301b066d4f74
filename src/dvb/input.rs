use {
    super::{
        dmx::DmxDevice,
        dvr::DvrPump,
        fe::{FeDevice, FeStatus, TuneParams},
    },
    crate::{
        error::Error,
        pipeline::{Ctx, Graph, Node, NodeId},
        runtime::{Ring, Worker},
        ts::{MAX_PID, TS_PACKET_SIZE},
    },
    anyhow::Result,
    log::{error, info, warn},
    std::{
        cell::RefCell,
        collections::HashMap,
        os::unix::io::RawFd,
        rc::Rc,
        sync::Arc,
        thread,
        time::Duration,
    },
};

/// Typed configuration for one adapter input.
#[derive(Debug, Clone)]
pub struct DvbConfig {
    pub adapter: u32,
    pub device: u32,
    pub tune: TuneParams,
    /// full-TS mode: one demux filter on PID 8192
    pub budget: bool,
    /// DVR driver buffer in 4096-byte units; 0 keeps the default
    pub buffer_size: u32,
    /// status polls without lock before the tune is re-applied
    pub retune_timeout: u32,
    /// how long the DVR may stay dead before children see device_lost
    pub lost_timeout: Duration,
}

impl Default for DvbConfig {
    fn default() -> Self {
        DvbConfig {
            adapter: 0,
            device: 0,
            tune: TuneParams::default(),
            budget: false,
            buffer_size: 0,
            retune_timeout: 5,
            lost_timeout: Duration::from_secs(30),
        }
    }
}

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Control messages from the frontend worker to the reactor.
const MSG_LOCK: u8 = 1;
const MSG_NOLOCK: u8 = 2;
const MSG_RETUNE: u8 = 3;

struct Shared {
    adapter: u32,
    device: u32,
    budget: bool,
    demux: HashMap<u16, DmxDevice>,
    budget_handle: Option<DmxDevice>,
}

impl Shared {
    fn demux_open(&mut self, pid: u16) {
        if self.budget || pid >= MAX_PID {
            return;
        }
        match DmxDevice::open_pid(self.adapter, self.device, pid) {
            Ok(dmx) => {
                self.demux.insert(pid, dmx);
            }
            Err(e) => {
                error!("[dvb_input {}:{}] {:#}", self.adapter, self.device, e);
            }
        }
    }

    fn demux_close(&mut self, pid: u16) {
        self.demux.remove(&pid);
    }

    /// DMX_STOP + DMX_START on every open handle after a retune.
    fn demux_bounce(&self) {
        let handles = self
            .budget_handle
            .iter()
            .chain(self.demux.values());
        for dmx in handles {
            if let Err(e) = dmx.bounce() {
                warn!("[dvb_input {}:{}] {:#}", self.adapter, self.device, e);
            }
        }
    }

    fn open_handles(&self) -> usize {
        self.demux.len() + self.budget_handle.is_some() as usize
    }
}

/// The pipeline-facing half: owns the hardware PID filter set and
/// follows downstream demand.
pub struct DvbSourceNode {
    name: String,
    shared: Rc<RefCell<Shared>>,
}

impl Node for DvbSourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    // a source has no parents; nothing is ever delivered to it
    fn on_ts(&mut self, _ctx: &mut Ctx, _ts: &[u8]) {}

    fn on_join(&mut self, _ctx: &mut Ctx, pid: u16) {
        self.shared.borrow_mut().demux_open(pid);
    }

    fn on_leave(&mut self, _ctx: &mut Ctx, pid: u16) {
        self.shared.borrow_mut().demux_close(pid);
    }
}

/// Reactor-side driver of one DVB adapter: drains the DVR ring into
/// the pipeline and reacts to frontend worker messages.
pub struct DvbInput {
    node: NodeId,
    shared: Rc<RefCell<Shared>>,
    dvr: DvrPump,
    fe_worker: Worker,
    fe_ring: Arc<Ring>,
    is_lock: bool,
    is_retune: bool,
    lost_raised: bool,
}

impl DvbInput {
    /// Opens the devices, spawns the frontend worker and the DVR
    /// pump, and registers the source node with the graph.
    pub fn start(graph: &mut Graph, config: DvbConfig) -> Result<DvbInput> {
        let fe = FeDevice::open_rw(config.adapter, config.device)?;
        info!(
            "[dvb_input {}:{}] {}",
            config.adapter,
            config.device,
            fe.get_name()
        );

        let mut shared = Shared {
            adapter: config.adapter,
            device: config.device,
            budget: config.budget,
            demux: HashMap::new(),
            budget_handle: None,
        };
        if config.budget {
            shared.budget_handle =
                Some(DmxDevice::open_pid(config.adapter, config.device, MAX_PID)?);
        }
        let shared = Rc::new(RefCell::new(shared));

        let node = graph.add(Box::new(DvbSourceNode {
            name: format!("dvb_input {}:{}", config.adapter, config.device),
            shared: shared.clone(),
        }));

        let dvr = DvrPump::start(
            config.adapter,
            config.device,
            config.buffer_size,
            config.lost_timeout,
        )?;

        let fe_ring = Ring::new(1, 64);
        let worker_ring = fe_ring.clone();
        let tune = config.tune.clone();
        let retune_timeout = config.retune_timeout;
        let fe_worker = Worker::spawn(
            &format!("fe {}:{}", config.adapter, config.device),
            move |ctx| {
                let mut fe_loop = FeLoop {
                    fe,
                    tune,
                    retune_timeout,
                    do_retune: 0,
                    was_lock: false,
                    status: FeStatus::default(),
                };
                fe_loop.tune_now();
                while ctx.is_running() {
                    thread::sleep(STATUS_INTERVAL);
                    for msg in fe_loop.step() {
                        worker_ring.push(&[msg]);
                        ctx.wake();
                    }
                }
            },
        )?;

        Ok(DvbInput {
            node,
            shared,
            dvr,
            fe_worker,
            fe_ring,
            is_lock: false,
            is_retune: false,
            lost_raised: false,
        })
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// (dvr ring wake, frontend worker wake) for reactor registration.
    pub fn wake_fds(&self) -> (RawFd, RawFd) {
        (self.dvr.wake_fd(), self.fe_worker.wake_fd())
    }

    #[inline]
    pub fn has_lock(&self) -> bool {
        self.is_lock
    }

    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.dvr.bytes_read()
    }

    #[inline]
    pub fn non_sync_bytes(&self) -> u64 {
        self.dvr.non_sync_bytes()
    }

    /// Open demux handles, for diagnostics: equals the number of
    /// demanded PIDs in per-PID mode and one in budget mode.
    pub fn demux_handles(&self) -> usize {
        self.shared.borrow().open_handles()
    }

    /// Drains worker messages and queued TS packets into the graph.
    /// Call on wake-fd readiness or on a periodic tick.
    pub fn pump(&mut self, graph: &mut Graph, budget_packets: usize) {
        self.dvr.ack_wake();
        self.fe_worker.ack_wake();

        let mut msg = [0u8; 1];
        while self.fe_ring.pop(&mut msg) {
            match msg[0] {
                MSG_LOCK => {
                    if !self.is_lock {
                        self.is_lock = true;
                        if self.is_retune {
                            self.is_retune = false;
                            self.shared.borrow().demux_bounce();
                        }
                    }
                }
                MSG_NOLOCK => {
                    self.is_lock = false;
                }
                MSG_RETUNE => {
                    if self.is_lock {
                        self.is_lock = false;
                    }
                    self.is_retune = true;
                }
                other => warn!("[dvb_input] unknown fe message {}", other),
            }
        }

        if self.dvr.is_lost() && !self.lost_raised {
            self.lost_raised = true;
            graph.raise_error(self.node, Error::Recoverable("device_lost"));
        }

        let mut ts = [0u8; TS_PACKET_SIZE];
        for _ in 0..budget_packets {
            if !self.dvr.pop(&mut ts) {
                break;
            }
            graph.send(self.node, &ts);
        }
    }

    pub fn stop(&mut self, graph: &mut Graph) {
        self.dvr.stop();
        self.fe_worker.stop();
        graph.remove(self.node);
        let mut shared = self.shared.borrow_mut();
        shared.demux.clear();
        shared.budget_handle = None;
    }
}

/// Frontend state machine run on the worker thread:
/// tune -> wait lock -> poll status; loss of lock arms a countdown
/// that re-applies the tune when it expires.
struct FeLoop {
    fe: FeDevice,
    tune: TuneParams,
    retune_timeout: u32,
    do_retune: u32,
    was_lock: bool,
    status: FeStatus,
}

impl FeLoop {
    fn tune_now(&mut self) {
        self.do_retune = self.retune_timeout + 1;
        if let Err(e) = self.fe.tune(&self.tune) {
            // an ioctl refused mid-tune is an unrecoverable hardware
            // or configuration error
            error!(
                "[dvb_input {}:{}] {:#}",
                self.fe.adapter(),
                self.fe.device(),
                e
            );
            std::process::abort();
        }
    }

    /// One status poll; returns messages for the reactor.
    fn step(&mut self) -> Vec<u8> {
        let mut out = Vec::new();

        if let Err(e) = self.status.read(&self.fe) {
            warn!(
                "[dvb_input {}:{}] status read failed [{:#}]",
                self.fe.adapter(),
                self.fe.device(),
                e
            );
            return out;
        }

        if self.status.has_lock() {
            if !self.was_lock {
                self.was_lock = true;
                info!(
                    "[dvb_input {}:{}] fe has lock. {}",
                    self.fe.adapter(),
                    self.fe.device(),
                    self.status
                );
                out.push(MSG_LOCK);
            }
            self.do_retune = 0;
            return out;
        }

        if self.was_lock {
            self.was_lock = false;
            warn!(
                "[dvb_input {}:{}] fe has lost lock. {}",
                self.fe.adapter(),
                self.fe.device(),
                self.status
            );
            out.push(MSG_NOLOCK);
        }

        match self.do_retune {
            0 => {
                // status loss arms the countdown
                self.do_retune = self.retune_timeout;
            }
            1 => {
                info!(
                    "[dvb_input {}:{}] retune. {}",
                    self.fe.adapter(),
                    self.fe.device(),
                    self.status
                );
                out.push(MSG_RETUNE);
                self.tune_now();
            }
            _ => {
                self.do_retune -= 1;
            }
        }

        out
    }
}
