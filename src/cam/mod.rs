//! Descrambler control path: CAS dispatch, the CAM key-server
//! protocol (newcamd) and the descrambling pipeline node.
//!
//! Flow for one ECM: the decrypt node reassembles the section, the
//! CAS filter decides whether it is worth a round-trip, the CAM
//! queues it to the key server, and the reply lands back in the
//! decrypt node as a control-word pair.

pub mod cas;
pub mod decrypt;
pub mod newcamd;

pub use {
    decrypt::{Decrypt, DecryptConfig, DecryptHandle},
    newcamd::{Newcamd, NewcamdConfig},
};

/// Entitlement messages never exceed this on sane streams.
pub const EM_MAX_SIZE: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmKind {
    Ecm,
    Emm,
}

/// One provider entry from the key server's card data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provider {
    pub ident: [u8; 3],
    pub sa: [u8; 8],
}

/// Identity a CAM exposes to the CAS filters.
#[derive(Debug, Clone)]
pub struct CamInfo {
    pub caid: u16,
    /// subscriber unique address
    pub ua: [u8; 8],
    pub providers: Vec<Provider>,
    pub disable_emm: bool,
    /// operator-supplied provider/ident filter hint
    pub cas_data: [u8; 32],
}

impl Default for CamInfo {
    fn default() -> Self {
        CamInfo {
            caid: 0,
            ua: [0; 8],
            providers: Vec::new(),
            disable_emm: false,
            cas_data: [0; 32],
        }
    }
}

/// Entitlement message queued towards a CAM.
#[derive(Debug, Clone)]
pub struct EmPacket {
    pub kind: EmKind,
    pub pnr: u16,
    pub payload: Vec<u8>,
}

/// Control-word reply for a program. `cw == None` is a reject
/// ("key negative"): the stream keeps flowing untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyReply {
    /// parity byte of the ECM this answers (0x80/0x81)
    pub parity: u8,
    pub cw: Option<[u8; 16]>,
}

/// Reactor-visible CAM lifecycle and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CamEvent {
    /// Card data received; ECMs may flow.
    Ready,
    /// Connection lost; descramblers drop their CAS state.
    Down,
    Key { pnr: u16, reply: KeyReply },
}

/// A control-word source. The crate ships the newcamd client; a
/// hardware CI CAM or a test stub fits the same seam.
pub trait Cam {
    fn info(&self) -> &CamInfo;
    fn is_ready(&self) -> bool;
    /// Queues an entitlement message; replies surface through the
    /// owner's event pump as [`CamEvent::Key`].
    fn queue_em(&mut self, packet: EmPacket);
}
