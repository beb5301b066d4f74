#[macro_use]
extern crate anyhow;

pub mod error;

pub mod runtime;
pub mod ts;
pub mod pipeline;
pub mod dvb;
pub mod ci;
pub mod csa;
pub mod cam;
pub mod channel;
pub mod file;

pub use {
    error::{Error, Result},
    pipeline::{Graph, NodeId},
    ts::TS_PACKET_SIZE,
};
