//! DVB adapter I/O: frontend tuning, demux PID filters, the DVR pump
//! and the CA device, tied together by [`input::DvbInput`].

pub mod ca;
pub mod dmx;
pub mod fe;

mod dvr;
mod input;

pub use {
    ca::{CaDevice, CamMonitor},
    dmx::DmxDevice,
    dvr::DvrPump,
    fe::{FeDevice, FeStatus, LnbPlan, Polarity, TuneParams, Unicable},
    input::{DvbConfig, DvbInput},
};
