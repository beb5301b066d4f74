use bitflags::bitflags;
use strum::FromRepr;

pub use {DmxInput::*, DmxOutput::*, DmxTsPes::*};

/// Output of the demux
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum DmxOutput {
    /// Straight to the decoder
    DMX_OUT_DECODER = 0,
    /// Memory buffer read from the demux device itself
    DMX_OUT_TAP = 1,
    /// Multiplexed into the logical DVR device
    DMX_OUT_TS_TAP = 2,
    /// Like DMX_OUT_TS_TAP but read from the demux device
    DMX_OUT_TSDEMUX_TAP = 3,
}

/// Input of the demux
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum DmxInput {
    DMX_IN_FRONTEND = 0,
    DMX_IN_DVR = 1,
}

/// Type of the PES filter
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum DmxTsPes {
    DMX_PES_AUDIO0 = 0,
    DMX_PES_VIDEO0 = 1,
    DMX_PES_TELETEXT0 = 2,
    DMX_PES_SUBTITLE0 = 3,
    DMX_PES_PCR0 = 4,
    /// any other PID
    DMX_PES_OTHER = 20,
}

bitflags! {
    /// Flags for the demux filter
    #[repr(C)]
    pub struct DmxFilterFlags : u32 {
        /// Only deliver sections that passed the CRC check
        const DMX_CHECK_CRC = 1;
        /// Disable the filter after one section
        const DMX_ONESHOT = 2;
        /// Start without waiting for DMX_START
        const DMX_IMMEDIATE_START = 4;
    }
}

/// PID-only filter parameters; no PES header or payload matching.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct DmxPesFilterParams {
    /// PID to filter; 8192 passes the full TS
    pub pid: u16,
    pub input: DmxInput,
    pub output: DmxOutput,
    pub pes_type: DmxTsPes,
    pub flags: DmxFilterFlags,
}
