use crate::get_dtv_properties;

use {
    super::{sys::*, FeDevice},
    anyhow::Result,
    std::fmt,
};

/// Latched frontend status with normalized signal quality numbers.
#[derive(Debug)]
pub struct FeStatus {
    status: fe_status,

    delivery_system: Option<fe_delivery_system>,
    modulation: Option<fe_modulation>,
    signal_decibel: Option<f64>,
    signal_percentage: Option<u8>,
    snr_decibel: Option<f64>,
    snr_percentage: Option<u8>,
    ber: Option<u64>,
    unc: Option<u64>,
}

impl Default for FeStatus {
    fn default() -> FeStatus {
        FeStatus {
            status: fe_status::FE_NONE,
            delivery_system: None,
            modulation: None,
            signal_decibel: None,
            signal_percentage: None,
            snr_decibel: None,
            snr_percentage: None,
            ber: None,
            unc: None,
        }
    }
}

/// `OFF`, `NO-LOCK 0x01 | Signal -38.56dBm (59%)`, or
/// `LOCK dvbs2 | Signal -38.56dBm (59%) | Quality 14.57dB (70%) | BER:0 | UNC:0`
impl fmt::Display for FeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.status == fe_status::FE_NONE {
            return write!(f, "OFF");
        }

        if self.status.contains(fe_status::FE_HAS_LOCK) {
            write!(
                f,
                "LOCK {}",
                self.delivery_system.unwrap_or(SYS_UNDEFINED)
            )?;
        } else {
            write!(f, "NO-LOCK 0x{:02X}", self.status)?;
        }

        if !self.status.contains(fe_status::FE_HAS_SIGNAL) {
            return Ok(());
        }

        write!(
            f,
            " | Signal {:.02}dBm ({}%)",
            self.signal_decibel.unwrap_or(0.0),
            self.signal_percentage.unwrap_or(0)
        )?;

        if !self.status.contains(fe_status::FE_HAS_CARRIER) {
            return Ok(());
        }

        write!(
            f,
            " | Quality {:.02}dB ({}%)",
            self.snr_decibel.unwrap_or(0.0),
            self.snr_percentage.unwrap_or(0)
        )?;

        if !self.status.contains(fe_status::FE_HAS_LOCK) {
            return Ok(());
        }

        match self.ber {
            Some(ber) => write!(f, " | BER:{}", ber)?,
            None => write!(f, " | BER:-")?,
        }
        match self.unc {
            Some(unc) => write!(f, " | UNC:{}", unc),
            None => write!(f, " | UNC:-"),
        }
    }
}

impl FeStatus {
    #[inline]
    pub fn status(&self) -> fe_status {
        self.status
    }

    #[inline]
    pub fn has_lock(&self) -> bool {
        self.status.contains(fe_status::FE_HAS_LOCK)
    }

    #[inline]
    pub fn signal(&self) -> Option<u8> {
        self.signal_percentage
    }

    #[inline]
    pub fn snr(&self) -> Option<u8> {
        self.snr_percentage
    }

    #[inline]
    pub fn ber(&self) -> Option<u64> {
        self.ber
    }

    #[inline]
    pub fn unc(&self) -> Option<u64> {
        self.unc
    }

    fn normalize_signal(&mut self, stats: DtvFrontendStats) {
        self.signal_decibel = stats.decibel().map(|v| v as f64 / 1000.0);
        self.signal_percentage = match (stats.relative(), stats.decibel()) {
            (Some(v), _) => Some(((v as u32) * 100 / 65535) as u8),
            (None, Some(decibel)) if self.status.contains(fe_status::FE_HAS_SIGNAL) => {
                // typical dBm window for a tuner input
                let lo: i64 = -85_000;
                let hi: i64 = -6_000;
                Some(if decibel > hi {
                    100
                } else if decibel < lo {
                    0
                } else {
                    (((lo - decibel) * 100) / (lo - hi)) as u8
                })
            }
            _ => None,
        };
    }

    fn normalize_snr(&mut self, stats: DtvFrontendStats) {
        self.snr_decibel = stats.decibel().map(|v| v as f64 / 1000.0);
        self.snr_percentage = match (stats.relative(), stats.decibel()) {
            (Some(v), _) => Some(((v as u32) * 100 / 65535) as u8),
            (None, Some(decibel)) if self.status.contains(fe_status::FE_HAS_CARRIER) => {
                let full_scale = match self.delivery_system {
                    Some(SYS_DVBS | SYS_DVBS2 | SYS_TURBO) => Some(15_000),
                    Some(
                        SYS_DVBC_ANNEX_A | SYS_DVBC_ANNEX_B | SYS_DVBC_ANNEX_C | SYS_DVBC2,
                    ) => Some(28_000),
                    Some(SYS_DVBT | SYS_DVBT2) => Some(19_000),
                    Some(SYS_ATSC) => Some(match self.modulation {
                        Some(VSB_8 | VSB_16) => 19_000,
                        _ => 28_000,
                    }),
                    _ => None,
                };
                match full_scale {
                    Some(_) if decibel <= 0 => Some(0),
                    Some(hi) if decibel >= hi => Some(100),
                    Some(hi) => Some(((decibel * 100) / hi) as u8),
                    None => None,
                }
            }
            _ => None,
        };
    }

    /// Reads the status word and quality statistics, with fallback to
    /// the DVBv3 counters when DVBv5 stats are unavailable.
    pub fn read(&mut self, fe: &FeDevice) -> Result<()> {
        self.status = fe.read_status()?;

        if self.status == fe_status::FE_NONE {
            return Ok(());
        }

        let (delivery_system, modulation, signal, snr, ber, unc) = get_dtv_properties!(
            fe,
            DTV_DELIVERY_SYSTEM,
            DTV_MODULATION,
            DTV_STAT_SIGNAL_STRENGTH,
            DTV_STAT_CNR,
            DTV_STAT_PRE_ERROR_BIT_COUNT,
            DTV_STAT_ERROR_BLOCK_COUNT
        )?;
        self.delivery_system = Some(delivery_system);
        self.modulation = Some(modulation);
        self.normalize_signal(signal);
        self.normalize_snr(snr);
        self.ber = match ber.counter() {
            Some(v) => Some(v),
            None if self.status.contains(fe_status::FE_HAS_LOCK) => Some(fe.read_ber()?),
            None => None,
        };
        self.unc = match unc.counter() {
            Some(v) => Some(v),
            None if self.status.contains(fe_status::FE_HAS_LOCK) => Some(fe.read_unc()?),
            None => None,
        };

        Ok(())
    }
}
