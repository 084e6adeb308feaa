//! Common Types for the LTE Receiver
//!
//! Defines fundamental types used throughout the receive chain.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Physical cell identity (0-503)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub u16);

impl CellId {
    /// Maximum valid cell ID
    pub const MAX: u16 = 503;

    /// Create a new cell ID with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Build from the SSS group identity and the PSS sequence identity
    pub fn from_parts(nid1: u16, nid2: u8) -> Option<Self> {
        if nid1 < 168 && nid2 < 3 {
            Some(Self(3 * nid1 + nid2 as u16))
        } else {
            None
        }
    }

    /// Cell identity group N_ID_1 (0-167), carried by the SSS
    pub fn nid1(&self) -> u16 {
        self.0 / 3
    }

    /// Sequence identity N_ID_2 (0-2), carried by the PSS
    pub fn nid2(&self) -> u8 {
        (self.0 % 3) as u8
    }
}

/// Downlink bandwidth in resource blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum Rbs {
    /// 1.4 MHz
    Rb6 = 6,
    /// 3 MHz
    Rb15 = 15,
    /// 5 MHz
    Rb25 = 25,
    /// 10 MHz
    Rb50 = 50,
    /// 15 MHz
    Rb75 = 75,
    /// 20 MHz
    Rb100 = 100,
}

/// Sample-rate family supported by a device's master clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateRadix {
    /// Powers of two times 1.92 MHz with a 3/4 intermediate (USRP B/X series)
    Radix3,
    /// Pure powers of two times 1.92 MHz (USRP N3xx series)
    Radix2,
}

impl Rbs {
    /// Parse a resource block count
    pub fn from_count(rbs: u32) -> Option<Self> {
        <Self as FromPrimitive>::from_u32(rbs)
    }

    /// Resource block count
    pub fn count(&self) -> u32 {
        *self as u32
    }

    /// Samples per 1 ms subframe at the canonical LTE rate
    pub fn subframe_len(&self) -> usize {
        self.fft_len() * 15
    }

    /// Samples per 0.5 ms slot at the canonical LTE rate
    pub fn slot_len(&self) -> usize {
        self.subframe_len() / 2
    }

    /// FFT size at the canonical rate
    pub fn fft_len(&self) -> usize {
        match self {
            Rbs::Rb6 => 128,
            Rbs::Rb15 => 256,
            Rbs::Rb25 => 384,
            Rbs::Rb50 => 768,
            Rbs::Rb75 => 1024,
            Rbs::Rb100 => 1536,
        }
    }

    /// Cyclic prefix length of the first symbol in a slot
    pub fn cp0_len(&self) -> usize {
        10 * self.fft_len() / 128
    }

    /// Cyclic prefix length of the remaining six symbols
    pub fn cp_len(&self) -> usize {
        9 * self.fft_len() / 128
    }

    /// Occupied subcarriers (12 per resource block)
    pub fn subcarriers(&self) -> usize {
        12 * self.count() as usize
    }

    /// Canonical LTE sample rate in Hz
    pub fn lte_rate(&self) -> f64 {
        self.fft_len() as f64 * 15e3
    }

    /// Device sample rate in Hz for the given radix family
    pub fn sample_rate(&self, radix: RateRadix) -> f64 {
        match radix {
            RateRadix::Radix3 => match self {
                Rbs::Rb6 => 1.92e6,
                Rbs::Rb15 => 3.84e6,
                Rbs::Rb25 => 5.76e6,
                Rbs::Rb50 => 11.52e6,
                Rbs::Rb75 => 15.36e6,
                Rbs::Rb100 => 23.04e6,
            },
            RateRadix::Radix2 => match self {
                Rbs::Rb6 => 1.92e6,
                Rbs::Rb15 => 3.84e6,
                Rbs::Rb25 => 7.68e6,
                Rbs::Rb50 => 15.36e6,
                Rbs::Rb75 => 15.36e6,
                Rbs::Rb100 => 30.72e6,
            },
        }
    }

    /// Coprime `(P, Q)` with `lte_rate == device_rate * P / Q`
    pub fn rate_ratio(&self, radix: RateRadix) -> (usize, usize) {
        match (radix, self) {
            (RateRadix::Radix2, Rbs::Rb25)
            | (RateRadix::Radix2, Rbs::Rb50)
            | (RateRadix::Radix2, Rbs::Rb100) => (3, 4),
            _ => (1, 1),
        }
    }
}

/// PHICH group scaling factor Ng from the MIB
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum PhichNg {
    /// Ng = 1/6
    OneSixth = 0,
    /// Ng = 1/2
    Half = 1,
    /// Ng = 1
    One = 2,
    /// Ng = 2
    Two = 3,
}

impl PhichNg {
    /// Decode the two MIB bits
    pub fn from_bits(bits: u8) -> Option<Self> {
        <Self as FromPrimitive>::from_u8(bits)
    }
}

/// Frame-level receiver time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LteTime {
    /// System frame number (0-1023)
    pub frame: u32,
    /// Subframe number within the frame (0-9)
    pub subframe: u32,
}

impl LteTime {
    /// Advance by one subframe, wrapping the frame counter at 1024
    pub fn advance(&mut self) {
        self.subframe = (self.subframe + 1) % 10;
        if self.subframe == 0 {
            self.frame = (self.frame + 1) % 1024;
        }
    }
}

/// Device clock reference source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockRef {
    /// Internal oscillator
    Internal,
    /// External 10 MHz reference
    External,
    /// GPS-disciplined oscillator
    Gps,
}
