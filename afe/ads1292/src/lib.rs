#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

pub mod configs;
mod driver;
mod error;
mod opcode;
pub mod regs;
pub mod traits;

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PartNumber {
    Ads1291,
    Ads1292,
    Ads1292r,
}

/// Biosignal channels converted by the front-end.
pub const NUM_CHANNELS: u8 = 2;

/// One conversion as it arrives on the bus: 3 status bytes followed by
/// 3 bytes per channel, MSB first.
pub const SAMPLE_SIZE: usize = 9;

/// The channel data portion of a sample, once the status bytes are dropped.
pub const DATA_SIZE: usize = SAMPLE_SIZE - 3;

pub use self::{
    driver::{DrdyLine, Driver, State},
    error::DriverError,
    opcode::{Opcode, SysCommand},
    regs::Register,
};
