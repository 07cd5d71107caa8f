#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

mod auxadc;
mod batch;
mod bus;
mod command;
mod device;
mod fifo;
mod link;
mod mainloop;

pub use self::{
    auxadc::{AdcHw, AuxAdc, NUM_AUX_CHANNELS},
    batch::{BatchAssembler, FRAME_SIZE, SAMPLES_PER_FRAME},
    bus::{PeriphBus, SpiHw, TRANSFER_SIZE},
    command::{CommandFrame, CommandParser, Marker, ParseEvent, MAX_COMMAND_LENGTH},
    device::{Core, LockedRegisters, McuRegisters},
    fifo::RingFifo,
    link::{SerialLink, UartHw, RX_FIFO_SIZE},
    mainloop::{run, InterruptGate, Park},
};

#[cfg(feature = "mcu-reg-backdoor")]
pub use self::device::DirectRegisters;
