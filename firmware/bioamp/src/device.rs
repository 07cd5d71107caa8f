use ads1292_driver::{traits::DrdyIrq, Driver, NUM_CHANNELS};
use embedded_hal::{delay::DelayNs, digital::OutputPin};
use num_traits::FromPrimitive;

use crate::{
    auxadc::{AdcHw, AuxAdc},
    batch::BatchAssembler,
    bus::{PeriphBus, SpiHw},
    command::{
        CommandParser, Marker, ParseEvent, HARDWARE_REPLY, HELLO_REPLY, PING_REPLY,
    },
    link::{SerialLink, UartHw},
};

/// MCU register access for the `0xA1..0xA4` debug commands. Addresses are
/// 16 bit, assembled as `lo | (hi << 8)`.
pub trait McuRegisters {
    fn write(&mut self, address: u16, value: u8);
    fn set_bits(&mut self, address: u16, mask: u8);
    fn clear_bits(&mut self, address: u16, mask: u8);
    fn read(&mut self, address: u16) -> u8;
}

/// Default register access: the commands are parsed but ignored and reads
/// answer zero. Poking arbitrary addresses is a debug privilege that must
/// be compiled in deliberately.
pub struct LockedRegisters;

impl McuRegisters for LockedRegisters {
    fn write(&mut self, _address: u16, _value: u8) {
        warn!("mcu register write ignored");
    }

    fn set_bits(&mut self, _address: u16, _mask: u8) {
        warn!("mcu register set ignored");
    }

    fn clear_bits(&mut self, _address: u16, _mask: u8) {
        warn!("mcu register clear ignored");
    }

    fn read(&mut self, _address: u16) -> u8 {
        warn!("mcu register read ignored");
        0x00
    }
}

/// Raw volatile access to the register file. Host-driven pokes bypass
/// every driver in this crate; debug builds only.
#[cfg(feature = "mcu-reg-backdoor")]
pub struct DirectRegisters;

#[cfg(feature = "mcu-reg-backdoor")]
impl McuRegisters for DirectRegisters {
    fn write(&mut self, address: u16, value: u8) {
        unsafe { core::ptr::write_volatile(address as usize as *mut u8, value) }
    }

    fn set_bits(&mut self, address: u16, mask: u8) {
        let value = self.read(address) | mask;
        self.write(address, value);
    }

    fn clear_bits(&mut self, address: u16, mask: u8) {
        let value = self.read(address) & !mask;
        self.write(address, value);
    }

    fn read(&mut self, address: u16) -> u8 {
        unsafe { core::ptr::read_volatile(address as usize as *const u8) }
    }
}

fn register_address(lo: u8, hi: u8) -> u16 {
    u16::from(lo) | (u16::from(hi) << 8)
}

/// The device core: command processing and batch assembly over the shared
/// transport components.
///
/// The serial link, peripheral bus and aux ADC are interrupt-fed and live
/// behind shared references; everything here runs from the main loop.
pub struct Core<'a, U, S, A, Irq, Rst, Cs, Delay, Regs>
where
    U: UartHw,
    S: SpiHw,
    A: AdcHw,
    Irq: DrdyIrq,
    Rst: OutputPin,
    Cs: OutputPin,
    Delay: DelayNs,
    Regs: McuRegisters,
{
    link: &'a SerialLink<U>,
    aux: &'a AuxAdc<A>,
    afe: Driver<'a, PeriphBus<S>, Irq, Rst, Cs, Delay>,
    batch: BatchAssembler,
    parser: CommandParser,
    mcu_regs: Regs,
}

impl<'a, U, S, A, Irq, Rst, Cs, Delay, Regs> Core<'a, U, S, A, Irq, Rst, Cs, Delay, Regs>
where
    U: UartHw,
    S: SpiHw,
    A: AdcHw,
    Irq: DrdyIrq,
    Rst: OutputPin,
    Cs: OutputPin,
    Delay: DelayNs,
    Regs: McuRegisters,
{
    pub fn new(
        link: &'a SerialLink<U>,
        aux: &'a AuxAdc<A>,
        afe: Driver<'a, PeriphBus<S>, Irq, Rst, Cs, Delay>,
        mcu_regs: Regs,
    ) -> Self {
        Self {
            link,
            aux,
            afe,
            batch: BatchAssembler::new(),
            parser: CommandParser::new(),
            mcu_regs,
        }
    }

    pub fn afe(&mut self) -> &mut Driver<'a, PeriphBus<S>, Irq, Rst, Cs, Delay> {
        &mut self.afe
    }

    /// One main loop pass: drain the command FIFO, then pump the sample
    /// pipeline.
    pub fn service(&mut self) {
        self.process_commands();
        self.process_batch();
    }

    fn process_commands(&mut self) {
        while let Some(byte) = self.link.read() {
            match self.parser.feed(byte) {
                Some(ParseEvent::Dispatch(frame)) => self.dispatch(&frame),
                // The confirmation echo is part of the protocol; the host
                // verifies it before confirming.
                Some(ParseEvent::EchoHeld(frame)) => self.reply(&frame),
                // Loopback of garbage is a debug aid and must not stall the
                // device behind an in-flight transmit.
                Some(ParseEvent::EchoInvalid(frame)) => self.echo(&frame),
                Some(ParseEvent::EchoByte(byte)) => self.echo(&[byte]),
                None => {}
            }
        }
    }

    fn process_batch(&mut self) {
        let aux = self.aux;
        if self.afe.data_received(|| aux.begin()) {
            let sample = self.afe.get_data();
            if self.batch.push_sample(sample) {
                let aux_block = self.aux.get();
                let frame = self.batch.seal(&aux_block);
                // The data-ready cadence leaves the link idle long before
                // the next frame completes.
                self.link.flush();
                self.link.transmit(frame);
            }
        }
    }

    fn dispatch(&mut self, frame: &[u8]) {
        let Some(marker) = frame.get(3).and_then(|&b| Marker::from_u8(b)) else {
            warn!("unknown command marker");
            return;
        };
        // Everything between the marker and the trailer.
        let payload = frame.get(4..frame.len() - 2).unwrap_or(&[]);
        trace!("dispatching command");
        match (marker, payload) {
            (Marker::McuRegisterWrite, &[lo, hi, value]) => {
                self.mcu_regs.write(register_address(lo, hi), value);
            }
            (Marker::McuRegisterSetBits, &[lo, hi, mask]) => {
                self.mcu_regs.set_bits(register_address(lo, hi), mask);
            }
            (Marker::McuRegisterClearBits, &[lo, hi, mask]) => {
                self.mcu_regs.clear_bits(register_address(lo, hi), mask);
            }
            (Marker::McuRegisterRead, &[lo, hi]) => {
                let value = self.mcu_regs.read(register_address(lo, hi));
                self.reply(&[value]);
            }
            (Marker::AfeRegisterWrite, &[address, value]) => {
                self.afe.write_regs(address, &[value]);
            }
            (Marker::AfeRegisterRead, &[address]) => {
                let value = self.afe.read_reg(address);
                self.reply(&[value]);
            }
            (Marker::StartRecording, dividers) if dividers.len() >= NUM_CHANNELS as usize => {
                self.batch.start(&dividers[..NUM_CHANNELS as usize]);
                self.afe.start();
            }
            (Marker::StopRecording, _) => self.afe.stop(),
            (Marker::HelloRequest, _) => self.reply(&HELLO_REPLY),
            (Marker::HardwareRequest, _) => {
                let mut reply = HARDWARE_REPLY;
                reply[HARDWARE_REPLY.len() - 2] = NUM_CHANNELS;
                self.reply(&reply);
            }
            (Marker::Ping, _) => self.reply(&PING_REPLY),
            (Marker::CommandConfirmed, _) => {
                if let Some(held) = self.parser.take_held() {
                    self.dispatch(&held);
                }
            }
            _ => warn!("command payload does not fit its marker"),
        }
    }

    fn reply(&self, data: &[u8]) {
        self.link.flush();
        self.link.transmit(data);
    }

    /// Best-effort debug loopback: dropped when a transmit is in flight.
    fn echo(&self, data: &[u8]) {
        if self.link.transmit_finished() {
            self.link.transmit(data);
        } else {
            warn!("debug echo dropped, transmitter busy");
        }
    }
}
