use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use embedded_hal::{delay::DelayNs, digital::OutputPin};

use crate::{
    configs::ConfigPatch,
    opcode::Opcode,
    regs::{IdReg, LeadOffStatus, Register},
    traits::{AfeBus, DrdyIrq},
    DriverError, PartNumber, SysCommand, SAMPLE_SIZE,
};

/// Chip boot time after the reset line is first released.
const BOOT_DELAY_US: u32 = 30_000;
/// Width of the reset pulse.
const RESET_PULSE_US: u32 = 4;
/// Settle time after the reset pulse before the chip accepts commands.
const RESET_SETTLE_US: u32 = 20;
/// Guard delay after every opcode sequence.
const COMMAND_GUARD_US: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Held in reset, bus peer not selected.
    Reset,
    /// Out of reset, accepting commands, not converting.
    Idle,
    /// Read Data Continuous mode; the chip owns the bus between commands.
    Streaming,
}

/// Interrupt side of the data-ready line.
///
/// The falling-edge handler calls [`raise`]; the driver consumes the flag
/// from the main loop. An edge that arrives while the previous one is still
/// unconsumed is counted instead of dropped silently.
///
/// [`raise`]: DrdyLine::raise
pub struct DrdyLine {
    ready: AtomicBool,
    missed: AtomicU16,
}

impl DrdyLine {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            missed: AtomicU16::new(0),
        }
    }

    /// Falling edge handler: mark a fresh sample available.
    pub fn raise(&self) {
        if self.ready.swap(true, Ordering::AcqRel) {
            let missed = self.missed.load(Ordering::Relaxed).saturating_add(1);
            self.missed.store(missed, Ordering::Relaxed);
            warn!("data ready overrun, missed={}", missed);
        }
    }

    /// Edges that fired before the previous sample was collected.
    pub fn missed_edges(&self) -> u16 {
        self.missed.load(Ordering::Relaxed)
    }

    fn take(&self) -> bool {
        self.ready.swap(false, Ordering::AcqRel)
    }

    fn clear(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

impl Default for DrdyLine {
    fn default() -> Self {
        Self::new()
    }
}

/// The two sample buffers and the selector for the side being filled.
/// The consumer only ever sees the display side, and only after a full
/// sample has landed and the selector has flipped.
struct SampleBufferPair {
    buffers: [[u8; SAMPLE_SIZE]; 2],
    fill: usize,
}

impl SampleBufferPair {
    const fn new() -> Self {
        Self {
            buffers: [[0; SAMPLE_SIZE]; 2],
            fill: 0,
        }
    }

    fn fill_mut(&mut self) -> &mut [u8; SAMPLE_SIZE] {
        &mut self.buffers[self.fill]
    }

    fn display(&self) -> &[u8; SAMPLE_SIZE] {
        &self.buffers[self.fill ^ 1]
    }

    fn swap(&mut self) {
        self.fill ^= 1;
    }
}

pub struct Driver<'a, Bus, Irq, Rst, Cs, Delay>
where
    Bus: AfeBus,
    Irq: DrdyIrq,
    Rst: OutputPin,
    Cs: OutputPin,
    Delay: DelayNs,
{
    bus: &'a Bus,
    drdy: &'a DrdyLine,
    drdy_irq: Irq,
    reset_pin: Rst,
    cs_pin: Cs,
    delay: Delay,
    state: State,
    receiving: bool,
    received: bool,
    samples: SampleBufferPair,
}

impl<'a, Bus, Irq, Rst, Cs, Delay> Driver<'a, Bus, Irq, Rst, Cs, Delay>
where
    Bus: AfeBus,
    Irq: DrdyIrq,
    Rst: OutputPin,
    Cs: OutputPin,
    Delay: DelayNs,
{
    pub fn new(
        bus: &'a Bus,
        drdy: &'a DrdyLine,
        drdy_irq: Irq,
        reset_pin: Rst,
        cs_pin: Cs,
        delay: Delay,
    ) -> Self {
        Self {
            bus,
            drdy,
            drdy_irq,
            reset_pin,
            cs_pin,
            delay,
            state: State::Reset,
            receiving: false,
            received: false,
            samples: SampleBufferPair::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Bring the chip out of reset and select it as the bus peer.
    pub fn init(&mut self) {
        self.cs_pin.set_high().unwrap(); // Deselect while the chip boots.
        self.reset_pin.set_low().unwrap();
        self.reset_pin.set_high().unwrap();
        self.delay.delay_us(BOOT_DELAY_US);
        self.reset_pin.set_low().unwrap(); // Reset pulse.
        self.delay.delay_us(RESET_PULSE_US);
        self.reset_pin.set_high().unwrap();
        self.delay.delay_us(RESET_SETTLE_US);
        self.cs_pin.set_low().unwrap(); // Select as the bus peer.
        self.state = State::Idle;
        debug!("front-end out of reset");
    }

    /// Send a one byte system command.
    pub fn send_command(&mut self, command: SysCommand) {
        self.bus.exchange(Opcode::Sys(command).as_u8());
        self.delay.delay_us(COMMAND_GUARD_US);
    }

    /// Write a run of registers starting at `address`.
    pub fn write_regs(&mut self, address: u8, values: &[u8]) {
        self.bus.exchange(Opcode::WriteRegs(address).as_u8());
        self.bus.exchange(values.len() as u8 - 1);
        for &value in values {
            self.bus.exchange(value);
        }
        self.delay.delay_us(COMMAND_GUARD_US);
    }

    /// Read a single register.
    pub fn read_reg(&mut self, address: u8) -> u8 {
        self.bus.exchange(Opcode::ReadRegs(address).as_u8());
        self.bus.exchange(0x00); // Register count minus one.
        self.bus.exchange(0x00) // Clock the value out.
    }

    /// Write a configuration block.
    pub fn write_config(&mut self, patch: ConfigPatch<'_>) {
        self.write_regs(patch.first as u8, patch.values);
    }

    /// Read the chip part number out of the ID register.
    pub fn read_part_number(&mut self) -> Result<PartNumber, DriverError> {
        let id = IdReg(self.read_reg(Register::ID as u8));
        match (id.rev_id(), id.device_id()) {
            (0b010, 0b10) => Ok(PartNumber::Ads1291),
            (0b010, 0b11) => Ok(PartNumber::Ads1292),
            (0b011, 0b11) => Ok(PartNumber::Ads1292r),
            _ => Err(DriverError::InvalidPartNumber),
        }
    }

    /// Enter Read Data Continuous mode and start conversions.
    ///
    /// The data-ready interrupt stays masked until the command sequence is
    /// on the wire: the chip cannot take commands while it is streaming, so
    /// a stale edge must not start a bus read in the middle of the sequence.
    pub fn start(&mut self) {
        self.drdy_irq.disable();
        self.drdy_irq.clear_pending();
        self.drdy.clear();
        self.receiving = false;
        self.received = false;
        self.bus.flush();
        self.send_command(SysCommand::ENABLE_CONTINUOUS_MODE);
        self.send_command(SysCommand::START);
        self.drdy_irq.enable();
        self.state = State::Streaming;
        debug!("acquisition started");
    }

    /// Leave Read Data Continuous mode and stop conversions.
    ///
    /// Safe to call repeatedly; both commands are idempotent on the chip.
    pub fn stop(&mut self) {
        self.bus.flush();
        self.send_command(SysCommand::DISABLE_CONTINUOUS_MODE);
        self.send_command(SysCommand::STOP);
        self.state = State::Idle;
        debug!("acquisition stopped");
    }

    /// Pump the streaming pipeline. Call from the main loop.
    ///
    /// A pending data-ready edge starts the 9 byte bus read and invokes
    /// `on_read_started` (used to chain the aux conversion); a finished bus
    /// read lands in the fill buffer and flips the pair. Returns true while
    /// an unconsumed sample is exposed on the display side.
    pub fn data_received(&mut self, on_read_started: impl FnOnce()) -> bool {
        if self.drdy.take() {
            self.bus.begin_read(SAMPLE_SIZE);
            on_read_started();
            self.receiving = true;
        }
        if self.receiving && self.bus.transfer_finished() {
            self.bus.copy_received(self.samples.fill_mut());
            self.samples.swap();
            self.receiving = false;
            self.received = true;
        }
        self.received
    }

    /// The channel data of the current sample: 3 bytes per channel, MSB
    /// first, with the status bytes dropped. Consumes the sample.
    pub fn get_data(&mut self) -> &[u8] {
        self.received = false;
        &self.samples.display()[3..]
    }

    /// Lead-off detection bits of the current sample.
    pub fn loff_status(&self) -> LeadOffStatus {
        let display = self.samples.display();
        LeadOffStatus::from_status_bytes(display[0], display[1])
    }

    /// Edges that fired before the previous sample was collected.
    pub fn missed_edges(&self) -> u16 {
        self.drdy.missed_edges()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use embedded_hal_mocks::{delay::MockDelay, digital::MockOutputPin};
    use mockall::{mock, predicate::eq, Sequence};

    use super::*;

    mock! {
        Bus {}

        impl AfeBus for Bus {
            fn exchange(&self, tx: u8) -> u8;
            fn begin_read(&self, len: usize);
            fn transfer_finished(&self) -> bool;
            fn copy_received(&self, dest: &mut [u8]);
            fn flush(&self);
        }
    }

    #[derive(Clone, Default)]
    struct FakeIrq(Rc<RefCell<IrqState>>);

    #[derive(Default)]
    struct IrqState {
        enabled: bool,
        cleared: usize,
    }

    impl DrdyIrq for FakeIrq {
        fn enable(&mut self) {
            self.0.borrow_mut().enabled = true;
        }

        fn disable(&mut self) {
            self.0.borrow_mut().enabled = false;
        }

        fn clear_pending(&mut self) {
            self.0.borrow_mut().cleared += 1;
        }
    }

    fn driver<'a>(
        bus: &'a MockBus,
        drdy: &'a DrdyLine,
        irq: FakeIrq,
    ) -> Driver<'a, MockBus, FakeIrq, MockOutputPin, MockOutputPin, MockDelay> {
        Driver::new(
            bus,
            drdy,
            irq,
            MockOutputPin::lenient(),
            MockOutputPin::lenient(),
            MockDelay::lenient(),
        )
    }

    #[test]
    fn write_regs_sends_opcode_count_and_data() {
        // Given
        let mut bus = MockBus::new();
        let mut seq = Sequence::new();
        for byte in [0x40 | 0x04, 0x01, 0x05, 0x10] {
            bus.expect_exchange()
                .with(eq(byte))
                .times(1)
                .in_sequence(&mut seq)
                .return_const(0u8);
        }
        let drdy = DrdyLine::new();

        // When
        let mut driver = driver(&bus, &drdy, FakeIrq::default());
        driver.write_regs(Register::CH1SET as u8, &[0x05, 0x10]);
    }

    #[test]
    fn read_reg_clocks_the_value_out() {
        // Given
        let mut bus = MockBus::new();
        let mut seq = Sequence::new();
        for (tx, rx) in [(0x20 | 0x02, 0x00), (0x00, 0x00), (0x00, 0xA3)] {
            bus.expect_exchange()
                .with(eq(tx))
                .times(1)
                .in_sequence(&mut seq)
                .return_const(rx);
        }
        let drdy = DrdyLine::new();

        // When
        let mut driver = driver(&bus, &drdy, FakeIrq::default());
        let value = driver.read_reg(Register::CONFIG2 as u8);

        // Then
        assert_eq!(0xA3, value);
    }

    #[test]
    fn can_read_part_number() {
        // Given
        let mut bus = MockBus::new();
        let mut seq = Sequence::new();
        for (tx, rx) in [(0x20, 0x00), (0x00, 0x00), (0x00, 0x53)] {
            bus.expect_exchange()
                .with(eq(tx))
                .times(1)
                .in_sequence(&mut seq)
                .return_const(rx);
        }
        let drdy = DrdyLine::new();

        // When
        let mut driver = driver(&bus, &drdy, FakeIrq::default());

        // Then
        assert_eq!(Ok(PartNumber::Ads1292), driver.read_part_number());
    }

    #[test]
    fn unknown_id_is_an_error() {
        // Given
        let mut bus = MockBus::new();
        bus.expect_exchange().return_const(0xFFu8);
        let drdy = DrdyLine::new();

        // When
        let mut driver = driver(&bus, &drdy, FakeIrq::default());

        // Then
        assert_eq!(
            Err(DriverError::InvalidPartNumber),
            driver.read_part_number()
        );
    }

    #[test]
    fn start_flushes_then_enters_continuous_mode() {
        // Given
        let mut bus = MockBus::new();
        let mut seq = Sequence::new();
        bus.expect_flush().times(1).in_sequence(&mut seq).return_const(());
        bus.expect_exchange()
            .with(eq(0x10))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(0u8);
        bus.expect_exchange()
            .with(eq(0x08))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(0u8);
        let drdy = DrdyLine::new();
        let irq = FakeIrq::default();

        // When
        let mut driver = driver(&bus, &drdy, irq.clone());
        driver.start();

        // Then
        assert_eq!(State::Streaming, driver.state());
        assert!(irq.0.borrow().enabled);
        assert_eq!(1, irq.0.borrow().cleared);
    }

    #[test]
    fn stop_is_idempotent() {
        // Given
        let mut bus = MockBus::new();
        bus.expect_flush().times(2).return_const(());
        bus.expect_exchange().with(eq(0x11)).times(2).return_const(0u8);
        bus.expect_exchange().with(eq(0x0A)).times(2).return_const(0u8);
        let drdy = DrdyLine::new();

        // When
        let mut driver = driver(&bus, &drdy, FakeIrq::default());
        driver.stop();
        driver.stop();

        // Then
        assert_eq!(State::Idle, driver.state());
    }

    #[test]
    fn sample_is_exposed_only_after_the_full_read_lands() {
        // Given
        let mut bus = MockBus::new();
        bus.expect_begin_read().with(eq(SAMPLE_SIZE)).times(1).return_const(());
        bus.expect_transfer_finished().times(1).return_const(false);
        bus.expect_transfer_finished().times(1).return_const(true);
        bus.expect_copy_received().times(1).returning(|dest| {
            dest.copy_from_slice(&[0xC0, 0x80, 0x00, 1, 2, 3, 4, 5, 6]);
        });
        let drdy = DrdyLine::new();

        // When
        let mut driver = driver(&bus, &drdy, FakeIrq::default());
        drdy.raise();
        let mut chained = false;

        // Then
        assert!(!driver.data_received(|| chained = true));
        assert!(chained);
        assert!(driver.data_received(|| unreachable!()));
        assert_eq!(&[1, 2, 3, 4, 5, 6], driver.get_data());
        assert!(!driver.data_received(|| unreachable!()));
    }

    #[test]
    fn loff_status_packs_the_status_bytes() {
        // Given
        let mut bus = MockBus::new();
        bus.expect_begin_read().return_const(());
        bus.expect_transfer_finished().return_const(true);
        bus.expect_copy_received().returning(|dest| {
            dest.copy_from_slice(&[0b1100_0101, 0b1000_0000, 0x00, 0, 0, 0, 0, 0, 0]);
        });
        let drdy = DrdyLine::new();

        // When
        let mut driver = driver(&bus, &drdy, FakeIrq::default());
        drdy.raise();
        assert!(driver.data_received(|| ()));

        // Then
        assert_eq!(0b1011, driver.loff_status().0);
    }

    #[test]
    fn uncollected_edges_are_counted() {
        // Given
        let drdy = DrdyLine::new();

        // When
        drdy.raise();
        drdy.raise();
        drdy.raise();

        // Then
        assert_eq!(2, drdy.missed_edges());
    }
}
