use core::cell::RefCell;

use ads1292_driver::traits::AfeBus;
use critical_section::Mutex;

/// Largest interrupt-driven transfer: a 9 byte sample with room to spare
/// for register bursts.
pub const TRANSFER_SIZE: usize = 16;

/// Register level access to the synchronous serial master peripheral.
/// All methods are callable from interrupt context.
pub trait SpiHw {
    /// Pull the received byte out of the receive register.
    fn read_rx(&self) -> u8;

    /// Place one byte in the transmit register.
    fn write_tx(&self, byte: u8);

    /// True when the transmit register can take a byte.
    fn tx_ready(&self) -> bool;

    /// True while the peripheral is clocking in either direction.
    fn busy(&self) -> bool;

    /// Gate the TX-ready interrupt.
    fn set_tx_interrupt(&self, enabled: bool);

    /// Gate the RX-ready interrupt.
    fn set_rx_interrupt(&self, enabled: bool);
}

struct XferState {
    tx_buffer: [u8; TRANSFER_SIZE],
    tx_next: usize,
    tx_len: usize,
    rx_buffer: [u8; TRANSFER_SIZE],
    rx_next: usize,
    rx_len: usize,
    /// TX-ready sources from `tx_buffer`; zeros are clocked out otherwise.
    source_tx: bool,
    /// RX-ready stores into `rx_buffer`; bytes are discarded otherwise.
    store_rx: bool,
}

/// The synchronous master bus.
///
/// Two modes that must never interleave: the blocking one byte
/// [`exchange`] used for register programming, and the interrupt-driven
/// block transfers ([`transmit`], [`begin_read`]) used while streaming.
/// Callers order the two by calling [`flush`] before an exchange sequence.
///
/// [`exchange`]: PeriphBus::exchange
/// [`transmit`]: PeriphBus::transmit
/// [`begin_read`]: PeriphBus::begin_read
/// [`flush`]: PeriphBus::flush
pub struct PeriphBus<S: SpiHw> {
    hw: S,
    state: Mutex<RefCell<XferState>>,
}

impl<S: SpiHw> PeriphBus<S> {
    pub const fn new(hw: S) -> Self {
        Self {
            hw,
            state: Mutex::new(RefCell::new(XferState {
                tx_buffer: [0; TRANSFER_SIZE],
                tx_next: 0,
                tx_len: 0,
                rx_buffer: [0; TRANSFER_SIZE],
                rx_next: 0,
                rx_len: 0,
                source_tx: false,
                store_rx: false,
            })),
        }
    }

    /// Blocking one byte exchange. Masks the bus interrupts, waits for the
    /// transmit register, clocks the byte through and returns what came
    /// back.
    pub fn exchange(&self, tx: u8) -> u8 {
        self.hw.set_rx_interrupt(false);
        self.hw.set_tx_interrupt(false);
        while !self.hw.tx_ready() {
            core::hint::spin_loop();
        }
        self.hw.write_tx(tx);
        while self.hw.busy() {
            core::hint::spin_loop();
        }
        self.hw.read_rx()
    }

    /// Begin an interrupt-driven outbound transfer of `data`. Received
    /// bytes are discarded.
    pub fn transmit(&self, data: &[u8]) {
        self.begin(Some(data), data.len());
    }

    /// Begin an interrupt-driven read of `len` bytes. Zero bytes are
    /// clocked out so the transfer advances.
    pub fn begin_read(&self, len: usize) {
        self.begin(None, len);
    }

    fn begin(&self, data: Option<&[u8]>, len: usize) {
        debug_assert!(len <= TRANSFER_SIZE);
        self.hw.set_rx_interrupt(false);
        self.hw.set_tx_interrupt(false);
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if let Some(data) = data {
                state.tx_buffer[..data.len()].copy_from_slice(data);
            }
            state.tx_next = 0;
            state.tx_len = len;
            state.rx_next = 0;
            state.rx_len = len;
            state.source_tx = data.is_some();
            state.store_rx = data.is_none();
        });
        self.hw.set_rx_interrupt(true);
        self.hw.set_tx_interrupt(true);
    }

    /// True when no interrupt-driven transfer is in flight. Both sides of
    /// the exchange have fully clocked once the receive count is met.
    pub fn transfer_finished(&self) -> bool {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            state.rx_next >= state.rx_len
        })
    }

    /// Spin until the in-flight transfer has drained.
    pub fn flush(&self) {
        while !self.transfer_finished() {
            core::hint::spin_loop();
        }
    }

    /// Copy out the bytes landed by the last completed read.
    pub fn copy_received(&self, dest: &mut [u8]) {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            dest.copy_from_slice(&state.rx_buffer[..dest.len()]);
        });
    }

    /// TX-ready interrupt: source the next byte (or a zero) or switch the
    /// interrupt off.
    pub fn on_tx_ready(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.tx_next >= state.tx_len {
                self.hw.set_tx_interrupt(false);
            } else {
                let byte = if state.source_tx {
                    state.tx_buffer[state.tx_next]
                } else {
                    0x00
                };
                state.tx_next += 1;
                self.hw.write_tx(byte);
            }
        });
    }

    /// RX-ready interrupt: store or discard the received byte, or switch
    /// the interrupt off once the expected count has landed.
    pub fn on_rx_ready(&self) {
        let byte = self.hw.read_rx();
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.rx_next >= state.rx_len {
                self.hw.set_rx_interrupt(false);
            } else {
                if state.store_rx {
                    let index = state.rx_next;
                    state.rx_buffer[index] = byte;
                }
                state.rx_next += 1;
            }
        });
    }
}

impl<S: SpiHw> AfeBus for PeriphBus<S> {
    fn exchange(&self, tx: u8) -> u8 {
        PeriphBus::exchange(self, tx)
    }

    fn begin_read(&self, len: usize) {
        PeriphBus::begin_read(self, len)
    }

    fn transfer_finished(&self) -> bool {
        PeriphBus::transfer_finished(self)
    }

    fn copy_received(&self, dest: &mut [u8]) {
        PeriphBus::copy_received(self, dest)
    }

    fn flush(&self) {
        PeriphBus::flush(self)
    }
}
