use core::cell::RefCell;
use core::sync::atomic::{AtomicU16, Ordering};

use critical_section::Mutex;

use crate::batch::FRAME_SIZE;
use crate::fifo::RingFifo;

/// Receive queue between the RX interrupt and the main loop.
pub const RX_FIFO_SIZE: usize = 32;

/// The transmit staging buffer holds the largest thing the device ever
/// sends: one sample frame.
const TX_BUFFER_SIZE: usize = FRAME_SIZE;

/// Register level access to the asynchronous serial peripheral, 8-N-1.
/// Implementations are thin wrappers over the memory mapped block; all
/// methods are callable from interrupt context.
pub trait UartHw {
    /// Pull the received byte out of the receive register.
    fn read_rx(&self) -> u8;

    /// Place one byte in the transmit register.
    fn write_tx(&self, byte: u8);

    /// Gate the TX-ready interrupt.
    fn set_tx_interrupt(&self, enabled: bool);
}

struct TxState {
    buffer: [u8; TX_BUFFER_SIZE],
    next: usize,
    len: usize,
}

/// The asynchronous host link.
///
/// Transmit stages the caller's bytes and drains them one per TX-ready
/// interrupt; receive lands one byte per RX interrupt in a ring FIFO that
/// the main loop reads. Single producer and single consumer on each side;
/// a transmit must be [`flush`]ed (or known finished) before the next one.
///
/// [`flush`]: SerialLink::flush
pub struct SerialLink<U: UartHw> {
    hw: U,
    rx: RingFifo<RX_FIFO_SIZE>,
    tx: Mutex<RefCell<TxState>>,
    dropped: AtomicU16,
}

impl<U: UartHw> SerialLink<U> {
    pub const fn new(hw: U) -> Self {
        Self {
            hw,
            rx: RingFifo::new(),
            tx: Mutex::new(RefCell::new(TxState {
                buffer: [0; TX_BUFFER_SIZE],
                next: 0,
                len: 0,
            })),
            dropped: AtomicU16::new(0),
        }
    }

    /// Begin sending `data`. Must not be called while a previous transmit
    /// is still in flight.
    pub fn transmit(&self, data: &[u8]) {
        critical_section::with(|cs| {
            let mut tx = self.tx.borrow_ref_mut(cs);
            debug_assert!(tx.next >= tx.len, "transmit while one is in flight");
            tx.buffer[..data.len()].copy_from_slice(data);
            tx.next = 0;
            tx.len = data.len();
        });
        self.hw.set_tx_interrupt(true);
    }

    /// Spin until the in-flight transmit has fully drained.
    pub fn flush(&self) {
        while !self.transmit_finished() {
            core::hint::spin_loop();
        }
    }

    /// True when no transmit is in flight.
    pub fn transmit_finished(&self) -> bool {
        critical_section::with(|cs| {
            let tx = self.tx.borrow_ref(cs);
            tx.next >= tx.len
        })
    }

    /// Next received byte, if any.
    pub fn read(&self) -> Option<u8> {
        self.rx.read()
    }

    /// Bytes dropped because the receive FIFO was full.
    pub fn dropped_bytes(&self) -> u16 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// RX interrupt: queue the received byte, dropping it when the FIFO is
    /// full. The command layer resynchronizes on the next frame start.
    pub fn on_rx_ready(&self) {
        let byte = self.hw.read_rx();
        if !self.rx.write(byte) {
            let dropped = self.dropped.load(Ordering::Relaxed).saturating_add(1);
            self.dropped.store(dropped, Ordering::Relaxed);
            warn!("rx fifo full, byte dropped");
        }
    }

    /// TX-ready interrupt: feed the next byte or switch the interrupt off.
    pub fn on_tx_ready(&self) {
        critical_section::with(|cs| {
            let mut tx = self.tx.borrow_ref_mut(cs);
            if tx.next < tx.len {
                let byte = tx.buffer[tx.next];
                tx.next += 1;
                self.hw.write_tx(byte);
            } else {
                self.hw.set_tx_interrupt(false);
            }
        });
    }
}
