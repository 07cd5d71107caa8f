use heapless::Vec;
use num_derive::FromPrimitive;

pub const FRAME_START: u8 = 0xAA;
pub const FRAME_STOP: u8 = 0x55;
pub const COMMAND_START: u8 = 0x5A;
/// Trailer of a command that must be echoed and confirmed before dispatch.
pub const COMMAND_NEED_CONFIRM: u8 = 0xCC;

pub const MAX_COMMAND_LENGTH: usize = 16;
const MIN_FRAME_LENGTH: usize = 5;

/// Device-to-host messages use this in place of [`COMMAND_START`].
pub const MESSAGE_START: u8 = 0xA5;

pub const HELLO_REPLY: [u8; 5] = [FRAME_START, MESSAGE_START, 0x05, 0xA0, FRAME_STOP];
/// The next to last byte is patched with the channel count before sending.
pub const HARDWARE_REPLY: [u8; 6] = [FRAME_START, MESSAGE_START, 0x06, 0xA4, 0x02, FRAME_STOP];
pub const PING_REPLY: [u8; 5] = [FRAME_START, MESSAGE_START, 0x05, 0xAD, FRAME_STOP];

/// Command markers dispatched on byte 3 of a frame.
#[derive(Clone, Copy, Debug, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Marker {
    /// `[addr_lo, addr_hi, value]`: write an MCU register.
    McuRegisterWrite = 0xA1,
    /// `[addr_lo, addr_hi, mask]`: set bits in an MCU register.
    McuRegisterSetBits = 0xA2,
    /// `[addr_lo, addr_hi, mask]`: clear bits in an MCU register.
    McuRegisterClearBits = 0xA3,
    /// `[addr_lo, addr_hi]`: read an MCU register, one byte replied.
    McuRegisterRead = 0xA4,
    /// `[addr, value]`: write a front-end register.
    AfeRegisterWrite = 0xA6,
    /// `[addr]`: read a front-end register, one byte replied.
    AfeRegisterRead = 0xA7,
    /// One divider byte per channel: start acquisition.
    StartRecording = 0xA8,
    /// Stop acquisition.
    StopRecording = 0xA9,
    /// Identity request.
    HelloRequest = 0xAB,
    /// Hardware description request.
    HardwareRequest = 0xAC,
    /// Liveness probe, answered with an empty ack.
    Ping = 0xAD,
    /// Dispatch the held confirmation-requiring command.
    CommandConfirmed = 0xAE,
}

/// A complete command frame, start and stop markers included.
pub type CommandFrame = Vec<u8, MAX_COMMAND_LENGTH>;

/// What the parser wants done after consuming a byte. All echo variants
/// are debug aids for the host; none of them dispatch.
#[derive(Debug, PartialEq)]
pub enum ParseEvent {
    /// A complete immediate frame, ready for dispatch.
    Dispatch(CommandFrame),
    /// A confirmation-requiring frame was parked in the holding slot; echo
    /// it back so the host can verify and confirm.
    EchoHeld(CommandFrame),
    /// A stray byte arrived outside a frame; loop it back.
    EchoByte(u8),
    /// A malformed frame; echo what was collected.
    EchoInvalid(CommandFrame),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ParseState {
    ExpectStart,
    ExpectCommandStart,
    ExpectLength,
    ExpectBody,
    ExpectStop,
}

/// Byte-at-a-time parser for host command frames:
///
/// `FRAME_START | COMMAND_START | length | marker | payload.. | trailer | FRAME_STOP`
///
/// `length` counts the whole frame. A `FRAME_STOP` trailer dispatches
/// immediately; a [`COMMAND_NEED_CONFIRM`] trailer parks the frame in the
/// holding slot until a confirm command releases it. Only the most
/// recently parked frame is kept. Any unexpected byte resets the parser,
/// which resynchronizes on the next frame start.
pub struct CommandParser {
    state: ParseState,
    buffers: [[u8; MAX_COMMAND_LENGTH]; 2],
    fill: usize,
    fill_index: usize,
    length: usize,
    held_len: usize,
    buffered: bool,
}

impl CommandParser {
    pub const fn new() -> Self {
        Self {
            state: ParseState::ExpectStart,
            buffers: [[0; MAX_COMMAND_LENGTH]; 2],
            fill: 0,
            fill_index: 0,
            length: 0,
            held_len: 0,
            buffered: false,
        }
    }

    /// Consume one received byte.
    pub fn feed(&mut self, byte: u8) -> Option<ParseEvent> {
        match self.state {
            ParseState::ExpectStart => {
                if byte == FRAME_START {
                    self.store(byte);
                    self.state = ParseState::ExpectCommandStart;
                    None
                } else {
                    warn!("stray byte outside a command frame");
                    Some(ParseEvent::EchoByte(byte))
                }
            }
            ParseState::ExpectCommandStart => {
                if byte == COMMAND_START {
                    self.store(byte);
                    self.state = ParseState::ExpectLength;
                    None
                } else {
                    self.broken(byte)
                }
            }
            ParseState::ExpectLength => {
                // A frame is at least start, command start, length, trailer
                // and stop.
                if (MIN_FRAME_LENGTH..MAX_COMMAND_LENGTH).contains(&(byte as usize)) {
                    self.store(byte);
                    self.length = byte as usize;
                    self.state = ParseState::ExpectBody;
                    None
                } else {
                    self.broken(byte)
                }
            }
            ParseState::ExpectBody => {
                self.store(byte);
                if self.fill_index >= self.length - 1 {
                    self.state = ParseState::ExpectStop;
                }
                None
            }
            ParseState::ExpectStop => {
                if byte == FRAME_STOP {
                    self.store(byte);
                    self.terminal()
                } else {
                    self.broken(byte)
                }
            }
        }
    }

    /// Take the held frame, if a confirmation-requiring command is parked.
    pub fn take_held(&mut self) -> Option<CommandFrame> {
        if !self.buffered {
            return None;
        }
        self.buffered = false;
        let held = &self.buffers[self.fill ^ 1][..self.held_len];
        Some(Vec::from_slice(held).unwrap_or_default())
    }

    fn store(&mut self, byte: u8) {
        self.buffers[self.fill][self.fill_index] = byte;
        self.fill_index += 1;
    }

    /// The stop byte landed; inspect the trailer and finish the frame.
    fn terminal(&mut self) -> Option<ParseEvent> {
        let frame = &self.buffers[self.fill][..self.length];
        let trailer = frame[self.length - 2];
        let snapshot = Vec::from_slice(frame).unwrap_or_default();
        self.reset();
        match trailer {
            FRAME_STOP => Some(ParseEvent::Dispatch(snapshot)),
            COMMAND_NEED_CONFIRM => {
                // Park the frame in the other buffer and hand a copy back
                // for the confirmation echo.
                self.fill ^= 1;
                self.held_len = snapshot.len();
                self.buffered = true;
                Some(ParseEvent::EchoHeld(snapshot))
            }
            _ => {
                warn!("bad command trailer");
                Some(ParseEvent::EchoInvalid(snapshot))
            }
        }
    }

    /// An unexpected byte mid-frame: echo the collected prefix including
    /// the offending byte, then resynchronize.
    fn broken(&mut self, byte: u8) -> Option<ParseEvent> {
        warn!("malformed command frame");
        self.store(byte);
        let collected = Vec::from_slice(&self.buffers[self.fill][..self.fill_index])
            .unwrap_or_default();
        self.reset();
        Some(ParseEvent::EchoInvalid(collected))
    }

    fn reset(&mut self) {
        self.state = ParseState::ExpectStart;
        self.fill_index = 0;
        self.length = 0;
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}
