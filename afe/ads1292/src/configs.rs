use crate::regs::Register;

/// A contiguous block of register values written starting at `first`.
#[derive(Clone, Copy)]
pub struct ConfigPatch<'a> {
    pub first: Register,
    pub values: &'a [u8],
}

/// Power-up configuration: 500 SPS, internal reference, the test signal on
/// channel 1 and channel 2 routed to its input at unity gain, external 2.048 MHz
/// clock divided by 16, RLD reference derived internally.
pub const STARTUP: ConfigPatch<'static> = ConfigPatch {
    first: Register::CONFIG1,
    values: &[
        0x02, // CONFIG1: 500 SPS
        0xA3, // CONFIG2: PDB_REFBUF = 1, test signal enabled
        0x10, // LOFF
        0x05, // CH1SET: route channel 1 to test
        0x10, // CH2SET: route channel 2 to input, gain 1
        0x00, // RLD_SENS
        0x00, // LOFF_SENS
        0x40, // LOFF_STAT: clock divider fCLK/16
        0x02, // RESP1: mandatory bit, RLD REF INT does not work without it
        0x03, // RESP2: RLDREF_INT
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_covers_the_writable_file() {
        assert_eq!(Register::CONFIG1, STARTUP.first);
        assert_eq!(10, STARTUP.values.len());
    }
}
