use core::cell::RefCell;

use critical_section::Mutex;

/// Conversion sequence order: battery, then the X, Y and Z axes.
pub const NUM_AUX_CHANNELS: usize = 4;

/// Register level access to the on-chip converter. All methods are
/// callable from interrupt context.
pub trait AdcHw {
    /// True while a conversion sequence is in progress.
    fn busy(&self) -> bool;

    /// Trigger one four channel conversion sequence.
    fn start_sequence(&self);

    /// The four results of the completed sequence.
    fn read_sequence(&self) -> [u16; NUM_AUX_CHANNELS];
}

struct AccumulatorPair {
    sums: [[u16; NUM_AUX_CHANNELS]; 2],
    fill: usize,
}

/// Four channel sampler with a double buffered accumulator.
///
/// One conversion sequence runs per front-end sample; the completion
/// interrupt folds the four results into the fill accumulator. [`get`]
/// retires the accumulator once per emitted frame, so each slot holds at
/// most ten 10-bit sums: the 16 bit words cannot overflow.
///
/// [`get`]: AuxAdc::get
pub struct AuxAdc<A: AdcHw> {
    hw: A,
    accumulators: Mutex<RefCell<AccumulatorPair>>,
}

impl<A: AdcHw> AuxAdc<A> {
    pub const fn new(hw: A) -> Self {
        Self {
            hw,
            accumulators: Mutex::new(RefCell::new(AccumulatorPair {
                sums: [[0; NUM_AUX_CHANNELS]; 2],
                fill: 0,
            })),
        }
    }

    /// Start the next conversion sequence, waiting out one still in
    /// flight. Called from the front-end data-ready context.
    pub fn begin(&self) {
        while self.hw.busy() {
            core::hint::spin_loop();
        }
        self.hw.start_sequence();
    }

    /// Conversion complete interrupt: fold the results into the fill
    /// accumulator.
    pub fn on_sequence_complete(&self) {
        let results = self.hw.read_sequence();
        critical_section::with(|cs| {
            let mut accumulators = self.accumulators.borrow_ref_mut(cs);
            let fill = accumulators.fill;
            for (sum, result) in accumulators.sums[fill].iter_mut().zip(results) {
                *sum += result;
            }
        });
    }

    /// Retire the current accumulator: flip the pair, zero the new fill
    /// side and return the retired sums as four little-endian 16 bit
    /// words. The host receives the sums, not an average.
    pub fn get(&self) -> [u8; NUM_AUX_CHANNELS * 2] {
        critical_section::with(|cs| {
            let mut accumulators = self.accumulators.borrow_ref_mut(cs);
            let retired = accumulators.fill;
            accumulators.fill ^= 1;
            let fill = accumulators.fill;
            accumulators.sums[fill] = [0; NUM_AUX_CHANNELS];

            let mut bytes = [0; NUM_AUX_CHANNELS * 2];
            for (chunk, sum) in bytes.chunks_exact_mut(2).zip(accumulators.sums[retired]) {
                chunk.copy_from_slice(&sum.to_le_bytes());
            }
            bytes
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Default)]
    pub(crate) struct FakeAdc {
        pub results: Cell<[u16; NUM_AUX_CHANNELS]>,
        pub sequences: Cell<usize>,
    }

    impl AdcHw for &FakeAdc {
        fn busy(&self) -> bool {
            false
        }

        fn start_sequence(&self) {
            self.sequences.set(self.sequences.get() + 1);
        }

        fn read_sequence(&self) -> [u16; NUM_AUX_CHANNELS] {
            self.results.get()
        }
    }

    #[test]
    fn accumulates_until_retired() {
        // Given
        let adc = FakeAdc::default();
        adc.results.set([1, 2, 3, 4]);
        let aux = AuxAdc::new(&adc);

        // When ten sequences land
        for _ in 0..10 {
            aux.begin();
            aux.on_sequence_complete();
        }

        // Then
        assert_eq!(10, adc.sequences.get());
        assert_eq!([10, 0, 20, 0, 30, 0, 40, 0], aux.get());
    }

    #[test]
    fn retiring_zeroes_the_new_fill_side() {
        // Given
        let adc = FakeAdc::default();
        adc.results.set([5, 5, 5, 5]);
        let aux = AuxAdc::new(&adc);
        aux.on_sequence_complete();
        let _ = aux.get();

        // When one sequence lands after the flip
        aux.on_sequence_complete();

        // Then only the post-flip sums remain
        assert_eq!([5, 0, 5, 0, 5, 0, 5, 0], aux.get());
    }

    #[test]
    fn ten_full_scale_samples_do_not_overflow() {
        // Given a 10 bit converter at full scale
        let adc = FakeAdc::default();
        adc.results.set([0x3FF; NUM_AUX_CHANNELS]);
        let aux = AuxAdc::new(&adc);

        // When
        for _ in 0..10 {
            aux.on_sequence_complete();
        }

        // Then 10 * 1023 = 10_230 fits a 16 bit word
        let bytes = aux.get();
        let sum = u16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(10_230, sum);
    }

    #[test]
    fn sums_are_little_endian() {
        // Given
        let adc = FakeAdc::default();
        adc.results.set([0x0102, 0, 0, 0]);
        let aux = AuxAdc::new(&adc);
        aux.on_sequence_complete();

        // Then
        let bytes = aux.get();
        assert_eq!([0x02, 0x01], [bytes[0], bytes[1]]);
    }
}
