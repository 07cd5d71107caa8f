use embedded_hal::digital;
use mockall::mock;

#[derive(Debug, Clone, Copy)]
pub struct PinError;

impl digital::Error for PinError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

mock! {
    #[derive(Debug)]
    pub OutputPin {}

    impl digital::ErrorType for OutputPin {
        type Error = PinError;
    }

    impl digital::OutputPin for OutputPin {
        fn set_low(&mut self) -> Result<(), PinError>;
        fn set_high(&mut self) -> Result<(), PinError>;
    }
}

impl MockOutputPin {
    /// A pin that accepts any number of transitions.
    pub fn lenient() -> Self {
        let mut pin = Self::new();
        pin.expect_set_low().returning(|| Ok(()));
        pin.expect_set_high().returning(|| Ok(()));
        pin
    }
}
