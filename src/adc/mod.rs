//! Byte-level ADS1115 driver over any `embedded-hal` I2C bus.
//!
//! All register traffic is done by hand: a pointer byte selects the register
//! and 16-bit values travel MSB first. Bus errors are retried with a linear
//! backoff and only surface as [`DeviceError`] once the retry budget is spent.

mod registers;

use std::time::{Duration, Instant};

use embedded_hal::i2c::{Error as _, ErrorKind, ErrorType, I2c, Operation};
use log::{error, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

pub use registers::{
    build_config, config_word, decode_register, encode_register, DataRate, Gain, CONFIG_DR,
    CONFIG_MODE, CONFIG_MUX, CONFIG_OS, CONFIG_PGA, DEFAULT_ADDRESS, OS_BIT, POINTER_CONFIG,
    POINTER_CONVERSION, POINTER_HI_THRESH, POINTER_LO_THRESH,
};

/// Largest positive conversion code; a reading of this value equals full scale.
pub const FULL_SCALE_CODE: f64 = 32767.0;

const CHANNEL_COUNT: u8 = 4;
const MOCK_RAW_RANGE: std::ops::Range<i16> = 8000..26000;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("I2C {op} of register 0x{pointer:02X} failed after {attempts} attempts: {kind:?}")]
    Bus {
        op: &'static str,
        pointer: u8,
        attempts: u32,
        kind: ErrorKind,
    },

    #[error("conversion on channel {channel} not ready after {timeout:?}")]
    ConversionTimeout { channel: u8, timeout: Duration },

    #[error("channel {0} out of range (0-3)")]
    InvalidChannel(u8),
}

/// Bounded retry with linear backoff (`backoff_step * attempt`).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Placeholder bus for drivers that never touch hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBus;

impl ErrorType for NoBus {
    type Error = ErrorKind;
}

impl I2c for NoBus {
    fn transaction(
        &mut self,
        _address: u8,
        _operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        Err(ErrorKind::Other)
    }
}

pub type MockAds1115 = Ads1115<NoBus>;

enum Backend<I2C> {
    Bus(I2C),
    Mock(StdRng),
}

pub struct Ads1115<I2C> {
    backend: Backend<I2C>,
    address: u8,
    gain: Gain,
    data_rate: DataRate,
    retry: RetryPolicy,
    poll_interval: Duration,
    last_value: i16,
}

impl<I2C: I2c> Ads1115<I2C> {
    pub fn new(bus: I2C, address: u8) -> Self {
        info!("ADS1115 attached at address 0x{address:02X}");
        Self::with_backend(Backend::Bus(bus), address)
    }

    /// Driver that fabricates readings without any bus traffic.
    pub fn mock() -> Self {
        info!("ADS1115 running in mock mode");
        Self::with_backend(Backend::Mock(StdRng::from_entropy()), DEFAULT_ADDRESS)
    }

    pub fn mock_seeded(seed: u64) -> Self {
        Self::with_backend(Backend::Mock(StdRng::seed_from_u64(seed)), DEFAULT_ADDRESS)
    }

    fn with_backend(backend: Backend<I2C>, address: u8) -> Self {
        Self {
            backend,
            address,
            gain: Gain::default(),
            data_rate: DataRate::default(),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(1),
            last_value: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.backend, Backend::Mock(_))
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn last_value(&self) -> i16 {
        self.last_value
    }

    /// Config word for this driver's gain and data rate.
    pub fn build_config(&self, channel: u8, continuous: bool) -> u16 {
        config_word(channel, continuous, self.gain, self.data_rate)
    }

    /// Writes `[pointer, msb, lsb]` in a single bus transaction.
    pub fn write_register(&mut self, pointer: u8, value: u16) -> Result<(), DeviceError> {
        let address = self.address;
        let [msb, lsb] = encode_register(value);
        self.retrying("write", pointer, |bus| bus.write(address, &[pointer, msb, lsb]))
    }

    /// Selects `pointer`, then reads two bytes back as a signed value.
    pub fn read_register(&mut self, pointer: u8) -> Result<i16, DeviceError> {
        let address = self.address;
        self.retrying("read", pointer, |bus| {
            let mut buf = [0u8; 2];
            bus.write(address, &[pointer])?;
            bus.read(address, &mut buf)?;
            Ok(decode_register(buf[0], buf[1]))
        })
    }

    fn retrying<T>(
        &mut self,
        op: &'static str,
        pointer: u8,
        mut transfer: impl FnMut(&mut I2C) -> Result<T, I2C::Error>,
    ) -> Result<T, DeviceError>
    where
        T: MockValue,
    {
        let retry = self.retry;
        let bus = match &mut self.backend {
            Backend::Bus(bus) => bus,
            Backend::Mock(rng) => return Ok(T::mock(rng)),
        };

        let attempts = retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match transfer(bus) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    warn!(
                        "I2C {op} of 0x{pointer:02X} failed (attempt {attempt}), retrying: {:?}",
                        err.kind()
                    );
                    std::thread::sleep(retry.backoff(attempt));
                    attempt += 1;
                }
                Err(err) => {
                    error!("I2C {op} of 0x{pointer:02X} failed after {attempts} attempts");
                    return Err(DeviceError::Bus {
                        op,
                        pointer,
                        attempts,
                        kind: err.kind(),
                    });
                }
            }
        }
    }

    /// Starts a single-shot conversion and waits for the OS bit.
    ///
    /// Unlike [`Self::read_raw`], failures propagate.
    pub fn try_read_raw(&mut self, channel: u8, timeout: Duration) -> Result<i16, DeviceError> {
        if channel >= CHANNEL_COUNT {
            return Err(DeviceError::InvalidChannel(channel));
        }

        if let Backend::Mock(rng) = &mut self.backend {
            let value = rng.gen_range(MOCK_RAW_RANGE);
            self.last_value = value;
            return Ok(value);
        }

        let config = self.build_config(channel, false);
        self.write_register(POINTER_CONFIG, config)?;

        let started = Instant::now();
        loop {
            let status = self.read_register(POINTER_CONFIG)? as u16;
            if status & OS_BIT != 0 {
                break;
            }
            if started.elapsed() >= timeout {
                return Err(DeviceError::ConversionTimeout { channel, timeout });
            }
            std::thread::sleep(self.poll_interval);
        }

        let raw = self.read_register(POINTER_CONVERSION)?;
        self.last_value = raw;
        Ok(raw)
    }

    /// Like [`Self::try_read_raw`] but never fails: errors and timeouts yield
    /// the last good conversion so a sampling loop cannot stall.
    pub fn read_raw(&mut self, channel: u8, timeout: Duration) -> i16 {
        match self.try_read_raw(channel, timeout) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("ADC read failed, using last value {}: {err}", self.last_value);
                self.last_value
            }
        }
    }

    pub fn read_voltage(&mut self, channel: u8, full_scale: f64, timeout: Duration) -> f64 {
        raw_to_voltage(self.read_raw(channel, timeout), full_scale)
    }

    /// Probes the chip by reading its config register.
    pub fn is_connected(&mut self) -> bool {
        self.read_register(POINTER_CONFIG).is_ok()
    }

    /// Hands the bus back to the caller; `None` for mock drivers.
    pub fn release(self) -> Option<I2C> {
        match self.backend {
            Backend::Bus(bus) => Some(bus),
            Backend::Mock(_) => None,
        }
    }

    pub fn close(self) {
        if self.release().is_some() {
            info!("ADS1115 I2C bus released");
        }
    }
}

pub fn raw_to_voltage(raw: i16, full_scale: f64) -> f64 {
    f64::from(raw) / FULL_SCALE_CODE * full_scale
}

/// Values a mock driver hands out in place of bus traffic.
trait MockValue {
    fn mock(rng: &mut StdRng) -> Self;
}

impl MockValue for () {
    fn mock(_rng: &mut StdRng) -> Self {}
}

impl MockValue for i16 {
    fn mock(rng: &mut StdRng) -> Self {
        rng.gen::<u16>() as i16
    }
}

/// One ADC input as seen by the force sensor.
pub struct AdcChannel<I2C> {
    adc: Ads1115<I2C>,
    channel: u8,
    full_scale: f64,
    timeout: Duration,
}

impl<I2C: I2c> AdcChannel<I2C> {
    pub fn new(adc: Ads1115<I2C>, channel: u8, timeout: Duration) -> Self {
        let full_scale = adc.gain().full_scale_volts();
        Self {
            adc,
            channel,
            full_scale,
            timeout,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn try_read_voltage(&mut self) -> Result<f64, DeviceError> {
        self.adc
            .try_read_raw(self.channel, self.timeout)
            .map(|raw| raw_to_voltage(raw, self.full_scale))
    }

    pub fn into_inner(self) -> Ads1115<I2C> {
        self.adc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emulates the four-register file of an ADS1115.
    #[derive(Default)]
    struct FakeBus {
        registers: [u16; 4],
        pointer: u8,
        writes: Vec<Vec<u8>>,
        fail_next: u32,
        busy_polls: u32,
        remaining_busy: u32,
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, DEFAULT_ADDRESS);
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(ErrorKind::Bus);
            }

            for operation in operations.iter_mut() {
                match operation {
                    Operation::Write(bytes) => {
                        self.writes.push(bytes.to_vec());
                        self.pointer = bytes[0];
                        if bytes.len() == 3 {
                            let value = u16::from_be_bytes([bytes[1], bytes[2]]);
                            if self.pointer == POINTER_CONFIG && value & OS_BIT != 0 {
                                self.remaining_busy = self.busy_polls;
                            }
                            self.registers[usize::from(self.pointer)] = value;
                        }
                    }
                    Operation::Read(buf) => {
                        let mut value = self.registers[usize::from(self.pointer)];
                        if self.pointer == POINTER_CONFIG {
                            if self.remaining_busy > 0 {
                                self.remaining_busy -= 1;
                                value &= !OS_BIT;
                            } else {
                                value |= OS_BIT;
                            }
                        }
                        buf.copy_from_slice(&encode_register(value));
                    }
                }
            }
            Ok(())
        }
    }

    fn no_backoff() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            backoff_step: Duration::ZERO,
        }
    }

    fn driver(bus: FakeBus) -> Ads1115<FakeBus> {
        Ads1115::new(bus, DEFAULT_ADDRESS).with_retry(no_backoff())
    }

    #[test]
    fn write_register_sends_pointer_then_msb_lsb() {
        let mut adc = driver(FakeBus::default());
        adc.write_register(POINTER_CONFIG, 0xC383).unwrap();

        let bus = adc.release().unwrap();
        assert_eq!(bus.writes, vec![vec![0x01, 0xC3, 0x83]]);
    }

    #[test]
    fn register_round_trip_preserves_bytes_and_sign() {
        let mut adc = driver(FakeBus::default());

        for (value, expected) in [
            (0x0000u16, 0i16),
            (0x1234, 0x1234),
            (0x7FFF, i16::MAX),
            (0x8000, i16::MIN),
            (0xFFFF, -1),
            (0xABCD, 0xABCDu16 as i16),
        ] {
            adc.write_register(POINTER_LO_THRESH, value).unwrap();
            assert_eq!(adc.read_register(POINTER_LO_THRESH).unwrap(), expected);
        }
    }

    #[test]
    fn transient_bus_errors_are_retried() {
        let bus = FakeBus {
            fail_next: 2,
            ..FakeBus::default()
        };
        let mut adc = driver(bus);

        adc.write_register(POINTER_HI_THRESH, 0x0102).unwrap();
        assert_eq!(adc.read_register(POINTER_HI_THRESH).unwrap(), 0x0102);
    }

    #[test]
    fn exhausted_retries_surface_device_error() {
        let bus = FakeBus {
            fail_next: 3,
            ..FakeBus::default()
        };
        let mut adc = driver(bus);

        match adc.read_register(POINTER_CONFIG) {
            Err(DeviceError::Bus {
                op,
                pointer,
                attempts,
                kind,
            }) => {
                assert_eq!(op, "read");
                assert_eq!(pointer, POINTER_CONFIG);
                assert_eq!(attempts, 3);
                assert_eq!(kind, ErrorKind::Bus);
            }
            other => panic!("expected bus error, got {other:?}"),
        }
    }

    #[test]
    fn read_raw_polls_until_conversion_completes() {
        let mut bus = FakeBus {
            busy_polls: 3,
            ..FakeBus::default()
        };
        bus.registers[usize::from(POINTER_CONVERSION)] = 16384;
        let mut adc = driver(bus);

        let raw = adc.try_read_raw(0, Duration::from_secs(1)).unwrap();
        assert_eq!(raw, 16384);
        assert_eq!(adc.last_value(), 16384);

        let bus = adc.release().unwrap();
        let [msb, lsb] = encode_register(build_config(0, false));
        assert_eq!(bus.writes[0], vec![POINTER_CONFIG, msb, lsb]);
        // one pointer write per poll: 3 busy + 1 ready, then the conversion read
        let pointer_writes = bus.writes.iter().filter(|w| w.len() == 1).count();
        assert_eq!(pointer_writes, 5);
    }

    #[test]
    fn timeout_falls_back_to_last_good_value() {
        let mut bus = FakeBus::default();
        bus.registers[usize::from(POINTER_CONVERSION)] = 1200;
        let mut adc = driver(bus);
        assert_eq!(adc.read_raw(0, Duration::from_secs(1)), 1200);

        let mut bus = adc.release().unwrap();
        bus.busy_polls = u32::MAX;
        bus.registers[usize::from(POINTER_CONVERSION)] = 9999;
        let mut adc = driver(bus);
        adc.last_value = 1200;

        let err = adc.try_read_raw(0, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, DeviceError::ConversionTimeout { channel: 0, .. }));
        assert_eq!(adc.read_raw(0, Duration::from_millis(5)), 1200);
    }

    #[test]
    fn read_voltage_scales_against_full_scale() {
        let mut bus = FakeBus::default();
        bus.registers[usize::from(POINTER_CONVERSION)] = 16384;
        let mut adc = driver(bus);

        let volts = adc.read_voltage(0, 4.096, Duration::from_secs(1));
        assert!((volts - 16384.0 / 32767.0 * 4.096).abs() < 1e-9);
        assert!((raw_to_voltage(32767, 4.096) - 4.096).abs() < 1e-9);
        assert!(raw_to_voltage(-1, 4.096) < 0.0);
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let mut adc = driver(FakeBus::default());
        assert!(matches!(
            adc.try_read_raw(4, Duration::from_millis(1)),
            Err(DeviceError::InvalidChannel(4))
        ));
    }

    #[test]
    fn mock_mode_stays_in_device_range_without_bus() {
        let mut adc = MockAds1115::mock_seeded(7);
        assert!(adc.is_mock());
        assert!(adc.is_connected());

        for _ in 0..100 {
            let raw = adc.read_raw(0, Duration::from_millis(1));
            assert!(MOCK_RAW_RANGE.contains(&raw));
        }
        adc.write_register(POINTER_CONFIG, 0xFFFF).unwrap();
        assert!(adc.release().is_none());
    }
}
