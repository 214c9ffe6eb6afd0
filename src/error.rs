use thiserror::Error;

/// Rejected settings. Raised while building the pipeline, never per frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("FFT size {0} is not a power of two")]
    FftSizeNotPowerOfTwo(usize),
    #[error("FFT size {size} is below the minimum of {min}")]
    FftSizeTooSmall { size: usize, min: usize },
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("dB floor {floor} must be below dB ceiling {ceiling}")]
    DbRange { floor: f32, ceiling: f32 },
    #[error("{name}: {min} Hz .. {max} Hz is not a valid frequency range")]
    FrequencyRange { name: &'static str, min: f32, max: f32 },
    #[error("gamma must be a positive number, got {0}")]
    Gamma(f32),
    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: f32 },
    #[error("max payload {0} must be an even byte count no larger than {max}", max = MAX_WIRE_PAYLOAD)]
    PayloadLimit(usize),
}

/// Largest even payload the 16-bit length field can describe.
pub const MAX_WIRE_PAYLOAD: usize = u16::MAX as usize - 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("payload of {0} bytes does not fit the 16-bit length field")]
    PayloadTooLarge(usize),
}
