//! Serial port setup.

use std::time::Duration;

pub use tokio_serial::SerialStream;

use crate::config::SerialLinkConfig;

/// Open the RS485 adapter described by `config`.
pub fn open(config: &SerialLinkConfig) -> tokio_serial::Result<SerialStream> {
    let parity = match config.parity.to_lowercase().as_str() {
        "even" => tokio_serial::Parity::Even,
        "odd" => tokio_serial::Parity::Odd,
        _ => tokio_serial::Parity::None,
    };

    let stop_bits = match config.stop_bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    };

    let data_bits = match config.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    };

    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .parity(parity)
        .stop_bits(stop_bits)
        .data_bits(data_bits)
        .timeout(config.timeout());

    SerialStream::open(&builder)
}

/// Minimum line silence between frames: 3.5 character times.
///
/// A character is 11 bits on the wire (start, 8 data, parity or second
/// stop, stop). Above 19200 baud the gap is fixed at 1.75 ms.
pub fn frame_gap(baud_rate: u32) -> Duration {
    if baud_rate == 0 {
        return Duration::ZERO;
    }
    if baud_rate > 19_200 {
        return Duration::from_micros(1_750);
    }
    let char_time_us = 11_000_000 / baud_rate as u64;
    Duration::from_micros(char_time_us * 35 / 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_gap() {
        // 11 bits at 9600 baud = 1145 us per char.
        assert_eq!(frame_gap(9600), Duration::from_micros(4007));
        assert_eq!(frame_gap(4800), Duration::from_micros(8018));
        assert_eq!(frame_gap(115_200), Duration::from_micros(1750));
    }
}
