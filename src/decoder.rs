use crate::network::{TelemetryCar, TelemetryPos};
use thiserror::Error;

const HEADER_LEN: usize = 9;
const CAR_RECORD_LEN: usize = 14;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer too short for header: got {0} bytes, need at least {HEADER_LEN}")]
    HeaderTooShort(usize),
}

/// A decoded binary telemetry frame, shaped identically to the JSON
/// `telemetry` payload so downstream derivation doesn't need to know which
/// wire format produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub timestamp_ms: f64,
    pub cars: Vec<TelemetryCar>,
    /// Number of car records requested by the header but not present in the
    /// buffer. Nonzero means the frame was truncated.
    pub truncated_count: usize,
}

/// Decodes a fixed-layout binary telemetry frame:
///
/// ```text
/// offset  size  field
///  0      8     timestamp   (little-endian f64, ms since epoch)
///  8      1     carCount    (u8)
///  9      N*14  car records, each:
///    0   2   carId       (u16)
///    2   4   lapDistPct  (f32)
///    6   4   speed       (f32)
///   10   2   lap         (u16)
///   12   1   position    (u8)
///   13   1   padding
/// ```
///
/// Truncated buffers decode as many full car records as are present; the
/// caller is responsible for rate-limiting the resulting truncation log.
pub fn decode_telemetry_frame(bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::HeaderTooShort(bytes.len()));
    }

    let timestamp_ms = f64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let car_count = bytes[8] as usize;

    let available_bytes = bytes.len() - HEADER_LEN;
    let decodable_cars = (available_bytes / CAR_RECORD_LEN).min(car_count);
    let truncated_count = car_count.saturating_sub(decodable_cars);

    let mut cars = Vec::with_capacity(decodable_cars);
    for i in 0..decodable_cars {
        let offset = HEADER_LEN + i * CAR_RECORD_LEN;
        let record = &bytes[offset..offset + CAR_RECORD_LEN];

        let car_id = u16::from_le_bytes(record[0..2].try_into().unwrap()) as u32;
        let lap_dist_pct = f32::from_le_bytes(record[2..6].try_into().unwrap());
        let speed = f32::from_le_bytes(record[6..10].try_into().unwrap());
        let lap = u16::from_le_bytes(record[10..12].try_into().unwrap()) as u32;
        let position = record[12] as u32;

        cars.push(TelemetryCar {
            car_id,
            driver_id: None,
            driver_name: None,
            position: Some(position),
            lap: Some(lap),
            pos: TelemetryPos { s: lap_dist_pct },
            speed: Some(speed),
        });
    }

    Ok(DecodedFrame {
        timestamp_ms,
        cars,
        truncated_count,
    })
}
