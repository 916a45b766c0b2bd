//! Conversions between points in time and version 1 (time-based) UUIDs.
//!
//! Useful with column families whose comparator is `TimeUUIDType`: a slice of
//! columns between two instants is requested with
//! [`UuidBound::Lowest`] for the start and [`UuidBound::Highest`] for the finish,
//! so that every UUID generated within the range sorts between the bounds.
//!
//! ```
//! use cassa::time_uuid::{convert_time_to_uuid, convert_uuid_to_time, UuidBound};
//! use chrono::{TimeZone, Utc};
//!
//! let at = Utc.with_ymd_and_hms(2011, 3, 1, 12, 0, 0).unwrap();
//! let start = convert_time_to_uuid(at, UuidBound::Lowest).unwrap();
//! assert_eq!(convert_uuid_to_time(&start), Some(at.timestamp() as f64));
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// 100-ns intervals between the UUID epoch (1582-10-15) and the Unix epoch.
const UUID_EPOCH_OFFSET: i128 = 0x01b2_1dd2_1381_4000;

/// Largest value of the 60-bit UUID timestamp.
const MAX_UUID_TIMESTAMP: i128 = (1 << 60) - 1;

/// RFC 4122 variant bits, set in the high byte of the clock sequence.
const VARIANT_RFC4122: u8 = 0x80;

/// Which UUID, among those sharing a timestamp, to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidBound {
    /// Clock sequence and node all zeros: sorts before any UUID of the same instant.
    Lowest,
    /// Clock sequence and node all ones: sorts after any UUID of the same instant.
    Highest,
    /// Random clock sequence and node.
    Random,
}

/// The instant cannot be represented in a version 1 UUID.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("Time {seconds}s since the Unix epoch is outside of the range of a time UUID")]
pub struct TimeOutOfRange {
    /// The rejected time, in seconds since the Unix epoch.
    pub seconds: f64,
}

/// Builds a version 1 UUID carrying `time`.
pub fn convert_time_to_uuid(time: DateTime<Utc>, bound: UuidBound) -> Result<Uuid, TimeOutOfRange> {
    let nanos = i128::from(time.timestamp()) * 1_000_000_000 + i128::from(time.timestamp_subsec_nanos());
    from_unix_nanos(nanos, bound).ok_or(TimeOutOfRange {
        seconds: nanos as f64 / 1e9,
    })
}

/// Like [`convert_time_to_uuid`], with the time given in (fractional) seconds
/// since the Unix epoch.
pub fn convert_timestamp_to_uuid(seconds: f64, bound: UuidBound) -> Result<Uuid, TimeOutOfRange> {
    let out_of_range = TimeOutOfRange { seconds };
    if !seconds.is_finite() {
        return Err(out_of_range);
    }
    let nanos = (seconds * 1e9) as i128;
    from_unix_nanos(nanos, bound).ok_or(out_of_range)
}

fn from_unix_nanos(nanos: i128, bound: UuidBound) -> Option<Uuid> {
    let timestamp = nanos.div_euclid(100) + UUID_EPOCH_OFFSET;
    if !(0..=MAX_UUID_TIMESTAMP).contains(&timestamp) {
        return None;
    }
    let timestamp = timestamp as u64;
    let time_low = (timestamp & 0xffff_ffff) as u32;
    let time_mid = ((timestamp >> 32) & 0xffff) as u16;
    let time_hi_and_version = ((timestamp >> 48) & 0x0fff) as u16 | 0x1000;

    let (clock_seq_hi, clock_seq_low, node): (u8, u8, u64) = match bound {
        UuidBound::Lowest => (0, 0, 0),
        UuidBound::Highest => (0x3f, 0xff, 0xffff_ffff_ffff),
        UuidBound::Random => {
            let bits: u64 = rand::random();
            ((bits & 0x3f) as u8, (bits >> 8) as u8, bits >> 16)
        }
    };
    let node = node.to_be_bytes();
    let tail = [
        clock_seq_hi | VARIANT_RFC4122,
        clock_seq_low,
        node[2],
        node[3],
        node[4],
        node[5],
        node[6],
        node[7],
    ];
    Some(Uuid::from_fields(time_low, time_mid, time_hi_and_version, &tail))
}

/// Seconds since the Unix epoch carried by a version 1 UUID, with 100 ns precision.
///
/// Returns `None` for any other UUID version.
pub fn convert_uuid_to_time(uuid: &Uuid) -> Option<f64> {
    uuid_timestamp(uuid).map(|ts| (ts - UUID_EPOCH_OFFSET) as f64 / 1e7)
}

/// Like [`convert_uuid_to_time`], as a `DateTime`.
pub fn convert_uuid_to_datetime(uuid: &Uuid) -> Option<DateTime<Utc>> {
    let intervals = uuid_timestamp(uuid)? - UUID_EPOCH_OFFSET;
    let secs = i64::try_from(intervals.div_euclid(10_000_000)).ok()?;
    let nanos = (intervals.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn uuid_timestamp(uuid: &Uuid) -> Option<i128> {
    if uuid.get_version_num() != 1 {
        return None;
    }
    let (time_low, time_mid, time_hi_and_version, _) = uuid.as_fields();
    let timestamp = (u64::from(time_hi_and_version & 0x0fff) << 48)
        | (u64::from(time_mid) << 32)
        | u64::from(time_low);
    Some(i128::from(timestamp))
}
