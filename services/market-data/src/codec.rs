//! Timestamped value codec
//!
//! Series members are stored as a single opaque string:
//!
//! ```text
//! 20240101093000125100.25#s-1:m-7:0
//! └──── 17 chars ─┘└ value └ tag (optional)
//! yyyyMMddHHmmssfff
//! ```
//!
//! The fixed-width UTC timestamp prefix sorts lexicographically in
//! chronological order, so a member can be decoded and ordered without its
//! score. Time is kept at millisecond precision; years 0000..=9999 are
//! encodable.
//!
//! The tag only makes otherwise equal members distinct inside a sorted set;
//! decoding ignores it.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

/// Width of the timestamp prefix in bytes.
pub const TIMESTAMP_WIDTH: usize = 17;

/// Separates the value from the member tag.
pub const TAG_SEPARATOR: char = '#';

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload shorter than the timestamp prefix: {0:?}")]
    Truncated(String),

    #[error("invalid timestamp prefix: {0:?}")]
    Timestamp(String),

    #[error("invalid value {value:?}: {reason}")]
    Value { value: String, reason: String },

    #[error("timestamp outside encodable range: {0}")]
    OutOfRange(DateTime<Utc>),
}

/// A decoded `(value, event time)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamped<T> {
    pub value: T,
    pub at: DateTime<Utc>,
}

impl<T> Timestamped<T> {
    pub fn new(value: T, at: DateTime<Utc>) -> Self {
        Self { value, at }
    }
}

/// Encode `value` with its event time.
pub fn encode<T: Display>(value: &T, at: DateTime<Utc>) -> Result<String, CodecError> {
    let value = value.to_string();
    if value.contains(TAG_SEPARATOR) {
        return Err(CodecError::Value {
            value,
            reason: format!("contains the tag separator {:?}", TAG_SEPARATOR),
        });
    }

    let mut out = encode_timestamp(at)?;
    out.push_str(&value);
    Ok(out)
}

/// Encode `value` with its event time and a member tag.
pub fn encode_tagged<T: Display>(
    value: &T,
    at: DateTime<Utc>,
    tag: &str,
) -> Result<String, CodecError> {
    let mut out = encode(value, at)?;
    out.push(TAG_SEPARATOR);
    out.push_str(tag);
    Ok(out)
}

/// Decode a payload produced by [`encode`].
pub fn decode<T>(payload: &str) -> Result<Timestamped<T>, CodecError>
where
    T: FromStr,
    T::Err: Display,
{
    let (prefix, rest) = match (payload.get(..TIMESTAMP_WIDTH), payload.get(TIMESTAMP_WIDTH..)) {
        (Some(prefix), Some(rest)) => (prefix, rest),
        _ => return Err(CodecError::Truncated(payload.to_string())),
    };

    let at = decode_timestamp(prefix)?;
    let rest = rest.split_once(TAG_SEPARATOR).map_or(rest, |(value, _)| value);
    let value = rest.parse::<T>().map_err(|e| CodecError::Value {
        value: rest.to_string(),
        reason: e.to_string(),
    })?;

    Ok(Timestamped { value, at })
}

/// Sorted-set score for an event time: Unix seconds with millisecond fraction.
pub fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn encode_timestamp(at: DateTime<Utc>) -> Result<String, CodecError> {
    if !(0..=9999).contains(&at.year()) {
        return Err(CodecError::OutOfRange(at));
    }

    // Leap seconds report subsec values >= 1000ms
    let millis = at.timestamp_subsec_millis().min(999);

    Ok(format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}{:03}",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        millis
    ))
}

fn decode_timestamp(prefix: &str) -> Result<DateTime<Utc>, CodecError> {
    let invalid = || CodecError::Timestamp(prefix.to_string());

    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let field = |from: usize, to: usize| -> Result<u32, CodecError> {
        prefix[from..to].parse::<u32>().map_err(|_| invalid())
    };

    let year = field(0, 4)? as i32;
    let naive = NaiveDate::from_ymd_opt(year, field(4, 6)?, field(6, 8)?)
        .and_then(|date| {
            date.and_hms_milli_opt(field(8, 10).ok()?, field(10, 12).ok()?, field(12, 14).ok()?, field(14, 17).ok()?)
        })
        .ok_or_else(invalid)?;

    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).single().unwrap()
            + chrono::Duration::milliseconds(125);
        let encoded = encode(&Decimal::new(10025, 2), t).unwrap();
        assert_eq!(encoded, "20240101093000125100.25");
    }

    #[test]
    fn test_round_trip_decimal() {
        let t = at(1_708_123_456_789);
        let encoded = encode(&Decimal::new(-31415, 4), t).unwrap();
        let decoded: Timestamped<Decimal> = decode(&encoded).unwrap();
        assert_eq!(decoded.value, Decimal::new(-31415, 4));
        assert_eq!(decoded.at, t);
    }

    #[test]
    fn test_round_trip_string_value() {
        let t = at(0);
        let encoded = encode(&"BTCUSD", t).unwrap();
        let decoded: Timestamped<String> = decode(&encoded).unwrap();
        assert_eq!(decoded, Timestamped::new("BTCUSD".to_string(), t));
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let err = decode::<Decimal>("2024010109").unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }

    #[test]
    fn test_decode_rejects_bad_timestamp() {
        let err = decode::<Decimal>("2024133109300012510").unwrap_err();
        assert!(matches!(err, CodecError::Timestamp(_)));

        let err = decode::<Decimal>("2024-1-1T09300012510").unwrap_err();
        assert!(matches!(err, CodecError::Timestamp(_)));
    }

    #[test]
    fn test_decode_rejects_bad_value() {
        let err = decode::<Decimal>("20240101093000125abc").unwrap_err();
        assert!(matches!(err, CodecError::Value { .. }));
    }

    #[test]
    fn test_encode_rejects_out_of_range_year() {
        let far = Utc.with_ymd_and_hms(10_000, 1, 1, 0, 0, 0).single().unwrap();
        assert!(matches!(
            encode(&Decimal::ONE, far),
            Err(CodecError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_score_has_millisecond_fraction() {
        assert_eq!(score(at(1_500)), 1.5);
        assert_eq!(score(at(60_000)), 60.0);
    }

    #[test]
    fn test_tag_keeps_equal_values_distinct() {
        let t = at(1_714_564_800_000);
        let a = encode_tagged(&Decimal::ONE, t, "s-1:m-1:0").unwrap();
        let b = encode_tagged(&Decimal::ONE, t, "s-2:m-1:0").unwrap();
        assert_ne!(a, b);
        assert_eq!(a[..TIMESTAMP_WIDTH], b[..TIMESTAMP_WIDTH]);

        let decoded: Timestamped<Decimal> = decode(&a).unwrap();
        assert_eq!(decoded, Timestamped::new(Decimal::ONE, t));
    }

    #[test]
    fn test_value_with_separator_rejected() {
        assert!(matches!(
            encode(&"a#b", at(0)),
            Err(CodecError::Value { .. })
        ));
    }

    // Up to 9999-12-31T23:59:59.999Z
    const MAX_MILLIS: i64 = 253_402_300_799_999;

    proptest! {
        #[test]
        fn prop_round_trip(millis in 0i64..MAX_MILLIS, mantissa in any::<i64>(), scale in 0u32..18) {
            let t = at(millis);
            let value = Decimal::new(mantissa, scale);
            let decoded: Timestamped<Decimal> = decode(&encode(&value, t).unwrap()).unwrap();
            prop_assert_eq!(decoded.value, value);
            prop_assert_eq!(decoded.at, t);
        }

        #[test]
        fn prop_prefix_sorts_chronologically(a in 0i64..MAX_MILLIS, b in 0i64..MAX_MILLIS) {
            let ea = encode(&Decimal::ONE, at(a)).unwrap();
            let eb = encode(&Decimal::ONE, at(b)).unwrap();
            prop_assert_eq!(
                ea[..TIMESTAMP_WIDTH].cmp(&eb[..TIMESTAMP_WIDTH]),
                a.cmp(&b)
            );
        }
    }
}
