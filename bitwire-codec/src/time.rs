//! Time-of-window encoding and the clock it is resolved against.
//!
//! Only the offset into a window of `num_days` days is transmitted. The
//! decoder places that offset in the window closest to its own clock, so
//! encoder and decoder clocks must agree to within half a window.

use crate::context::Traversal;
use crate::error::CodecError;
use crate::field::FieldCodec;
use crate::numeric::{quantize, NumericSpec};
use bitwire_bits::{BitBuffer, FieldBits};
use bitwire_schema::{FieldKind, Value};
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::fmt;

const SECONDS_PER_DAY: i64 = 86_400;
const MICROS_PER_SECOND: f64 = 1e6;

/// Source of the current time for decoding.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// A clock at `seconds` past the Unix epoch.
    pub fn at_unix(seconds: i64) -> Self {
        Self::new(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl fmt::Debug for dyn Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clock({})", self.now().to_rfc3339())
    }
}

/// Codec of timestamps as seconds into a window of `num_days` days.
///
/// Serves `timestamp` fields, `int64`/`uint64` microseconds since the epoch
/// and `double` seconds since the epoch. Precision defaults to whole
/// seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeCodec;

impl TimeCodec {
    fn window_seconds(ctx: &Traversal<'_, '_>) -> Result<i64, CodecError> {
        let field = ctx.current_field()?;
        Ok(i64::from(field.options.num_days) * SECONDS_PER_DAY)
    }

    fn spec(ctx: &Traversal<'_, '_>) -> Result<NumericSpec, CodecError> {
        let field = ctx.current_field()?;
        let precision = field.options.precision.unwrap_or(0);
        Ok(NumericSpec::new(
            0.0,
            Self::window_seconds(ctx)? as f64,
            10f64.powi(-precision),
            ctx.use_required(),
        ))
    }

    fn to_seconds(kind: FieldKind, value: &Value) -> Option<f64> {
        match (kind, value) {
            (FieldKind::Timestamp, Value::Time(t)) => {
                Some(t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) / MICROS_PER_SECOND)
            }
            (FieldKind::Int64, Value::Int(micros)) => Some(*micros as f64 / MICROS_PER_SECOND),
            (FieldKind::UInt64, Value::UInt(micros)) => Some(*micros as f64 / MICROS_PER_SECOND),
            (FieldKind::Double, Value::Double(seconds)) => Some(*seconds),
            (FieldKind::Double, Value::Int(seconds)) => Some(*seconds as f64),
            _ => None,
        }
    }

    fn from_seconds(kind: FieldKind, seconds: f64) -> Option<Value> {
        let micros = (seconds * MICROS_PER_SECOND).round();
        match kind {
            FieldKind::Timestamp => DateTime::from_timestamp_micros(micros as i64).map(Value::Time),
            FieldKind::Int64 => Some(Value::Int(micros as i64)),
            FieldKind::UInt64 => (micros >= 0.0).then_some(Value::UInt(micros as u64)),
            FieldKind::Double => Some(Value::Double(seconds)),
            _ => None,
        }
    }
}

impl FieldCodec for TimeCodec {
    fn pre_encode<'v>(
        &self,
        value: &'v Value,
        ctx: &Traversal<'_, '_>,
    ) -> Result<Cow<'v, Value>, CodecError> {
        let field = ctx.current_field()?;
        let seconds = Self::to_seconds(field.kind, value)
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), field.kind.as_str(), value.kind_name()))?;
        let window = Self::window_seconds(ctx)? as f64;
        Ok(Cow::Owned(Value::Double(seconds.rem_euclid(window))))
    }

    fn post_decode(&self, wire: Value, ctx: &Traversal<'_, '_>) -> Result<Value, CodecError> {
        let field = ctx.current_field()?;
        let encoded = wire
            .as_f64()
            .ok_or_else(|| CodecError::malformed("time offset is not numeric"))?;
        let window = Self::window_seconds(ctx)?;

        let now = ctx.clock().now().timestamp();
        let mut window_start = now - now.rem_euclid(window);
        let elapsed = (now - window_start) as f64;
        let half = window as f64 / 2.0;
        if encoded - elapsed > half {
            window_start -= window;
        } else if elapsed - encoded > half {
            window_start += window;
        }

        let resolution = Self::spec(ctx)?.resolution;
        let seconds = quantize(window_start as f64 + encoded, resolution);
        Self::from_seconds(field.kind, seconds).ok_or_else(|| {
            CodecError::malformed(format!("time {seconds} s does not fit {}", field.kind))
        })
    }

    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let offset = wire
            .as_f64()
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), "time offset", wire.kind_name()))?;
        Self::spec(ctx)?.encode(offset, ctx.strict(), &ctx.field_path())
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        Ok(Self::spec(ctx)?.decode(bits)?.map(Value::Double))
    }

    fn size(&self, _wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::spec(ctx)?.width())
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::spec(ctx)?.width())
    }

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::spec(ctx)?.width())
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let field = ctx.current_field()?;
        ctx.require(
            matches!(
                field.kind,
                FieldKind::Timestamp | FieldKind::Int64 | FieldKind::UInt64 | FieldKind::Double
            ),
            format!("time codec cannot serve {} fields", field.kind),
        )?;
        ctx.require(field.options.num_days >= 1, "num_days must be at least 1")?;
        ctx.require(
            field.options.resolution.is_none(),
            "time fields take precision, not resolution",
        )?;
        let precision = field.options.precision.unwrap_or(0);
        ctx.require(
            (-5..=6).contains(&precision),
            "time precision must be between -5 and 6",
        )
    }
}
