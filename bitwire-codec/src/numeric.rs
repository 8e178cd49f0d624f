//! Bounded, quantized numeric encoding.
//!
//! A numeric field with bounds `[min, max]` and resolution `r` has
//! `(max - min) / r + 1` representable values. Optional fields reserve
//! index 0 for "absent" and shift every value up by one. The wire width is
//! the base-2 logarithm of the state count, rounded up.

use crate::context::Traversal;
use crate::dynamic::{DynamicConditions, Evaluated};
use crate::error::CodecError;
use crate::field::FieldCodec;
use bitwire_bits::{ceil_log2, BitBuffer, FieldBits};
use bitwire_schema::{FieldDescriptor, FieldKind, FieldOptions, Value};
use std::marker::PhantomData;
use tracing::warn;

/// Tolerance of the "bound is a multiple of the resolution" check.
const MULTIPLE_EPSILON: f64 = 1e-10;

/// Rounds `value` to the nearest multiple of `resolution`.
pub fn quantize(value: f64, resolution: f64) -> f64 {
    if resolution >= 1.0 {
        (value / resolution).round() * resolution
    } else {
        let inverse = 1.0 / resolution;
        (value * inverse).round() / inverse
    }
}

/// Resolution implied by a field's options: `10^-precision`, an explicit
/// resolution, or 1.
pub fn resolution_of(options: &FieldOptions) -> f64 {
    match (options.precision, options.resolution) {
        (Some(precision), _) => 10f64.powi(-precision),
        (None, Some(resolution)) => resolution,
        (None, None) => 1.0,
    }
}

fn is_multiple_of(value: f64, resolution: f64) -> bool {
    let ratio = value / resolution;
    (ratio - ratio.round()).abs() < MULTIPLE_EPSILON
}

/// The concrete range a numeric value is encoded against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericSpec {
    pub min: f64,
    pub max: f64,
    pub resolution: f64,
    pub required: bool,
}

impl NumericSpec {
    pub fn new(min: f64, max: f64, resolution: f64, required: bool) -> Self {
        Self {
            min,
            max,
            resolution,
            required,
        }
    }

    /// Static bounds of `field`.
    pub fn for_field(field: &FieldDescriptor, required: bool) -> Result<Self, CodecError> {
        let missing = |bound: &str| {
            CodecError::validation(
                format!("field '{}'", field.name),
                format!("missing {bound}"),
            )
        };
        let min = field.options.min.ok_or_else(|| missing("min"))?;
        let max = field.options.max.ok_or_else(|| missing("max"))?;
        Ok(Self::new(min, max, resolution_of(&field.options), required))
    }

    /// Narrows the bounds to evaluated dynamic bounds, clamped into the
    /// static ones. `None` when the narrowed bounds cross.
    pub fn clamped(self, evaluated: &Evaluated) -> Option<Self> {
        let min = evaluated.min_within(self.min, self.max);
        let max = evaluated.max_within(self.min, self.max);
        (min <= max).then_some(Self { min, max, ..self })
    }

    fn null_states(&self) -> f64 {
        if self.required {
            0.0
        } else {
            1.0
        }
    }

    /// Bits used on the wire.
    pub fn width(&self) -> usize {
        let states = (self.max - self.min) / self.resolution + 1.0 + self.null_states();
        if states > 1.0 {
            states.log2().ceil() as usize
        } else {
            0
        }
    }

    /// Largest value index that decodes to a value within the bounds.
    pub fn max_index(&self) -> u64 {
        let span = quantize(self.max, self.resolution) - quantize(self.min, self.resolution);
        (span / self.resolution).round().max(0.0) as u64
    }

    /// Encodes `value`. Out-of-range values fail in strict mode and encode as
    /// all-zero bits otherwise.
    pub fn encode(&self, value: f64, strict: bool, field: &str) -> Result<BitBuffer, CodecError> {
        let width = self.width();
        let quantized = quantize(value, self.resolution);
        if !quantized.is_finite() || quantized < self.min || quantized > self.max {
            if strict {
                return Err(CodecError::OutOfRange {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
            warn!(field, value, min = self.min, max = self.max, "value out of range; encoding as zero");
            return Ok(BitBuffer::zeros(width));
        }

        let offset = quantized - quantize(self.min, self.resolution);
        let index = if self.resolution >= 1.0 {
            offset / self.resolution
        } else {
            offset * (1.0 / self.resolution)
        };
        let mut index = index.round().max(0.0) as u64;
        if !self.required {
            index += 1;
        }
        Ok(BitBuffer::from_u64(index, width)?)
    }

    /// Decodes one value from `bits`; `None` is the null slot.
    pub fn decode(&self, bits: &mut FieldBits<'_>) -> Result<Option<f64>, CodecError> {
        let raw = bits.take(self.width())?.to_u64()?;
        let index = if self.required {
            raw
        } else if raw == 0 {
            return Ok(None);
        } else {
            raw - 1
        };
        if index > self.max_index() {
            return Err(CodecError::malformed(format!(
                "index {} beyond the {} values of [{}, {}]",
                index,
                self.max_index() + 1,
                self.min,
                self.max
            )));
        }

        let offset = if self.resolution >= 1.0 {
            index as f64 * self.resolution
        } else {
            index as f64 / (1.0 / self.resolution)
        };
        let value = offset + quantize(self.min, self.resolution);
        Ok(Some(quantize(value, self.resolution)))
    }
}

/// Rust types that carry a numeric field on the wire.
pub trait WireNumeric: 'static {
    const KIND: FieldKind;
    const LOWEST: f64;
    const HIGHEST: f64;

    /// Reads a field value; `None` for values of another kind.
    fn from_value(value: &Value) -> Option<f64>;

    /// Builds a field value; `None` when `number` is not representable.
    fn to_value(number: f64) -> Option<Value>;
}

macro_rules! wire_integer {
    ($ty:ty, $kind:expr, $variant:ident, $target:ty) => {
        impl WireNumeric for $ty {
            const KIND: FieldKind = $kind;
            const LOWEST: f64 = <$ty>::MIN as f64;
            const HIGHEST: f64 = <$ty>::MAX as f64;

            fn from_value(value: &Value) -> Option<f64> {
                match value {
                    Value::Int(v) => Some(*v as f64),
                    Value::UInt(v) => Some(*v as f64),
                    _ => None,
                }
            }

            fn to_value(number: f64) -> Option<Value> {
                let rounded = number.round();
                if rounded < Self::LOWEST || rounded > Self::HIGHEST {
                    return None;
                }
                Some(Value::$variant(rounded as $ty as $target))
            }
        }
    };
}

wire_integer!(i32, FieldKind::Int32, Int, i64);
wire_integer!(i64, FieldKind::Int64, Int, i64);
wire_integer!(u32, FieldKind::UInt32, UInt, u64);
wire_integer!(u64, FieldKind::UInt64, UInt, u64);

macro_rules! wire_float {
    ($ty:ty, $kind:expr) => {
        impl WireNumeric for $ty {
            const KIND: FieldKind = $kind;
            const LOWEST: f64 = <$ty>::MIN as f64;
            const HIGHEST: f64 = <$ty>::MAX as f64;

            fn from_value(value: &Value) -> Option<f64> {
                match value {
                    Value::Double(v) => Some(*v),
                    Value::Int(v) => Some(*v as f64),
                    Value::UInt(v) => Some(*v as f64),
                    _ => None,
                }
            }

            fn to_value(number: f64) -> Option<Value> {
                number.is_finite().then_some(Value::Double(number))
            }
        }
    };
}

wire_float!(f32, FieldKind::Float);
wire_float!(f64, FieldKind::Double);

/// Default codec of the numeric field kinds, generic over the wire type.
pub struct DefaultNumericCodec<T> {
    wire: PhantomData<fn() -> T>,
}

impl<T> DefaultNumericCodec<T> {
    pub fn new() -> Self {
        Self { wire: PhantomData }
    }
}

impl<T> Default for DefaultNumericCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WireNumeric> DefaultNumericCodec<T> {
    /// Bounds for the current value, with dynamic bounds applied.
    fn spec(&self, ctx: &Traversal<'_, '_>) -> Result<NumericSpec, CodecError> {
        let field = ctx.current_field()?;
        let spec = NumericSpec::for_field(field, ctx.use_required())?;
        if ctx.is_schema_only() || !field.conditions().has_bounds() {
            return Ok(spec);
        }
        let evaluated = ctx.evaluate_conditions(field);
        spec.clamped(&evaluated).ok_or_else(|| CodecError::InvalidValue {
            field: ctx.field_path(),
            reason: format!(
                "dynamic bounds [{:?}, {:?}] leave no valid values",
                evaluated.min, evaluated.max
            ),
        })
    }
}

impl<T: WireNumeric> FieldCodec for DefaultNumericCodec<T> {
    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let number = T::from_value(wire)
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), T::KIND.as_str(), wire.kind_name()))?;
        self.spec(ctx)?.encode(number, ctx.strict(), &ctx.field_path())
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        let Some(number) = self.spec(ctx)?.decode(bits)? else {
            return Ok(None);
        };
        T::to_value(number).map(Some).ok_or_else(|| {
            CodecError::malformed(format!("{} does not fit {}", number, T::KIND))
        })
    }

    fn size(&self, _wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(self.spec(ctx)?.width())
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        if !ctx.is_schema_only() {
            return Ok(self.spec(ctx)?.width());
        }
        // without values, dynamic bounds may shrink the range to one value
        let field = ctx.current_field()?;
        let conditions = DynamicConditions::of(field);
        if conditions.has_min() || conditions.has_max() {
            return Ok(ceil_log2(if ctx.use_required() { 1 } else { 2 }));
        }
        Ok(NumericSpec::for_field(field, ctx.use_required())?.width())
    }

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        if !ctx.is_schema_only() {
            return Ok(self.spec(ctx)?.width());
        }
        let field = ctx.current_field()?;
        Ok(NumericSpec::for_field(field, ctx.use_required())?.width())
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let field = ctx.current_field()?;
        let options = &field.options;
        ctx.require(
            T::KIND == field.kind,
            format!("{} codec on a {} field", T::KIND, field.kind),
        )?;
        ctx.require(options.min.is_some(), "missing min")?;
        ctx.require(options.max.is_some(), "missing max")?;
        ctx.require(
            options.precision.is_none() || options.resolution.is_none(),
            "precision and resolution are mutually exclusive",
        )?;
        if let Some(resolution) = options.resolution {
            ctx.require(resolution > 0.0, "resolution must be positive")?;
        }

        let spec = NumericSpec::for_field(field, true)?;
        ctx.require(spec.min <= spec.max, "min must not exceed max")?;
        ctx.require(
            spec.min >= T::LOWEST && spec.max <= T::HIGHEST,
            format!("bounds exceed the range of {}", T::KIND),
        )?;

        for (name, bound) in [("min", spec.min), ("max", spec.max)] {
            if is_multiple_of(bound, spec.resolution) {
                continue;
            }
            if options.resolution.is_some() {
                ctx.require(
                    false,
                    format!("{name} {bound} is not a multiple of resolution {}", spec.resolution),
                )?;
            } else {
                warn!(
                    field = %ctx.field_path(),
                    bound,
                    resolution = spec.resolution,
                    "{name} is not a multiple of the implied resolution"
                );
            }
        }

        if spec.max > spec.min {
            let significant = (spec.max - spec.min).log2() - spec.resolution.log2();
            ctx.require(
                significant <= f64::MANTISSA_DIGITS as f64,
                format!(
                    "[{}, {}] at resolution {} needs more than {} significant bits",
                    spec.min,
                    spec.max,
                    spec.resolution,
                    f64::MANTISSA_DIGITS
                ),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    fn encode(spec: &NumericSpec, value: f64) -> String {
        spec.encode(value, true, "x").unwrap().to_string()
    }

    fn decode(spec: &NumericSpec, bits: &str) -> Result<Option<f64>, CodecError> {
        let mut pool: BitBuffer = bits.parse().unwrap();
        let mut field = FieldBits::new(&mut pool);
        spec.decode(&mut field)
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(7.6, 1.0), 8.0);
        assert_eq!(quantize(1.26, 0.1), 1.3);
        assert_eq!(quantize(12.0, 5.0), 10.0);
        assert_eq!(quantize(13.0, 5.0), 15.0);
        assert_eq!(quantize(0.123456, 0.001), 0.123);
    }

    #[test]
    fn test_resolution_of() {
        let mut options = FieldOptions::default();
        assert_eq!(resolution_of(&options), 1.0);
        options.resolution = Some(0.5);
        assert_eq!(resolution_of(&options), 0.5);
        options.resolution = None;
        options.precision = Some(2);
        assert!((resolution_of(&options) - 0.01).abs() < 1e-15);
        options.precision = Some(-1);
        assert_eq!(resolution_of(&options), 10.0);
    }

    #[test]
    fn test_width() {
        assert_eq!(NumericSpec::new(0.0, 7.0, 1.0, true).width(), 3);
        assert_eq!(NumericSpec::new(0.0, 7.0, 1.0, false).width(), 4);
        assert_eq!(NumericSpec::new(0.0, 100.0, 0.1, true).width(), 10);
        assert_eq!(NumericSpec::new(-10.0, 10.0, 1.0, false).width(), 5);
        assert_eq!(NumericSpec::new(3.0, 3.0, 1.0, true).width(), 0);
        assert_eq!(NumericSpec::new(3.0, 3.0, 1.0, false).width(), 1);
    }

    #[test]
    fn test_required_encoding() {
        let spec = NumericSpec::new(0.0, 7.0, 1.0, true);
        assert_eq!(encode(&spec, 5.0), "101");
        assert_eq!(encode(&spec, 0.0), "000");
        assert_eq!(encode(&spec, 7.0), "111");
        assert_eq!(decode(&spec, "101").unwrap(), Some(5.0));
    }

    #[test]
    fn test_optional_encoding() {
        let spec = NumericSpec::new(0.0, 7.0, 1.0, false);
        assert_eq!(encode(&spec, 5.0), "0110");
        assert_eq!(decode(&spec, "0110").unwrap(), Some(5.0));
        assert_eq!(decode(&spec, "0000").unwrap(), None);
    }

    #[test]
    fn test_offset_and_resolution() {
        let spec = NumericSpec::new(-10.0, 10.0, 0.5, true);
        // (-2.5 - -10) / 0.5 = 15
        assert_eq!(encode(&spec, -2.5), "001111");
        assert_eq!(decode(&spec, "001111").unwrap(), Some(-2.5));

        let spec = NumericSpec::new(0.0, 100.0, 0.1, true);
        let bits = spec.encode(12.34, true, "x").unwrap();
        let mut pool = bits;
        let mut field = FieldBits::new(&mut pool);
        assert_eq!(spec.decode(&mut field).unwrap(), Some(12.3));
    }

    #[test]
    fn test_out_of_range() {
        let spec = NumericSpec::new(0.0, 7.0, 1.0, false);
        let err = spec.encode(9.0, true, "depth").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(err.to_string().contains("depth"));

        // lenient mode writes the null slot
        assert_eq!(spec.encode(9.0, false, "depth").unwrap().to_string(), "0000");
        assert_eq!(spec.encode(-1.0, false, "depth").unwrap().to_string(), "0000");
        assert!(spec.encode(f64::NAN, true, "depth").is_err());

        // rounding into range is accepted
        assert_eq!(encode(&spec, 7.4), "1000");
    }

    #[test]
    fn test_index_beyond_range_is_malformed() {
        let spec = NumericSpec::new(0.0, 4.0, 1.0, true);
        assert_eq!(spec.width(), 3);
        let err = decode(&spec, "111").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_short_input_is_malformed() {
        let spec = NumericSpec::new(0.0, 255.0, 1.0, true);
        let err = decode(&spec, "101").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_clamped() {
        let spec = NumericSpec::new(0.0, 100.0, 1.0, true);
        let evaluated = Evaluated {
            min: Some(40.0),
            max: Some(200.0),
            ..Default::default()
        };
        let clamped = spec.clamped(&evaluated).unwrap();
        assert_eq!((clamped.min, clamped.max), (40.0, 100.0));
        assert_eq!(clamped.width(), 6);

        let crossed = Evaluated {
            min: Some(60.0),
            max: Some(50.0),
            ..Default::default()
        };
        assert!(spec.clamped(&crossed).is_none());
    }

    #[test]
    fn test_wire_numeric_conversions() {
        assert_eq!(<i32 as WireNumeric>::from_value(&Value::Int(-3)), Some(-3.0));
        assert_eq!(<i32 as WireNumeric>::from_value(&Value::Double(1.0)), None);
        assert_eq!(<f64 as WireNumeric>::from_value(&Value::Int(2)), Some(2.0));
        assert_eq!(<u32 as WireNumeric>::to_value(5.0), Some(Value::UInt(5)));
        assert_eq!(<u32 as WireNumeric>::to_value(-1.0), None);
        assert_eq!(<i32 as WireNumeric>::to_value(3e10), None);
        assert_eq!(<i64 as WireNumeric>::to_value(-7.0), Some(Value::Int(-7)));
        assert_eq!(<f64 as WireNumeric>::to_value(f64::INFINITY), None);
    }

    proptest! {
        #[test]
        fn prop_round_trip_is_quantization(
            value in -50.0f64..50.0,
            precision in 0i32..3,
            required in any::<bool>(),
        ) {
            let resolution = 10f64.powi(-precision);
            let spec = NumericSpec::new(-50.0, 50.0, resolution, required);
            let mut pool = spec.encode(value, true, "x").unwrap();
            prop_assert_eq!(pool.len(), spec.width());
            let mut field = FieldBits::new(&mut pool);
            let decoded = spec.decode(&mut field).unwrap().unwrap();
            prop_assert!((decoded - quantize(value, resolution)).abs() < resolution / 2.0);
        }

        #[test]
        fn prop_decode_never_panics(raw in any::<u64>(), required in any::<bool>()) {
            let spec = NumericSpec::new(0.0, 20.0, 1.0, required);
            let mut pool = BitBuffer::from_u64(raw & 0x1f, spec.width()).unwrap();
            let mut field = FieldBits::new(&mut pool);
            let _ = spec.decode(&mut field);
        }
    }
}
