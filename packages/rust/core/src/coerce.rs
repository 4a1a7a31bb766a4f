//! Value coercion: raw text plus a declared type tag into a [`TypedValue`].

use rangemeld_shared::types::ScalarType;
use rangemeld_shared::{MeldError, OptimizationConfig, Result, TypeTag, TypedValue};

/// Coerce `raw` into the type named by `type_tag`.
///
/// `array:<subtype>` splits on whitespace and coerces each token; the first
/// failing token aborts with [`MeldError::InvalidArrayElement`]. Float types
/// are rounded to `opts.float_decimals` places.
pub fn coerce(type_tag: &str, raw: &str, opts: &OptimizationConfig) -> Result<TypedValue> {
    match TypeTag::parse(type_tag)? {
        TypeTag::Scalar(ty) => coerce_scalar(ty, raw, opts),
        TypeTag::Array(ty) => raw
            .split_whitespace()
            .enumerate()
            .map(|(index, token)| {
                coerce_scalar(ty, token, opts).map_err(|e| MeldError::InvalidArrayElement {
                    index,
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(TypedValue::Array),
    }
}

fn coerce_scalar(ty: ScalarType, raw: &str, opts: &OptimizationConfig) -> Result<TypedValue> {
    let invalid = |reason: String| MeldError::invalid_value(ty.name(), raw, reason);

    let value = match ty {
        ScalarType::Bool => TypedValue::Bool(
            parse_bool(raw).ok_or_else(|| invalid("expected a boolean".to_string()))?,
        ),
        ScalarType::String => TypedValue::String(raw.to_string()),
        ScalarType::HexBytes => TypedValue::Bytes(decode_hex(raw).map_err(|e| invalid(e.to_string()))?),
        ScalarType::Int32 => TypedValue::Int32(raw.parse::<i32>().map_err(|e| invalid(e.to_string()))?),
        ScalarType::Uint16 => TypedValue::Uint16(raw.parse::<u16>().map_err(|e| invalid(e.to_string()))?),
        ScalarType::Uint32 => TypedValue::Uint32(raw.parse::<u32>().map_err(|e| invalid(e.to_string()))?),
        ScalarType::Uint64 => TypedValue::Uint64(raw.parse::<u64>().map_err(|e| invalid(e.to_string()))?),
        ScalarType::Float32 => {
            let v = raw.parse::<f32>().map_err(|e| invalid(e.to_string()))?;
            if !v.is_finite() {
                return Err(invalid("expected a finite number".to_string()));
            }
            TypedValue::Float32(round_decimals(f64::from(v), opts.float_decimals) as f32)
        }
        ScalarType::Float64 => {
            let v = raw.parse::<f64>().map_err(|e| invalid(e.to_string()))?;
            if !v.is_finite() {
                return Err(invalid("expected a finite number".to_string()));
            }
            TypedValue::Float64(round_decimals(v, opts.float_decimals))
        }
    };
    Ok(value)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn decode_hex(raw: &str) -> std::result::Result<Vec<u8>, String> {
    if raw.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    raw.as_bytes()
        .chunks(2)
        .map(|pair| Ok(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?))
        .collect()
}

fn hex_digit(byte: u8) -> std::result::Result<u8, String> {
    char::from(byte)
        .to_digit(16)
        .map(|d| d as u8)
        .ok_or_else(|| format!("invalid hex digit {:?}", char::from(byte)))
}

/// Round half-to-even at `10^decimals` granularity. `0` leaves the value
/// untouched; negative counts round to a whole number. Values whose scaled
/// form overflows are returned unchanged.
pub fn round_decimals(value: f64, decimals: i32) -> f64 {
    if decimals == 0 || !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals.max(0));
    let scaled = value * factor;
    if !factor.is_finite() || !scaled.is_finite() {
        return value;
    }
    scaled.round_ties_even() / factor
}
