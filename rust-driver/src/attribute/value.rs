use std::fmt::{self, Write as _};

use crate::error::{Error, Result};

/// Value type declared by an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// On/off flag
    Boolean,
    /// 32-bit unsigned integer
    Uint32,
    /// 64-bit unsigned integer
    Uint64,
    /// Single precision float
    Float,
    /// Text
    String,
    /// Opaque byte record
    Struct,
}

impl ValueType {
    /// Human readable type name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Uint32 => "uint32",
            ValueType::Uint64 => "uint64",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Struct => "struct",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An attribute value, owned by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// On/off flag
    Boolean(bool),
    /// 32-bit unsigned integer
    Uint32(u32),
    /// 64-bit unsigned integer
    Uint64(u64),
    /// Single precision float
    Float(f32),
    /// Text
    String(String),
    /// Opaque byte record
    Struct(Vec<u8>),
}

impl AttrValue {
    /// Type of the carried value
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match *self {
            AttrValue::Boolean(_) => ValueType::Boolean,
            AttrValue::Uint32(_) => ValueType::Uint32,
            AttrValue::Uint64(_) => ValueType::Uint64,
            AttrValue::Float(_) => ValueType::Float,
            AttrValue::String(_) => ValueType::String,
            AttrValue::Struct(_) => ValueType::Struct,
        }
    }

    fn mismatch(&self, expected: ValueType) -> Error {
        Error::TypeMismatch {
            expected: expected.name(),
            actual: self.value_type().name(),
        }
    }

    /// The flag, if this is a boolean
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] for any other type
    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            AttrValue::Boolean(v) => Ok(v),
            _ => Err(self.mismatch(ValueType::Boolean)),
        }
    }

    /// The integer, if this is a uint32
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] for any other type
    pub fn as_u32(&self) -> Result<u32> {
        match *self {
            AttrValue::Uint32(v) => Ok(v),
            _ => Err(self.mismatch(ValueType::Uint32)),
        }
    }

    /// The integer, if this is a uint64
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] for any other type
    pub fn as_u64(&self) -> Result<u64> {
        match *self {
            AttrValue::Uint64(v) => Ok(v),
            _ => Err(self.mismatch(ValueType::Uint64)),
        }
    }

    /// The float, if this is a float
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] for any other type
    pub fn as_f32(&self) -> Result<f32> {
        match *self {
            AttrValue::Float(v) => Ok(v),
            _ => Err(self.mismatch(ValueType::Float)),
        }
    }

    /// The text, if this is a string
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] for any other type
    pub fn as_str(&self) -> Result<&str> {
        match *self {
            AttrValue::String(ref v) => Ok(v),
            _ => Err(self.mismatch(ValueType::String)),
        }
    }

    /// The record bytes, if this is a struct
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] for any other type
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match *self {
            AttrValue::Struct(ref v) => Ok(v),
            _ => Err(self.mismatch(ValueType::Struct)),
        }
    }

    /// Text form used by configuration tools
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match *self {
            AttrValue::Boolean(v) => String::from(if v { "on" } else { "off" }),
            AttrValue::Uint32(v) => v.to_string(),
            AttrValue::Uint64(v) => v.to_string(),
            AttrValue::Float(v) => v.to_string(),
            AttrValue::String(ref v) => v.clone(),
            AttrValue::Struct(ref bytes) => {
                bytes.iter().fold(String::new(), |mut out, b| {
                    let _ignore = write!(out, "{b:02x}");
                    out
                })
            }
        }
    }

    /// Parses the text form of a `value_type` value.
    ///
    /// Booleans accept `on/off`, `true/false`, `yes/no` and `1/0`. Integers
    /// accept decimal or `0x` hexadecimal.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] if `text` is not a valid value
    pub fn parse(value_type: ValueType, text: &str) -> Result<Self> {
        let text = text.trim();
        let bad = || Error::Parse(format!("{text:?} is not a valid {value_type}"));
        match value_type {
            ValueType::Boolean => match text.to_ascii_lowercase().as_str() {
                "on" | "true" | "yes" | "1" => Ok(AttrValue::Boolean(true)),
                "off" | "false" | "no" | "0" => Ok(AttrValue::Boolean(false)),
                _ => Err(bad()),
            },
            ValueType::Uint32 => {
                let v = parse_integer(text).ok_or_else(bad)?;
                u32::try_from(v).map(AttrValue::Uint32).map_err(|_err| bad())
            }
            ValueType::Uint64 => parse_integer(text).map(AttrValue::Uint64).ok_or_else(bad),
            ValueType::Float => text.parse().map(AttrValue::Float).map_err(|_err| bad()),
            ValueType::String => Ok(AttrValue::String(text.to_owned())),
            ValueType::Struct => {
                let digits: Vec<u8> = text
                    .bytes()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                if digits.len() % 2 != 0 {
                    return Err(bad());
                }
                digits
                    .chunks(2)
                    .map(|pair| {
                        std::str::from_utf8(pair)
                            .ok()
                            .and_then(|s| u8::from_str_radix(s, 16).ok())
                    })
                    .collect::<Option<Vec<u8>>>()
                    .map(AttrValue::Struct)
                    .ok_or_else(bad)
            }
        }
    }
}

fn parse_integer(text: &str) -> Option<u64> {
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Boolean(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Uint32(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::Uint64(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v)
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_owned())
    }
}
