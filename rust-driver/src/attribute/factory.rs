use crate::{
    error::{Error, Result},
    grw::{GenericReadWrite, OnOperation},
};

use super::{AccessCtx, AttrValue, Attribute, AttributeCode, ValueAccessor, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Flag,
    Word,
    Wide { words: u8 },
}

/// Generic accessor over a masked register.
///
/// Booleans read as `raw & mask != 0` and write all mask bits or none.
/// Integers read as `raw & mask`; the mask selects bits, it is not a field
/// position, so nothing is shifted. A two-word uint64 reads the low word at
/// the bound address and the high word four bytes above it, the mask applying
/// to each word.
#[derive(Debug)]
struct RegisterAccessor {
    grw: GenericReadWrite,
    width: Width,
}

impl RegisterAccessor {
    fn high(&self) -> GenericReadWrite {
        self.grw.sibling(4)
    }
}

impl ValueAccessor for RegisterAccessor {
    fn get(&self, _ctx: &AccessCtx<'_>) -> Result<AttrValue> {
        match self.width {
            Width::Flag => Ok(AttrValue::Boolean(self.grw.read_masked()? != 0)),
            Width::Word => Ok(AttrValue::Uint32(self.grw.read_masked()?)),
            Width::Wide { words: 1 } => Ok(AttrValue::Uint64(u64::from(self.grw.read_masked()?))),
            Width::Wide { .. } => {
                let low = self.grw.read_masked()?;
                let high = self.high().read_masked()?;
                Ok(AttrValue::Uint64((u64::from(high) << 32) | u64::from(low)))
            }
        }
    }

    fn set(&mut self, _ctx: &AccessCtx<'_>, value: &AttrValue) -> Result<()> {
        match self.width {
            Width::Flag => {
                let bits = if value.as_bool()? { self.grw.mask() } else { 0 };
                self.grw.write_masked(bits)
            }
            Width::Word => self.grw.write_masked(value.as_u32()?),
            Width::Wide { words: 1 } => {
                let v = value.as_u64()?;
                // bits above the word lie outside the mask
                #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
                let word = (v & u64::from(self.grw.mask())) as u32;
                self.grw.write_masked(word)
            }
            Width::Wide { .. } => {
                let v = value.as_u64()?;
                #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
                let (low, high) = (v as u32, (v >> 32) as u32);
                self.grw.write_masked(low)?;
                self.high().write_masked(high)
            }
        }
    }

    fn is_latching(&self) -> bool {
        self.grw.on_operation() == OnOperation::ClearOnRead
    }

    fn grw_mut(&mut self) -> Option<&mut GenericReadWrite> {
        Some(&mut self.grw)
    }
}

/// Builds register-backed attributes from a [`GenericReadWrite`] and a mask
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeFactory;

impl AttributeFactory {
    /// Derives an attribute whose value is the masked register content.
    ///
    /// `length` counts 32-bit words and matters only for uint64 attributes,
    /// which take one or two words.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for a zero mask, a value type other
    /// than boolean, uint32 or uint64, or an unsupported length
    pub fn make_attribute(
        code: AttributeCode,
        value_type: ValueType,
        grw: GenericReadWrite,
        mask: u32,
        length: usize,
    ) -> Result<Attribute> {
        if mask == 0 {
            return Err(Error::InvalidInput(format!("{code}: empty mask")));
        }
        let width = match (value_type, length) {
            (ValueType::Boolean, _) => Width::Flag,
            (ValueType::Uint32, _) => Width::Word,
            (ValueType::Uint64, 1) => Width::Wide { words: 1 },
            (ValueType::Uint64, 2) => Width::Wide { words: 2 },
            (ValueType::Uint64, n) => {
                return Err(Error::InvalidInput(format!(
                    "{code}: uint64 spans 1 or 2 words, not {n}"
                )))
            }
            (other, _) => {
                return Err(Error::InvalidInput(format!(
                    "{code}: no generic accessor for {other}"
                )))
            }
        };
        let accessor = RegisterAccessor {
            grw: grw.with_mask(mask),
            width,
        };
        Ok(Attribute::from_boxed(code, value_type, Box::new(accessor)))
    }
}
