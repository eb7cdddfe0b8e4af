//! Header flag protocol for containers.
//!
//! A sequence header is one byte written after the element count. It tells
//! the reader whether elements share one runtime type, whether that type was
//! declared statically, whether nulls occur, and whether elements carry
//! reference flags. Map chunks use a second bit set, one header per chunk.

use crate::core::TypeId;
use crate::value::Value;
use crate::{EncoderError, Result};

/// Elements carry reference flags.
pub const TRACKING_REF: u8 = 0x01;
/// At least one element is null.
pub const HAS_NULL: u8 = 0x02;
/// The element type differs from the declared one; a type tag follows the header.
pub const NOT_DECL_ELEMENT_TYPE: u8 = 0x04;
/// Elements have different runtime types; each carries its own type tag.
pub const NOT_SAME_TYPE: u8 = 0x08;

const SEQUENCE_FLAGS_MASK: u8 = TRACKING_REF | HAS_NULL | NOT_DECL_ELEMENT_TYPE | NOT_SAME_TYPE;

pub const TRACKING_KEY_REF: u8 = 0x01;
pub const KEY_HAS_NULL: u8 = 0x02;
pub const KEY_DECL_TYPE: u8 = 0x04;
pub const TRACKING_VALUE_REF: u8 = 0x08;
pub const VALUE_HAS_NULL: u8 = 0x10;
pub const VALUE_DECL_TYPE: u8 = 0x20;
pub const KEY_NOT_SAME_TYPE: u8 = 0x40;
pub const VALUE_NOT_SAME_TYPE: u8 = 0x80;

/// Result of one forward scan over a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub has_null: bool,
    pub same_type: bool,
    /// Runtime type of the first non-null element, if any.
    pub first_type: Option<TypeId>,
}

impl Classification {
    /// Type shared by the elements: the first non-null type, or `declared`
    /// when every element is null.
    pub fn representative_or(&self, declared: TypeId) -> TypeId {
        self.first_type.unwrap_or(declared)
    }
}

/// Scans the elements once and reports nullability and type homogeneity.
pub fn classify<'a, I>(elements: I) -> Classification
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut result = Classification {
        has_null: false,
        same_type: true,
        first_type: None,
    };
    for element in elements {
        match element.type_id() {
            None => result.has_null = true,
            Some(ty) => match result.first_type {
                None => result.first_type = Some(ty),
                Some(first) if first != ty => result.same_type = false,
                Some(_) => {}
            },
        }
        if result.has_null && !result.same_type {
            break;
        }
    }
    result
}

/// How the elements of one sequence are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Ref flag per element, then the payload with the shared codec.
    SameTypeTracked,
    /// Null marker per element only if the run has nulls, then the payload.
    SameTypeUntracked,
    /// Full per-value form per element: ref flag, type tag, payload.
    DifferentTypesTracked,
    /// Null marker per element only if the run has nulls, then type tag and payload.
    DifferentTypesUntracked,
}

impl Strategy {
    /// Recovers the strategy from a header byte read off the wire.
    pub fn from_flags(flags: u8) -> Result<Self> {
        if flags & !SEQUENCE_FLAGS_MASK != 0 {
            return Err(EncoderError::Decode(format!(
                "Invalid sequence header 0x{:02X}",
                flags
            )));
        }
        let tracked = flags & TRACKING_REF != 0;
        Ok(match (flags & NOT_SAME_TYPE != 0, tracked) {
            (false, true) => Strategy::SameTypeTracked,
            (false, false) => Strategy::SameTypeUntracked,
            (true, true) => Strategy::DifferentTypesTracked,
            (true, false) => Strategy::DifferentTypesUntracked,
        })
    }
}

/// Header decision for one sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceHeader {
    pub flags: u8,
    pub strategy: Strategy,
    /// Shared element type for the same-type strategies.
    pub element_type: TypeId,
}

impl SequenceHeader {
    /// True if the shared element type tag follows the header byte.
    pub fn writes_type_tag(&self) -> bool {
        self.flags & NOT_SAME_TYPE == 0 && self.flags & NOT_DECL_ELEMENT_TYPE != 0
    }
}

/// Picks the header bits and element strategy.
///
/// `tracking_required` is the registry's answer for the representative type
/// when the elements share a type, or the global ref-tracking switch when they
/// don't. Heterogeneous sequences never share a codec: each element carries
/// its own type tag.
pub fn decide_strategy(
    declared: TypeId,
    tracking_required: bool,
    classification: &Classification,
) -> SequenceHeader {
    let mut flags = 0u8;
    if tracking_required {
        flags |= TRACKING_REF;
    }
    if classification.has_null {
        flags |= HAS_NULL;
    }
    if classification.same_type {
        let element_type = classification.representative_or(declared);
        if element_type != declared {
            flags |= NOT_DECL_ELEMENT_TYPE;
        }
        let strategy = if tracking_required {
            Strategy::SameTypeTracked
        } else {
            Strategy::SameTypeUntracked
        };
        SequenceHeader {
            flags,
            strategy,
            element_type,
        }
    } else {
        flags |= NOT_SAME_TYPE | NOT_DECL_ELEMENT_TYPE;
        let strategy = if tracking_required {
            Strategy::DifferentTypesTracked
        } else {
            Strategy::DifferentTypesUntracked
        };
        SequenceHeader {
            flags,
            strategy,
            element_type: TypeId::UNKNOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_homogeneous_with_nulls() {
        let items = [Value::Null, Value::Int(1), Value::Null, Value::Int(5)];
        let c = classify(&items);
        assert!(c.has_null);
        assert!(c.same_type);
        assert_eq!(c.first_type, Some(TypeId::INT));
    }

    #[test]
    fn test_all_null_falls_back_to_declared() {
        let items = [Value::Null, Value::Null];
        let c = classify(&items);
        let header = decide_strategy(TypeId::STRING, false, &c);
        assert_eq!(header.element_type, TypeId::STRING);
        assert_eq!(header.flags, HAS_NULL);
        assert!(!header.writes_type_tag());
    }

    #[test]
    fn test_heterogeneous_is_not_same_type() {
        let items = [Value::Int(1), Value::from("x")];
        let c = classify(&items);
        let header = decide_strategy(TypeId::UNKNOWN, false, &c);
        assert_eq!(header.flags, NOT_SAME_TYPE | NOT_DECL_ELEMENT_TYPE);
        assert_eq!(header.strategy, Strategy::DifferentTypesUntracked);
        assert_eq!(Strategy::from_flags(header.flags).unwrap(), header.strategy);
    }

    #[test]
    fn test_declared_type_omits_tag() {
        let items = [Value::Int(1), Value::Int(2)];
        let c = classify(&items);
        assert!(!decide_strategy(TypeId::INT, false, &c).writes_type_tag());
        assert!(decide_strategy(TypeId::UNKNOWN, false, &c).writes_type_tag());
    }

    #[test]
    fn test_unknown_bits_rejected() {
        assert!(Strategy::from_flags(0x10).is_err());
    }
}
