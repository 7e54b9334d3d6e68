//! Field type lattice for dataflow schemas.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::{BagType, TupleType};

/// Types a schema field can take.
///
/// Scalars form a widening lattice `Int < Long < Float < Double` with
/// `ByteArray` as the under-typed bottom (anything can be read out of raw
/// bytes) and `CharArray` as a separate chain. Composites are structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Raw bytes, promoted on first observation.
    ByteArray,
    Int,
    Long,
    Float,
    Double,
    CharArray,
    Boolean,
    DateTime,
    Tuple(TupleType),
    Bag(BagType),
    Map(Box<FieldType>),
}

impl FieldType {
    /// Numeric widening rank; `None` for non-numeric types.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            FieldType::Int => Some(0),
            FieldType::Long => Some(1),
            FieldType::Float => Some(2),
            FieldType::Double => Some(3),
            _ => None,
        }
    }

    /// Returns true if `other` can be reached from `self` by widening.
    ///
    /// Structural on composites: field order matters, field names do not.
    pub fn compatible(&self, other: &FieldType) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            // Bytearray is the bottom of the lattice.
            (FieldType::ByteArray, _) => true,
            (a, b) => match (a.numeric_rank(), b.numeric_rank()) {
                (Some(ra), Some(rb)) => ra <= rb,
                _ => a.structurally_compatible(b),
            },
        }
    }

    fn structurally_compatible(&self, other: &FieldType) -> bool {
        match (self, other) {
            (FieldType::Tuple(a), FieldType::Tuple(b)) => a.compatible(b),
            (FieldType::Bag(a), FieldType::Bag(b)) => a.tuple().compatible(b.tuple()),
            (FieldType::Map(a), FieldType::Map(b)) => a.compatible(b),
            _ => false,
        }
    }

    /// Least upper bound of two types under widening, when one exists.
    pub fn sup(&self, other: &FieldType) -> Option<FieldType> {
        if self.compatible(other) {
            return Some(other.clone());
        }
        if other.compatible(self) {
            return Some(self.clone());
        }
        match (self.numeric_rank(), other.numeric_rank()) {
            (Some(ra), Some(rb)) => Some(if ra >= rb {
                self.clone()
            } else {
                other.clone()
            }),
            _ => None,
        }
    }

    /// Returns true if this type carries more information than raw bytes.
    pub fn is_stronger_than_bytearray(&self) -> bool {
        !matches!(self, FieldType::ByteArray)
    }

    /// Returns true for the numeric widening chain.
    pub fn is_numeric(&self) -> bool {
        self.numeric_rank().is_some()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::ByteArray => write!(f, "bytearray"),
            FieldType::Int => write!(f, "int"),
            FieldType::Long => write!(f, "long"),
            FieldType::Float => write!(f, "float"),
            FieldType::Double => write!(f, "double"),
            FieldType::CharArray => write!(f, "chararray"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::DateTime => write!(f, "datetime"),
            FieldType::Tuple(t) => write!(f, "tuple{}", t),
            FieldType::Bag(b) => write!(f, "bag{{{}}}", b.tuple()),
            FieldType::Map(v) => write!(f, "map[{}]", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, TupleType};

    #[test]
    fn numeric_widening() {
        assert!(FieldType::Int.compatible(&FieldType::Long));
        assert!(FieldType::Int.compatible(&FieldType::Double));
        assert!(!FieldType::Double.compatible(&FieldType::Int));
        assert!(FieldType::Int.compatible(&FieldType::Int));
    }

    #[test]
    fn bytearray_is_bottom() {
        for t in [FieldType::Int, FieldType::CharArray, FieldType::Boolean] {
            assert!(FieldType::ByteArray.compatible(&t));
            assert!(!t.compatible(&FieldType::ByteArray));
        }
    }

    #[test]
    fn chararray_is_its_own_chain() {
        assert!(!FieldType::CharArray.compatible(&FieldType::Int));
        assert!(!FieldType::Int.compatible(&FieldType::CharArray));
    }

    #[test]
    fn tuples_compare_by_position_not_name() {
        let a = FieldType::Tuple(TupleType::new(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Int),
        ]));
        let b = FieldType::Tuple(TupleType::new(vec![
            Field::new("u", FieldType::Long),
            Field::new("v", FieldType::Int),
        ]));
        assert!(a.compatible(&b));
        assert!(!b.compatible(&a));
    }

    #[test]
    fn sup_picks_wider_type() {
        assert_eq!(
            FieldType::Int.sup(&FieldType::Double),
            Some(FieldType::Double)
        );
        assert_eq!(FieldType::CharArray.sup(&FieldType::Int), None);
    }
}
