//! Schema model: bags of tuples with named, typed fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::FieldType;

/// A named, typed field of a tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    ftype: FieldType,
}

impl Field {
    pub fn new(name: &str, ftype: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ftype,
        }
    }

    /// An anonymous field holding raw bytes.
    pub fn anonymous() -> Self {
        Self::new("", FieldType::ByteArray)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ftype(&self) -> &FieldType {
        &self.ftype
    }

    /// Replace the field type, used when refining an under-typed field.
    pub fn set_ftype(&mut self, ftype: FieldType) {
        self.ftype = ftype;
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.ftype)
        } else {
            write!(f, "{}: {}", self.name, self.ftype)
        }
    }
}

/// An ordered list of named, typed fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TupleType {
    fields: Vec<Field>,
}

impl TupleType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Positionwise widening compatibility; field names are ignored.
    pub fn compatible(&self, other: &TupleType) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.ftype.compatible(&b.ftype))
    }
}

impl fmt::Display for TupleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, ")")
    }
}

/// A bag of tuples, the carrier type of every pipe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BagType {
    tuple: TupleType,
}

impl BagType {
    pub fn new(tuple: TupleType) -> Self {
        Self { tuple }
    }

    pub fn tuple(&self) -> &TupleType {
        &self.tuple
    }

    pub fn tuple_mut(&mut self) -> &mut TupleType {
        &mut self.tuple
    }
}

/// The schema of an operator output: a bag wrapping a tuple type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    bag: BagType,
}

impl Schema {
    pub fn new(bag: BagType) -> Self {
        Self { bag }
    }

    /// Convenience constructor from a plain field list.
    pub fn from_fields(fields: Vec<Field>) -> Self {
        Self::new(BagType::new(TupleType::new(fields)))
    }

    pub fn bag(&self) -> &BagType {
        &self.bag
    }

    pub fn fields(&self) -> &[Field] {
        self.bag.tuple().fields()
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        self.bag.tuple_mut().fields_mut()
    }

    pub fn arity(&self) -> usize {
        self.bag.tuple().arity()
    }

    /// Look up a field by name, returning its position and definition.
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields()
            .iter()
            .enumerate()
            .find(|(_, f)| f.name() == name)
    }

    /// Look up a field by position.
    pub fn field_at(&self, pos: usize) -> Option<&Field> {
        self.fields().get(pos)
    }

    /// Positionwise widening compatibility with another schema.
    pub fn compatible(&self, other: &Schema) -> bool {
        self.bag.tuple().compatible(other.bag.tuple())
    }

    /// Canonical rendering used to derive emitted schema class names.
    ///
    /// Identical field layouts produce identical strings regardless of where
    /// in the plan the schema appears.
    pub fn signature_string(&self) -> String {
        let mut out = String::from("{");
        for (i, field) in self.fields().iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("{}:{}", field.name(), field.ftype()));
        }
        out.push('}');
        out
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bag.tuple())
    }
}
