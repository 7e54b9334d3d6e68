//! Expression trees used by predicates, generators, and key lists.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SchemaError;
use crate::schema::{Field, Schema};
use crate::types::FieldType;

/// A literal constant appearing in a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Literal {
    Int(i32),
    Long(i64),
    Double(f64),
    Chars(String),
    Boolean(bool),
}

impl Literal {
    pub fn ftype(&self) -> FieldType {
        match self {
            Literal::Int(_) => FieldType::Int,
            Literal::Long(_) => FieldType::Long,
            Literal::Double(_) => FieldType::Double,
            Literal::Chars(_) => FieldType::CharArray,
            Literal::Boolean(_) => FieldType::Boolean,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Long(v) => write!(f, "{}L", v),
            Literal::Double(v) => write!(f, "{}", v),
            Literal::Chars(v) => write!(f, "\"{}\"", v),
            Literal::Boolean(v) => write!(f, "{}", v),
        }
    }
}

/// A reference to a value inside the current tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ref {
    /// Field addressed by name; requires a known schema.
    Named(String),
    /// Field addressed by zero-based position.
    Positional(usize),
    /// A literal constant.
    Value(Literal),
    /// Component of a tuple-valued field, e.g. `g.x`.
    DerefTuple(Box<Ref>, Box<Ref>),
    /// Value of a map-valued field under a key, e.g. `m#'k'`.
    DerefMap(Box<Ref>, String),
}

impl Ref {
    pub fn named(name: &str) -> Self {
        Ref::Named(name.to_string())
    }

    /// Resolve the type this reference produces against an optional schema.
    pub fn result_type(&self, schema: Option<&Schema>) -> Result<FieldType, SchemaError> {
        match self {
            Ref::Named(name) => match schema {
                Some(s) => s
                    .field(name)
                    .map(|(_, f)| f.ftype().clone())
                    .ok_or_else(|| {
                        SchemaError::UnresolvedField(name.clone(), s.signature_string())
                    }),
                None => Err(SchemaError::NamedFieldWithoutSchema(name.clone())),
            },
            Ref::Positional(pos) => match schema {
                Some(s) => s
                    .field_at(*pos)
                    .map(|f| f.ftype().clone())
                    .ok_or_else(|| SchemaError::PositionOutOfRange(*pos, s.signature_string())),
                // Positional access into an unknown schema reads raw bytes.
                None => Ok(FieldType::ByteArray),
            },
            Ref::Value(lit) => Ok(lit.ftype()),
            Ref::DerefTuple(base, component) => {
                let base_type = base.result_type(schema)?;
                let tuple = match &base_type {
                    FieldType::Tuple(t) => t.clone(),
                    FieldType::Bag(b) => b.tuple().clone(),
                    FieldType::ByteArray => return Ok(FieldType::ByteArray),
                    other => return Err(SchemaError::NotComposite(other.to_string())),
                };
                let inner = Schema::from_fields(tuple.fields().to_vec());
                component.result_type(Some(&inner))
            }
            Ref::DerefMap(base, _) => match base.result_type(schema)? {
                FieldType::Map(value) => Ok(*value),
                FieldType::ByteArray => Ok(FieldType::ByteArray),
                other => Err(SchemaError::NotComposite(other.to_string())),
            },
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Named(name) => write!(f, "{}", name),
            Ref::Positional(pos) => write!(f, "${}", pos),
            Ref::Value(lit) => write!(f, "{}", lit),
            Ref::DerefTuple(base, component) => write!(f, "{}.{}", base, component),
            Ref::DerefMap(base, key) => write!(f, "{}#'{}'", base, key),
        }
    }
}

/// An arithmetic or function expression over references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Ref(Ref),
    Cast(Box<Expr>, FieldType),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    /// UDF or builtin invocation; the result type is opaque.
    Func(String, Vec<Expr>),
    /// Unnests a bag-valued expression into the surrounding tuple.
    Flatten(Box<Expr>),
}

impl Expr {
    pub fn named(name: &str) -> Self {
        Expr::Ref(Ref::named(name))
    }

    /// Resolve the result type of this expression against an optional schema.
    pub fn result_type(&self, schema: Option<&Schema>) -> Result<FieldType, SchemaError> {
        match self {
            Expr::Ref(r) => r.result_type(schema),
            Expr::Cast(_, ftype) => Ok(ftype.clone()),
            Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) | Expr::Div(l, r) => {
                let lt = l.result_type(schema)?;
                let rt = r.result_type(schema)?;
                lt.sup(&rt)
                    .ok_or_else(|| SchemaError::TypeMismatch(lt.to_string(), rt.to_string()))
            }
            // Function results are unknown until runtime.
            Expr::Func(_, _) => Ok(FieldType::ByteArray),
            Expr::Flatten(inner) => match inner.result_type(schema)? {
                FieldType::Bag(b) => Ok(FieldType::Tuple(b.tuple().clone())),
                other => Ok(other),
            },
        }
    }

    /// Verify every reference in the expression resolves against `schema`.
    pub fn check(&self, schema: Option<&Schema>) -> Result<(), SchemaError> {
        self.result_type(schema).map(|_| ())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ref(r) => write!(f, "{}", r),
            Expr::Cast(e, t) => write!(f, "({}){}", t, e),
            Expr::Add(l, r) => write!(f, "{} + {}", l, r),
            Expr::Sub(l, r) => write!(f, "{} - {}", l, r),
            Expr::Mul(l, r) => write!(f, "{} * {}", l, r),
            Expr::Div(l, r) => write!(f, "{} / {}", l, r),
            Expr::Func(name, args) => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::Flatten(e) => write!(f, "FLATTEN({})", e),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
}

impl CmpOp {
    /// Render the operator in emitted target code.
    pub fn target_token(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Neq => "!=",
            CmpOp::Lt => "<",
            CmpOp::Leq => "<=",
            CmpOp::Gt => ">",
            CmpOp::Geq => ">=",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target_token())
    }
}

/// Boolean predicate over expressions, as written in FILTER and SPLIT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    Cmp(CmpOp, Expr, Expr),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Paren(Box<Predicate>),
}

impl Predicate {
    /// Conjunction of two predicates, parenthesizing both sides.
    pub fn and(left: Predicate, right: Predicate) -> Predicate {
        Predicate::And(
            Box::new(Predicate::Paren(Box::new(left))),
            Box::new(Predicate::Paren(Box::new(right))),
        )
    }

    /// Verify every reference in the predicate resolves against `schema`.
    pub fn check(&self, schema: Option<&Schema>) -> Result<(), SchemaError> {
        match self {
            Predicate::Cmp(_, l, r) => {
                l.check(schema)?;
                r.check(schema)
            }
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.check(schema)?;
                r.check(schema)
            }
            Predicate::Not(p) | Predicate::Paren(p) => p.check(schema),
        }
    }

    /// All field names referenced anywhere in the predicate.
    pub fn referenced_fields(&self) -> Vec<String> {
        fn walk_expr(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::Ref(Ref::Named(name)) => out.push(name.clone()),
                Expr::Ref(Ref::DerefTuple(base, _)) | Expr::Ref(Ref::DerefMap(base, _)) => {
                    if let Ref::Named(name) = base.as_ref() {
                        out.push(name.clone());
                    }
                }
                Expr::Ref(_) => {}
                Expr::Cast(e, _) | Expr::Flatten(e) => walk_expr(e, out),
                Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) | Expr::Div(l, r) => {
                    walk_expr(l, out);
                    walk_expr(r, out);
                }
                Expr::Func(_, args) => args.iter().for_each(|a| walk_expr(a, out)),
            }
        }
        fn walk(pred: &Predicate, out: &mut Vec<String>) {
            match pred {
                Predicate::Cmp(_, l, r) => {
                    walk_expr(l, out);
                    walk_expr(r, out);
                }
                Predicate::And(l, r) | Predicate::Or(l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                Predicate::Not(p) | Predicate::Paren(p) => walk(p, out),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Cmp(op, l, r) => write!(f, "{} {} {}", l, op, r),
            Predicate::And(l, r) => write!(f, "{} AND {}", l, r),
            Predicate::Or(l, r) => write!(f, "{} OR {}", l, r),
            Predicate::Not(p) => write!(f, "NOT {}", p),
            Predicate::Paren(p) => write!(f, "({})", p),
        }
    }
}

/// A single `GENERATE` item: an expression with an optional declared alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorExpr {
    pub expr: Expr,
    pub alias: Option<Field>,
}

impl GeneratorExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(expr: Expr, alias: Field) -> Self {
        Self {
            expr,
            alias: Some(alias),
        }
    }

    /// Derive the output field for this generator item.
    ///
    /// A declared alias is honored when its type is stronger than bytearray;
    /// otherwise the type is refined by evaluating the expression against the
    /// input schema. Unnamed items synthesize a positional field name.
    pub fn output_field(
        &self,
        input: Option<&Schema>,
        position: usize,
    ) -> Result<Field, SchemaError> {
        let inferred = self.expr.result_type(input)?;
        match &self.alias {
            Some(declared) if declared.ftype().is_stronger_than_bytearray() => {
                Ok(declared.clone())
            }
            Some(declared) => Ok(Field::new(declared.name(), inferred)),
            None => {
                let name = match &self.expr {
                    Expr::Ref(Ref::Named(n)) => n.clone(),
                    _ => format!("f{}", position),
                };
                Ok(Field::new(&name, inferred))
            }
        }
    }
}

impl fmt::Display for GeneratorExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.expr, alias),
            None => write!(f, "{}", self.expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn xy() -> Schema {
        Schema::from_fields(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Double),
        ])
    }

    #[test]
    fn ref_resolution() {
        let s = xy();
        assert_eq!(
            Ref::named("x").result_type(Some(&s)).unwrap(),
            FieldType::Int
        );
        assert_eq!(
            Ref::Positional(1).result_type(Some(&s)).unwrap(),
            FieldType::Double
        );
        assert!(matches!(
            Ref::named("z").result_type(Some(&s)),
            Err(SchemaError::UnresolvedField(_, _))
        ));
    }

    #[test]
    fn named_ref_requires_schema() {
        assert!(matches!(
            Ref::named("x").result_type(None),
            Err(SchemaError::NamedFieldWithoutSchema(_))
        ));
        // Positional access is allowed against an unknown schema.
        assert_eq!(
            Ref::Positional(3).result_type(None).unwrap(),
            FieldType::ByteArray
        );
    }

    #[test]
    fn arithmetic_widens() {
        let s = xy();
        let e = Expr::Add(Box::new(Expr::named("x")), Box::new(Expr::named("y")));
        assert_eq!(e.result_type(Some(&s)).unwrap(), FieldType::Double);
    }

    #[test]
    fn predicate_display_and_merge() {
        let p1 = Predicate::Cmp(CmpOp::Gt, Expr::named("x"), Expr::Ref(Ref::Value(Literal::Int(0))));
        let p2 = Predicate::Cmp(CmpOp::Lt, Expr::named("y"), Expr::Ref(Ref::Value(Literal::Int(5))));
        let merged = Predicate::and(p1, p2);
        assert_eq!(merged.to_string(), "(x > 0) AND (y < 5)");
    }

    #[test]
    fn referenced_fields_walks_the_tree() {
        let p = Predicate::and(
            Predicate::Cmp(CmpOp::Gt, Expr::named("x"), Expr::named("y")),
            Predicate::Not(Box::new(Predicate::Cmp(
                CmpOp::Eq,
                Expr::named("z"),
                Expr::Ref(Ref::Value(Literal::Int(1))),
            ))),
        );
        assert_eq!(p.referenced_fields(), vec!["x", "y", "z"]);
    }

    #[test]
    fn generator_alias_rules() {
        let s = xy();
        // Declared alias with a strong type wins.
        let g = GeneratorExpr::with_alias(Expr::named("x"), Field::new("a", FieldType::Long));
        assert_eq!(
            g.output_field(Some(&s), 0).unwrap(),
            Field::new("a", FieldType::Long)
        );
        // Bytearray alias is refined from the expression.
        let g = GeneratorExpr::with_alias(Expr::named("x"), Field::new("a", FieldType::ByteArray));
        assert_eq!(
            g.output_field(Some(&s), 0).unwrap(),
            Field::new("a", FieldType::Int)
        );
        // No alias: name inherited from the reference.
        let g = GeneratorExpr::new(Expr::named("y"));
        assert_eq!(
            g.output_field(Some(&s), 0).unwrap(),
            Field::new("y", FieldType::Double)
        );
        // No alias, no obvious name: synthesized from the position.
        let g = GeneratorExpr::new(Expr::Add(
            Box::new(Expr::named("x")),
            Box::new(Expr::named("x")),
        ));
        assert_eq!(
            g.output_field(Some(&s), 2).unwrap(),
            Field::new("f2", FieldType::Int)
        );
    }
}
