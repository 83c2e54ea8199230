// houndb - filter.rs
// Boolean predicates over record attributes.
//
// A `Predicate` is plain data (serde-friendly, schema-agnostic). Binding it to
// a schema with `Filter::compile` performs every check up front, so evaluating
// a compiled `Filter` against a conforming record can never fail.

use std::ops::Not;

use serde::{Deserialize, Serialize};

use crate::record::{Record, Value};
use crate::schema::{DataType, Schema};
use crate::{HoundError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        attribute: String,
        op: Comparison,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Leaf builder: `Predicate::field("weight").less_than(60.0)`.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
}

impl Field {
    fn compare(self, op: Comparison, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            attribute: self.name,
            op,
            value: value.into(),
        }
    }

    pub fn equals(self, value: impl Into<Value>) -> Predicate {
        self.compare(Comparison::Equals, value)
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Predicate {
        self.compare(Comparison::NotEquals, value)
    }

    pub fn less_than(self, value: impl Into<Value>) -> Predicate {
        self.compare(Comparison::LessThan, value)
    }

    pub fn greater_than(self, value: impl Into<Value>) -> Predicate {
        self.compare(Comparison::GreaterThan, value)
    }

    pub fn contains(self, value: impl Into<Value>) -> Predicate {
        self.compare(Comparison::Contains, value)
    }
}

impl Predicate {
    pub fn field(name: impl Into<String>) -> Field {
        Field { name: name.into() }
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) => {
                a.push(p);
                Predicate::And(a)
            }
            (p, Predicate::And(mut b)) => {
                b.insert(0, p);
                Predicate::And(b)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// Disjunction, flattening nested `Or`s.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut a), Predicate::Or(b)) => {
                a.extend(b);
                Predicate::Or(a)
            }
            (Predicate::Or(mut a), p) => {
                a.push(p);
                Predicate::Or(a)
            }
            (p, Predicate::Or(mut b)) => {
                b.insert(0, p);
                Predicate::Or(b)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    pub fn negate(self) -> Predicate {
        match self {
            Predicate::Not(inner) => *inner,
            p => Predicate::Not(Box::new(p)),
        }
    }

    fn check(&self, schema: &Schema) -> Result<()> {
        match self {
            Predicate::Compare {
                attribute,
                op,
                value,
            } => {
                let attr = schema
                    .get(attribute)
                    .ok_or_else(|| HoundError::UnknownAttribute {
                        name: attribute.clone(),
                    })?;
                if attr.data_type == DataType::Blob {
                    return Err(HoundError::schema(attribute, "BLOB attributes cannot be filtered"));
                }
                if value.data_type() != attr.data_type {
                    return Err(HoundError::schema(
                        attribute,
                        format!("literal is {}, attribute is {}", value.data_type(), attr.data_type),
                    ));
                }
                if *op == Comparison::Contains && attr.data_type != DataType::Text {
                    return Err(HoundError::schema(attribute, "contains needs a TEXT attribute"));
                }
                if let Value::Number(n) = value {
                    if !n.is_finite() {
                        return Err(HoundError::schema(attribute, "literal must be finite"));
                    }
                }
                Ok(())
            }
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().try_for_each(|c| c.check(schema))
            }
            Predicate::Not(inner) => inner.check(schema),
        }
    }

    fn eval(&self, record: &Record) -> bool {
        match self {
            Predicate::Compare {
                attribute,
                op,
                value,
            } => compare(record.property(attribute), *op, value),
            Predicate::And(children) => children.iter().all(|c| c.eval(record)),
            Predicate::Or(children) => children.iter().any(|c| c.eval(record)),
            Predicate::Not(inner) => !inner.eval(record),
        }
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        self.negate()
    }
}

/// Missing attributes satisfy only `NotEquals`.
fn compare(actual: Option<&Value>, op: Comparison, literal: &Value) -> bool {
    let Some(actual) = actual else {
        return op == Comparison::NotEquals;
    };
    match op {
        Comparison::Equals => actual == literal,
        Comparison::NotEquals => actual != literal,
        Comparison::LessThan | Comparison::GreaterThan => {
            let ordering = match (actual, literal) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match (op, ordering) {
                (Comparison::LessThan, Some(std::cmp::Ordering::Less)) => true,
                (Comparison::GreaterThan, Some(std::cmp::Ordering::Greater)) => true,
                _ => false,
            }
        }
        Comparison::Contains => match (actual, literal) {
            (Value::Text(a), Value::Text(b)) => a.contains(b.as_str()),
            _ => false,
        },
    }
}

/// A predicate checked against one schema.
#[derive(Debug, Clone)]
pub struct Filter {
    predicate: Predicate,
}

impl Filter {
    /// # Errors
    /// `UnknownAttribute` for an attribute missing from `schema`;
    /// `SchemaViolation` for a literal or operator that does not fit the
    /// attribute's type.
    pub fn compile(schema: &Schema, predicate: Predicate) -> Result<Self> {
        predicate.check(schema)?;
        Ok(Self { predicate })
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.predicate.eval(record)
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BlobRef, Properties, RecordId};
    use crate::schema::Attribute;

    fn schema() -> Schema {
        Schema::new(vec![
            Attribute::new("breed", DataType::Text),
            Attribute::new("weight", DataType::Number),
            Attribute::new("image", DataType::Blob),
        ])
        .unwrap()
    }

    fn dog(breed: &str, weight: Option<f64>) -> Record {
        let mut properties = Properties::new();
        properties.insert("breed".into(), Value::Text(breed.into()));
        if let Some(w) = weight {
            properties.insert("weight".into(), Value::Number(w));
        }
        Record {
            id: RecordId::generate(),
            properties,
            vector: vec![0.0],
            blob: None,
        }
    }

    fn check(p: Predicate, rec: &Record) -> bool {
        Filter::compile(&schema(), p).unwrap().matches(rec)
    }

    #[test]
    fn test_comparisons() {
        let corgi = dog("Corgi", Some(26.0));
        assert!(check(Predicate::field("weight").less_than(60.0), &corgi));
        assert!(!check(Predicate::field("weight").greater_than(60.0), &corgi));
        assert!(check(Predicate::field("breed").equals("Corgi"), &corgi));
        assert!(check(Predicate::field("breed").not_equals("x"), &corgi));
        assert!(check(Predicate::field("breed").contains("org"), &corgi));
        assert!(check(Predicate::field("breed").less_than("Husky"), &corgi));
    }

    #[test]
    fn test_missing_attribute_semantics() {
        let mystery = dog("Mutt", None);
        assert!(!check(Predicate::field("weight").less_than(60.0), &mystery));
        assert!(!check(Predicate::field("weight").greater_than(60.0), &mystery));
        assert!(!check(Predicate::field("weight").equals(50.0), &mystery));
        assert!(check(Predicate::field("weight").not_equals(50.0), &mystery));
    }

    #[test]
    fn test_boolean_combinators() {
        let lab = dog("Labrador Retriever", Some(67.0));
        let heavy_retriever = Predicate::field("breed")
            .contains("Retriever")
            .and(Predicate::field("weight").greater_than(60.0));
        assert!(check(heavy_retriever.clone(), &lab));
        assert!(!check(!heavy_retriever, &lab));

        let either = Predicate::field("breed")
            .equals("Corgi")
            .or(Predicate::field("weight").greater_than(65.0));
        assert!(check(either, &lab));

        assert!(check(Predicate::And(vec![]), &lab));
        assert!(!check(Predicate::Or(vec![]), &lab));
    }

    #[test]
    fn test_and_flattens() {
        let p = Predicate::field("a")
            .equals(1.0)
            .and(Predicate::field("b").equals(2.0))
            .and(Predicate::field("c").equals(3.0));
        assert!(matches!(p, Predicate::And(ref v) if v.len() == 3));
        let twice = !!Predicate::field("a").equals(1.0);
        assert!(matches!(twice, Predicate::Compare { .. }));
    }

    #[test]
    fn test_unknown_attribute_fails_at_compile() {
        let err = Filter::compile(
            &schema(),
            Predicate::field("breed")
                .equals("Corgi")
                .and(Predicate::field("color").equals("red")),
        )
        .unwrap_err();
        assert!(matches!(err, HoundError::UnknownAttribute { ref name } if name == "color"));
    }

    #[test]
    fn test_type_errors_fail_at_compile() {
        let s = schema();
        assert!(matches!(
            Filter::compile(&s, Predicate::field("weight").less_than("sixty")),
            Err(HoundError::SchemaViolation { .. })
        ));
        assert!(matches!(
            Filter::compile(&s, Predicate::field("weight").contains(6.0)),
            Err(HoundError::SchemaViolation { .. })
        ));
        let blob = BlobRef { key: "k".into(), len: 1 };
        assert!(matches!(
            Filter::compile(&s, Predicate::field("image").equals(blob)),
            Err(HoundError::SchemaViolation { .. })
        ));
        assert!(matches!(
            Filter::compile(&s, Predicate::field("weight").less_than(f64::NAN)),
            Err(HoundError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_predicate_serde() {
        let p = Predicate::field("weight").less_than(60.0);
        let json = serde_json::to_string(&p).unwrap();
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
