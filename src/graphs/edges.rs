//! Edge typing: schemas and signatures checked at wiring time.
//!
//! Every edge carries a [`Schema`] describing the positional payload shape
//! flowing across it. Wiring a producer to a consumer checks the producer's
//! output schema against the consumer's declared input; mismatches are
//! rejected immediately rather than surfacing as runtime type errors.

use std::fmt;

use crate::value::ValueKind;

/// Positional payload shape carried by an edge.
///
/// `Any` is used by structural nodes (Queue, Sequencer, Broadcast, joins)
/// that relay payloads without inspecting them; it is compatible with every
/// fixed schema and adopts the shape of whatever flows through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schema {
    /// Exactly these kinds, in order.
    Fixed(Vec<ValueKind>),
    /// Shape-agnostic; accepts and relays any payload.
    Any,
}

impl Schema {
    /// Schema of a single-element payload.
    #[must_use]
    pub fn single(kind: ValueKind) -> Self {
        Self::Fixed(vec![kind])
    }

    /// Whether a payload of shape `other` may flow into this schema.
    #[must_use]
    pub fn accepts(&self, other: &Schema) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Fixed(a), Self::Fixed(b)) => a == b,
        }
    }

    /// The fixed kinds, if this schema is fixed.
    #[must_use]
    pub fn kinds(&self) -> Option<&[ValueKind]> {
        match self {
            Self::Fixed(kinds) => Some(kinds),
            Self::Any => None,
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "(any)"),
            Self::Fixed(kinds) => {
                write!(f, "(")?;
                for (i, kind) in kinds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{kind}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<Vec<ValueKind>> for Schema {
    fn from(kinds: Vec<ValueKind>) -> Self {
        Self::Fixed(kinds)
    }
}

/// Declared input/output shape of a Function node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub inputs: Schema,
    pub outputs: Schema,
}

impl Signature {
    #[must_use]
    pub fn new(inputs: impl Into<Schema>, outputs: impl Into<Schema>) -> Self {
        Self {
            inputs: inputs.into(),
            outputs: outputs.into(),
        }
    }

    /// `Int -> Int`, the most common shape in simple pipelines.
    #[must_use]
    pub fn int_to_int() -> Self {
        Self::new(
            Schema::single(ValueKind::Int),
            Schema::single(ValueKind::Int),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_is_universally_compatible() {
        let fixed = Schema::single(ValueKind::Float);
        assert!(Schema::Any.accepts(&fixed));
        assert!(fixed.accepts(&Schema::Any));
        assert!(Schema::Any.accepts(&Schema::Any));
    }

    #[test]
    fn fixed_schemas_must_match_exactly() {
        let a = Schema::Fixed(vec![ValueKind::Int, ValueKind::Str]);
        let b = Schema::Fixed(vec![ValueKind::Int, ValueKind::Str]);
        let c = Schema::Fixed(vec![ValueKind::Str, ValueKind::Int]);
        assert!(a.accepts(&b));
        assert!(!a.accepts(&c));
        assert!(!a.accepts(&Schema::single(ValueKind::Int)));
    }

    #[test]
    fn display_shapes() {
        assert_eq!(Schema::Any.to_string(), "(any)");
        assert_eq!(
            Schema::Fixed(vec![ValueKind::Int, ValueKind::Float]).to_string(),
            "(int, float)"
        );
    }
}
