//! Runtime value types for records, expressions and index keys.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a persisted record: cluster (partition) id plus position.
///
/// Identities with a negative cluster or position are temporary and never
/// point at stored data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Rid {
    /// Cluster the record lives in.
    pub cluster: i32,
    /// Sequential position inside the cluster.
    pub position: i64,
}

impl Rid {
    /// Create a new record identity.
    pub const fn new(cluster: i32, position: i64) -> Self {
        Self { cluster, position }
    }

    /// Whether this identity addresses a stored record.
    pub fn is_persistent(&self) -> bool {
        self.cluster >= 0 && self.position >= 0
    }

    /// Parse the `#cluster:position` notation.
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.strip_prefix('#').unwrap_or(text);
        let (cluster, position) = body.split_once(':')?;
        Some(Self::new(cluster.parse().ok()?, position.parse().ok()?))
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

/// A runtime value.
///
/// Values have a total order used by sorting and by index keys: NULL first,
/// then booleans, numbers (integers and floats compare numerically), strings,
/// links, lists and maps. SQL comparisons ([`Value::sql_compare`]) are
/// stricter: NULL and values of different kinds are incomparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Link to another record.
    Link(Rid),
    /// Ordered collection.
    List(Vec<Value>),
    /// Embedded document.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64. Integral floats are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && (-TWO_POW_63..TWO_POW_63).contains(f) => {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    /// Try to get as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a record link.
    pub fn as_rid(&self) -> Option<Rid> {
        match self {
            Value::Link(rid) => Some(*rid),
            _ => None,
        }
    }

    /// Try to get as a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Human-readable type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Link(_) => "link",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Link(_) => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
        }
    }

    /// Whether [`Value::sql_compare`] can order these two values.
    pub fn is_comparable_with(&self, other: &Value) -> bool {
        !self.is_null() && !other.is_null() && self.rank() == other.rank()
    }

    /// SQL comparison: `None` when either side is NULL or the kinds differ.
    pub fn sql_compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_comparable_with(other) {
            Some(self.cmp(other))
        } else {
            None
        }
    }

    /// SQL equality: NULL is never equal to anything.
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.sql_compare(other) == Some(Ordering::Equal)
    }

    /// Truthiness used when an expression is used as a condition.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            _ => true,
        }
    }

    /// Apply an arithmetic operator.
    ///
    /// NULL operands produce NULL; `+` concatenates when either side is a
    /// string; integer overflow promotes to float.
    pub fn arithmetic(&self, op: ArithmeticOp, other: &Value) -> Result<Value> {
        if self.is_null() || other.is_null() {
            return Ok(Value::Null);
        }
        if op == ArithmeticOp::Add {
            if let (Value::String(_), _) | (_, Value::String(_)) = (self, other) {
                return Ok(Value::String(format!(
                    "{}{}",
                    self.to_plain_string(),
                    other.to_plain_string()
                )));
            }
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                let checked = match op {
                    ArithmeticOp::Add => a.checked_add(*b),
                    ArithmeticOp::Sub => a.checked_sub(*b),
                    ArithmeticOp::Mul => a.checked_mul(*b),
                    ArithmeticOp::Div | ArithmeticOp::Rem if *b == 0 => {
                        return Err(Error::DivisionByZero)
                    }
                    ArithmeticOp::Div => a.checked_div(*b),
                    ArithmeticOp::Rem => a.checked_rem(*b),
                };
                match checked {
                    Some(v) => Ok(Value::Int(v)),
                    None => Ok(Value::Float(op.apply_f64(*a as f64, *b as f64))),
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                Ok(Value::Float(op.apply_f64(x, y)))
            }
            (a, b) => Err(Error::TypeMismatch {
                op: op.symbol(),
                left: a.type_name(),
                right: b.type_name(),
            }),
        }
    }

    /// Render without SQL quoting (used for string concatenation).
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
}

impl ArithmeticOp {
    /// Operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Rem => "%",
        }
    }

    fn apply_f64(&self, a: f64, b: f64) -> f64 {
        match self {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Div => a / b,
            ArithmeticOp::Rem => a % b,
        }
    }
}

/// 2^63, the first float above every `i64`. Floats in `[-2^63, 2^63)`
/// truncate to an `i64` without saturating.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

fn cmp_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    if f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let truncated = f.trunc();
    match i.cmp(&(truncated as i64)) {
        Ordering::Equal if f > truncated => Ordering::Less,
        Ordering::Equal if f < truncated => Ordering::Greater,
        other => other,
    }
}

fn cmp_float(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => cmp_float(*a, *b),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Link(a), Value::Link(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => match Value::Float(*f).as_i64() {
                // integral floats hash like the equal integer
                Some(i) => i.hash(state),
                None if f.is_nan() => u64::MAX.hash(state),
                None => f.to_bits().hash(state),
            },
            Value::String(s) => s.hash(state),
            Value::Link(rid) => rid.hash(state),
            Value::List(items) => items.hash(state),
            Value::Map(map) => {
                for (k, v) in map {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Value::Link(rid) => write!(f, "{rid}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Rid> for Value {
    fn from(v: Rid) -> Self {
        Value::Link(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_rid_parse_and_display() {
        let rid = Rid::parse("#12:34").unwrap();
        assert_eq!(rid, Rid::new(12, 34));
        assert_eq!(rid.to_string(), "#12:34");
        assert!(rid.is_persistent());
        assert!(!Rid::new(-1, -2).is_persistent());
        assert!(Rid::parse("nonsense").is_none());
    }

    #[test]
    fn test_numeric_cross_type_ordering() {
        assert_eq!(Value::Int(1).cmp(&Value::Float(1.0)), Ordering::Equal);
        assert_eq!(Value::Int(1).cmp(&Value::Float(1.5)), Ordering::Less);
        assert_eq!(Value::Float(2.5).cmp(&Value::Int(2)), Ordering::Greater);
        assert_eq!(Value::Int(-3).cmp(&Value::Float(-2.5)), Ordering::Less);
        assert_eq!(Value::Float(-0.0).cmp(&Value::Int(0)), Ordering::Equal);
    }

    #[test]
    fn test_equal_numbers_hash_equally() {
        assert_eq!(hash_of(&Value::Int(7)), hash_of(&Value::Float(7.0)));
        assert_ne!(hash_of(&Value::Int(7)), hash_of(&Value::Float(7.5)));
    }

    #[test]
    fn test_floats_beyond_i64_range_do_not_saturate() {
        let above = Value::Float(9.25e18);
        assert_eq!(Value::Int(i64::MAX).cmp(&above), Ordering::Less);
        assert_eq!(above.cmp(&Value::Int(i64::MAX)), Ordering::Greater);
        assert_eq!(Value::Int(i64::MIN).cmp(&Value::Float(-9.25e18)), Ordering::Greater);

        let two_pow_63 = Value::Float(9_223_372_036_854_775_808.0);
        assert_ne!(two_pow_63, Value::Int(i64::MAX));
        assert_eq!(Value::Float(-9_223_372_036_854_775_808.0), Value::Int(i64::MIN));
        assert_eq!(
            hash_of(&Value::Float(-9_223_372_036_854_775_808.0)),
            hash_of(&Value::Int(i64::MIN))
        );

        // largest float below 2^63 is an exact integer
        let big = 9_223_372_036_854_774_784i64;
        assert_eq!(Value::Float(big as f64), Value::Int(big));
        assert_eq!(hash_of(&Value::Float(big as f64)), hash_of(&Value::Int(big)));
    }

    #[test]
    fn test_type_rank_ordering() {
        let mut values = vec![
            Value::String("a".into()),
            Value::Int(3),
            Value::Null,
            Value::Bool(true),
            Value::Link(Rid::new(1, 1)),
        ];
        values.sort();
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Bool(true));
        assert_eq!(values[2], Value::Int(3));
        assert_eq!(values[3], Value::String("a".into()));
    }

    #[test]
    fn test_sql_compare_rejects_null_and_mixed_kinds() {
        assert_eq!(Value::Null.sql_compare(&Value::Null), None);
        assert_eq!(Value::Int(1).sql_compare(&Value::String("1".into())), None);
        assert_eq!(
            Value::Int(1).sql_compare(&Value::Float(2.0)),
            Some(Ordering::Less)
        );
        assert!(!Value::Null.sql_eq(&Value::Null));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            Value::Int(2).arithmetic(ArithmeticOp::Add, &Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            Value::Int(7).arithmetic(ArithmeticOp::Div, &Value::Int(2)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            Value::Int(1).arithmetic(ArithmeticOp::Add, &Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            Value::String("a".into())
                .arithmetic(ArithmeticOp::Add, &Value::Int(1))
                .unwrap(),
            Value::String("a1".into())
        );
        assert!(Value::Int(1)
            .arithmetic(ArithmeticOp::Rem, &Value::Int(0))
            .is_err());
        assert!(Value::Null
            .arithmetic(ArithmeticOp::Mul, &Value::Int(3))
            .unwrap()
            .is_null());
        assert!(matches!(
            Value::Bool(true).arithmetic(ArithmeticOp::Sub, &Value::Int(1)),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_overflow_promotes_to_float() {
        let v = Value::Int(i64::MAX)
            .arithmetic(ArithmeticOp::Add, &Value::Int(1))
            .unwrap();
        assert!(matches!(v, Value::Float(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::String("it's".into()).to_string(), "'it\\'s'");
        assert_eq!(Value::from(vec![1, 2]).to_string(), "[1, 2]");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
    }
}
