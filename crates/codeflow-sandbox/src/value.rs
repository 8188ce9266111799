//! Runtime values and coercions for the script dialect. Semantics follow
//! the loose-typing rules user scripts expect: strings coerce to numbers in
//! arithmetic contexts, bitwise operators truncate through a 32-bit
//! integer, `+` concatenates when either side is a string.

use crate::ast::ArrowFn;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
pub struct ObjectData {
    pub entries: Vec<(String, Value)>,
    /// Frozen objects reject writes; job inputs are frozen on construction.
    pub frozen: bool,
}

#[derive(Debug)]
pub struct ArrayData {
    pub items: Vec<Value>,
    pub frozen: bool,
}

/// A compiled regular expression plus the flags it was built from.
#[derive(Debug)]
pub struct RegexData {
    pub source: String,
    pub flags: String,
    /// The `g` flag; changes `match` and `replace` semantics.
    pub global: bool,
    pub regex: regex::Regex,
}

pub type NativeFn =
    fn(&mut crate::interp::Interp, &[Value]) -> Result<Value, crate::interp::Flow>;

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Rc<RefCell<ArrayData>>),
    Object(Rc<RefCell<ObjectData>>),
    RegExp(Rc<RegexData>),
    Arrow(Rc<ArrowFn>),
    Native { name: &'static str, f: NativeFn },
}

impl Value {
    pub fn object(entries: Vec<(String, Value)>) -> Self {
        Value::Object(Rc::new(RefCell::new(ObjectData {
            entries,
            frozen: false,
        })))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(ArrayData {
            items,
            frozen: false,
        })))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::RegExp(_) => "object",
            Value::Arrow(_) | Value::Native { .. } => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Truncation through a signed 32-bit integer, as bitwise operators do.
    pub fn to_i32(&self) -> i32 {
        let n = self.to_number();
        if !n.is_finite() {
            return 0;
        }
        let t = n.trunc();
        let m = ((t % 4294967296.0) + 4294967296.0) % 4294967296.0;
        if m >= 2147483648.0 {
            (m - 4294967296.0) as i32
        } else {
            m as i32
        }
    }

    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.items.iter().map(|v| v.to_display()).collect();
                parts.join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::RegExp(data) => format!("/{}/{}", data.source, data.flags),
            Value::Arrow(_) | Value::Native { .. } => "[function]".to_string(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::RegExp(a), Value::RegExp(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Loose equality: numbers and strings compare by numeric value,
    /// null and undefined are mutually equal.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            _ => self.strict_equals(other),
        }
    }

    /// Approximate retained size, charged against the allocation budget.
    pub fn shallow_size(&self) -> usize {
        match self {
            Value::Str(s) => s.len() + 24,
            Value::Array(items) => items.borrow().items.len() * 16 + 32,
            Value::Object(obj) => obj.borrow().entries.len() * 48 + 32,
            Value::RegExp(data) => data.source.len() + 64,
            _ => 16,
        }
    }
}

/// Number formatting: integral values print without a decimal point.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Convert job JSON into runtime values. `frozen` makes every nested object
/// and array read-only.
pub fn from_json(json: &JsonValue, frozen: bool) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(items) => {
            let items: Vec<Value> = items.iter().map(|v| from_json(v, frozen)).collect();
            Value::Array(Rc::new(RefCell::new(ArrayData { items, frozen })))
        }
        JsonValue::Object(map) => {
            let entries: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), from_json(v, frozen)))
                .collect();
            Value::Object(Rc::new(RefCell::new(ObjectData { entries, frozen })))
        }
    }
}

/// Convert a runtime value back to JSON (for `JSON.stringify` and result
/// shaping). Functions serialize as null, like JSON.stringify does inside
/// arrays.
pub fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Undefined | Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Array(items) => {
            JsonValue::Array(items.borrow().items.iter().map(to_json).collect())
        }
        Value::Object(obj) => {
            let mut map = serde_json::Map::new();
            for (k, v) in &obj.borrow().entries {
                map.insert(k.clone(), to_json(v));
            }
            JsonValue::Object(map)
        }
        // JSON.stringify of a regex yields an empty object, like it does
        // for any object without enumerable properties.
        Value::RegExp(_) => JsonValue::Object(serde_json::Map::new()),
        Value::Arrow(_) | Value::Native { .. } => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_number_coercion() {
        assert_eq!(Value::Str("2".into()).to_number(), 2.0);
        assert_eq!(Value::Str("  3.5 ".into()).to_number(), 3.5);
        assert!(Value::Str("abc".into()).to_number().is_nan());
        assert_eq!(Value::Str("".into()).to_number(), 0.0);
    }

    #[test]
    fn i32_truncation() {
        assert_eq!(Value::Str("2".into()).to_i32(), 2);
        assert_eq!(Value::Number(2.9).to_i32(), 2);
        assert_eq!(Value::Number(-2.9).to_i32(), -2);
        assert_eq!(Value::Number(f64::NAN).to_i32(), 0);
        assert_eq!(Value::Number(4294967298.0).to_i32(), 2);
    }

    #[test]
    fn loose_vs_strict() {
        assert!(Value::Number(2.0).loose_equals(&Value::Str("2".into())));
        assert!(!Value::Number(2.0).strict_equals(&Value::Str("2".into())));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
    }

    #[test]
    fn frozen_propagates_deeply() {
        let v = from_json(&json!({"a": {"b": [1, 2]}}), true);
        let Value::Object(obj) = &v else { panic!() };
        assert!(obj.borrow().frozen);
        let Value::Object(inner) = obj.borrow().entries[0].1.clone() else {
            panic!()
        };
        assert!(inner.borrow().frozen);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(5.5), "5.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }
}
