use std::collections::HashMap;

use ecow::EcoString;
use rust_decimal::Decimal;

use crate::hlir::Value;

/// Storage for global variables, read and written only by executing forms.
///
/// The store is untyped; the binding context is what keeps reads and writes
/// of one name at one type.
pub trait GlobalStore {
    /// The stored value, or `None` when `name` was never set.
    fn try_get(&self, name: &str) -> Option<Value>;

    /// The stored value, or numeric zero when `name` was never set.
    fn get(&self, name: &str) -> Value {
        self.try_get(name)
            .unwrap_or(Value::Number(Decimal::ZERO))
    }

    /// Stores `value` and returns it.
    fn set(&mut self, name: &str, value: Value) -> Value;
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Globals {
    values: HashMap<EcoString, Value>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

impl GlobalStore for Globals {
    fn try_get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) -> Value {
        self.values.insert(name.into(), value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn absent_names_read_as_zero() {
        let globals = Globals::new();
        assert_eq!(globals.get("a"), Value::Number(Decimal::ZERO));
        assert_eq!(globals.try_get("a"), None);
        assert!(!globals.contains("a"));
    }

    #[test]
    fn set_overwrites_and_returns_the_value() {
        let mut globals = Globals::new();
        assert_eq!(globals.set("a", Value::Number(dec!(1))), Value::Number(dec!(1)));
        assert_eq!(
            globals.set("a", Value::Boolean(true)),
            Value::Boolean(true)
        );

        assert_eq!(globals.get("a"), Value::Boolean(true));
        assert_eq!(globals.len(), 1);
    }
}
