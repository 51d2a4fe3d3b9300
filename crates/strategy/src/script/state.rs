use std::collections::BTreeMap;

use serde::Serialize;

use super::ast::{Literal, StateDecl};

/// Scalar that survives between bars.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    None,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl StateValue {
    fn kind(&self) -> &'static str {
        match self {
            StateValue::None => "none",
            StateValue::Bool(_) => "bool",
            StateValue::Number(_) => "number",
            StateValue::Str(_) => "string",
        }
    }
}

impl From<&Literal> for StateValue {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::None => StateValue::None,
            Literal::Bool(b) => StateValue::Bool(*b),
            Literal::Number(n) => StateValue::Number(*n),
            Literal::Str(s) => StateValue::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    initial: StateValue,
    current: StateValue,
}

/// Typed key-value store backing `state.<key>`.
///
/// Keys are stored under the `user.` namespace. A slot keeps the type of its
/// declared initial value; `none` can always be assigned, and a slot declared
/// as `none` accepts any type.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    slots: BTreeMap<String, Slot>,
}

const NAMESPACE: &str = "user.";

fn key(name: &str) -> String {
    format!("{NAMESPACE}{name}")
}

impl StateStore {
    pub fn from_decls(decls: &[StateDecl]) -> Self {
        let slots = decls
            .iter()
            .map(|d| {
                let value = StateValue::from(&d.init);
                (
                    key(&d.name),
                    Slot {
                        initial: value.clone(),
                        current: value,
                    },
                )
            })
            .collect();
        Self { slots }
    }

    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.slots.get(&key(name)).map(|s| &s.current)
    }

    pub fn set(&mut self, name: &str, value: StateValue) -> Result<(), String> {
        let slot = self
            .slots
            .get_mut(&key(name))
            .ok_or_else(|| format!("unknown state key '{name}'"))?;
        let typed = slot.initial != StateValue::None;
        if typed && value != StateValue::None && value.kind() != slot.initial.kind() {
            return Err(format!(
                "state '{name}' holds {} values, cannot store {}",
                slot.initial.kind(),
                value.kind()
            ));
        }
        slot.current = value;
        Ok(())
    }

    /// Restore every slot to its declared initial value.
    pub fn reset(&mut self) {
        for slot in self.slots.values_mut() {
            slot.current = slot.initial.clone();
        }
    }

    /// Namespaced keys and current values, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, StateValue)> {
        self.slots
            .iter()
            .map(|(k, s)| (k.clone(), s.current.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, init: Literal) -> StateDecl {
        StateDecl {
            name: name.into(),
            init,
            line: 1,
            column: 1,
        }
    }

    #[test]
    fn typed_slots_reject_other_types() {
        let mut store = StateStore::from_decls(&[decl("count", Literal::Number(0.0))]);
        store.set("count", StateValue::Number(3.0)).unwrap();
        assert!(store.set("count", StateValue::Bool(true)).is_err());
        store.set("count", StateValue::None).unwrap();
        assert_eq!(store.get("count"), Some(&StateValue::None));
    }

    #[test]
    fn none_declared_slot_accepts_anything() {
        let mut store = StateStore::from_decls(&[decl("last", Literal::None)]);
        store.set("last", StateValue::Str("buy".into())).unwrap();
        store.set("last", StateValue::Number(1.0)).unwrap();
    }

    #[test]
    fn reset_restores_initial_values_and_keys_are_namespaced() {
        let mut store = StateStore::from_decls(&[decl("armed", Literal::Bool(false))]);
        store.set("armed", StateValue::Bool(true)).unwrap();
        store.reset();
        assert_eq!(
            store.snapshot(),
            vec![("user.armed".to_string(), StateValue::Bool(false))]
        );
    }
}
