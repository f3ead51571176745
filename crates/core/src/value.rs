use std::ops::Index;

use id_arena::{Arena, Id};
use rustc_hash::FxHashMap;

pub type ValueId = Id<Value>;

/// An edge of the graph. Values are addressed by name from signatures and bundles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value {
    pub name: String,
}

#[derive(Debug, Default, Clone)]
pub struct ValueArena {
    arena: Arena<Value>,
    by_name: FxHashMap<String, ValueId>,
}

impl ValueArena {
    /// Allocates a value with a generated name of the form `value.N`.
    pub fn new_val(&mut self) -> ValueId {
        let mut index = self.arena.len();
        loop {
            let name = format!("value.{index}");
            if !self.by_name.contains_key(&name) {
                return self.new_val_named(name);
            }
            index += 1;
        }
    }

    /// Returns the value named `name`, allocating it on first use.
    pub fn new_val_named(&mut self, name: impl Into<String>) -> ValueId {
        let name = name.into();
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        let id = self.arena.alloc(Value { name: name.clone() });
        self.by_name.insert(name, id);
        id
    }

    pub fn get(&self, name: &str) -> Option<ValueId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: ValueId) -> &str {
        &self.arena[id].name
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }
}

impl Index<ValueId> for ValueArena {
    type Output = Value;

    fn index(&self, index: ValueId) -> &Self::Output {
        &self.arena[index]
    }
}

#[test]
fn named_values_are_interned() {
    let mut values = ValueArena::default();
    let x = values.new_val_named("x");
    assert_eq!(values.new_val_named("x"), x);
    assert_eq!(values.get("x"), Some(x));

    values.new_val_named("value.2");
    let fresh = values.new_val();
    assert_eq!(values.name(fresh), "value.3");
}
