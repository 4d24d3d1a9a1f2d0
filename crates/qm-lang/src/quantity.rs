use rustc_hash::{FxHashMap, FxHashSet};

use crate::Ident;

/// Runtime classification of a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Category {
    /// Computed from its formula.
    #[default]
    Definition,
    /// Externally driven through `set_value`; the formula only supplies the
    /// initial value.
    Input(InputKind),
    /// A computed quantity that feeds the plot buffer.
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum InputKind {
    Slider,
    /// Momentary: a press is visible for exactly one step.
    Button,
    Checkbox,
}

impl Category {
    pub fn is_input(&self) -> bool {
        matches!(self, Category::Input(_))
    }

    pub fn is_button(&self) -> bool {
        matches!(self, Category::Input(InputKind::Button))
    }
}

/// One definition in the script, populated progressively by the analyser
/// passes. All fields are always present and defaulted.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Quantity {
    /// Unique identifier; the quantity-map key.
    pub name: Ident,
    /// Raw left-hand side text, including any parameter list.
    pub lhs: String,
    /// The full source line this record came from.
    pub source: String,
    /// Right-hand-side text (restored, with string literals intact).
    pub definition: String,
    /// Raw unit suffix text; empty when the line carried none.
    pub unit: String,
    /// Ordered parameter names for user-defined functions.
    pub parameters: Vec<Ident>,
    /// Names this quantity's definition references.
    pub dependencies: FxHashSet<Ident>,
    /// Names whose definitions reference this quantity; always the exact
    /// transpose of all `dependencies` edges in the map.
    pub reverse_deps: FxHashSet<Ident>,
    /// `true` for placeholders auto-created on first reference, before any
    /// definition exists.
    pub todo: bool,
    /// `true` if the formula must be resampled every step instead of
    /// reusing a cached value.
    pub is_time_dependent: bool,
    pub category: Category,
}

impl Quantity {
    /// A placeholder for a name that was referenced before being defined.
    pub fn placeholder(name: Ident) -> Self {
        Quantity {
            name,
            todo: true,
            ..Quantity::default()
        }
    }

    pub fn is_function(&self) -> bool {
        !self.parameters.is_empty()
    }
}

/// The live map of all quantities: an arena keyed by interned name, with
/// dependency edges stored as name sets rather than references.
#[derive(Debug, Clone, Default)]
pub struct QuantityMap {
    entries: FxHashMap<Ident, Quantity>,
}

impl QuantityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: Ident) -> Option<&Quantity> {
        self.entries.get(&name)
    }

    pub fn get_mut(&mut self, name: Ident) -> Option<&mut Quantity> {
        self.entries.get_mut(&name)
    }

    pub fn contains(&self, name: Ident) -> bool {
        self.entries.contains_key(&name)
    }

    pub fn insert(&mut self, quantity: Quantity) {
        self.entries.insert(quantity.name, quantity);
    }

    pub fn remove(&mut self, name: Ident) -> Option<Quantity> {
        self.entries.remove(&name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = Ident> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ident, &Quantity)> {
        self.entries.iter()
    }

    pub fn todos(&self) -> impl Iterator<Item = &Quantity> {
        self.entries.values().filter(|quantity| quantity.todo)
    }

    /// Verifies the graph invariant: `reverse_deps` is the exact transpose
    /// of all `dependencies` edges. Used by tests and debug assertions.
    pub fn transpose_holds(&self) -> bool {
        for (name, quantity) in &self.entries {
            for dep in &quantity.dependencies {
                match self.entries.get(dep) {
                    Some(target) if target.reverse_deps.contains(name) => {}
                    _ => return false,
                }
            }
            for back in &quantity.reverse_deps {
                match self.entries.get(back) {
                    Some(source) if source.dependencies.contains(name) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}
