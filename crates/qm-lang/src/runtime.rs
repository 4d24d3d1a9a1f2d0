// The reactive execution runtime: the analysed graph compiled into
// per-quantity memoized, time-indexed accessors, plus discrete stepping,
// input injection and scoped what-if evaluation.
//
// Values are memoized per (quantity, time index): once an accessor has
// computed a value for an index, repeated reads at that index return the
// cached value, so all reads within one step are mutually consistent.
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::expr::{self, BinaryOp, Expr};
use crate::number::Number;
use crate::quantity::{Category, QuantityMap};
use crate::unit::{UnitValue, Units, Value};
use crate::Ident;

pub mod builtin;
pub mod error;

use error::RuntimeError;

type Locals = SmallVec<[(Ident, UnitValue); 4]>;

/// Configuration for the runtime.
#[derive(Debug, Clone)]
pub struct Options {
    /// Call-depth ceiling; the guard that turns cyclic definitions into an
    /// error instead of unbounded recursion.
    pub max_call_depth: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self { max_call_depth: 64 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
    pub down: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotSample {
    pub time: u64,
    pub values: Vec<Number>,
}

// One quantity's compiled accessor state.
#[derive(Debug, Clone)]
struct Compiled {
    expr: Option<Rc<Expr>>,
    parameters: Vec<Ident>,
    declared_units: Units,
    category: Category,
    time_dependent: bool,
    /// Direct reverse dependencies at compile time, for cache invalidation.
    dependents: Vec<Ident>,
}

/// Executable state compiled from a [`QuantityMap`].
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    compiled: FxHashMap<Ident, Compiled>,
    history: FxHashMap<Ident, FxHashMap<u64, UnitValue>>,
    time: u64,
    pointer: Pointer,
    plot: Vec<PlotSample>,
    options: Options,
}

impl Runtime {
    /// Compiles every definition in the map into an interpretable
    /// expression tree. Todo quantities compile to a NaN accessor.
    pub fn compile(map: &QuantityMap) -> Result<Self, RuntimeError> {
        Self::compile_with_options(map, Options::default())
    }

    pub fn compile_with_options(
        map: &QuantityMap,
        options: Options,
    ) -> Result<Self, RuntimeError> {
        let mut compiled = FxHashMap::default();
        for (name, quantity) in map.iter() {
            let expr = if quantity.todo {
                None
            } else {
                Some(Rc::new(expr::parse(&quantity.definition).map_err(
                    |source| RuntimeError::BadDefinition {
                        name: name.as_str(),
                        source,
                    },
                )?))
            };
            compiled.insert(
                *name,
                Compiled {
                    expr,
                    parameters: quantity.parameters.clone(),
                    declared_units: Units::parse(&quantity.unit),
                    category: quantity.category,
                    time_dependent: quantity.is_time_dependent,
                    dependents: quantity.reverse_deps.iter().copied().collect(),
                },
            );
        }
        Ok(Runtime {
            compiled,
            history: FxHashMap::default(),
            time: 0,
            pointer: Pointer::default(),
            plot: Vec::new(),
            options,
        })
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn pointer(&self) -> Pointer {
        self.pointer
    }

    /// Injects the transient pointer state read by the pointer primitives.
    pub fn set_pointer(&mut self, x: f64, y: f64, down: bool) {
        self.pointer = Pointer { x, y, down };
    }

    pub fn plot_samples(&self) -> &[PlotSample] {
        &self.plot
    }

    /// The externally-set current value of every input quantity, used to
    /// carry input state across a recompile.
    pub fn input_states(&self) -> Vec<(Ident, UnitValue)> {
        self.compiled
            .iter()
            .filter(|(_, compiled)| compiled.category.is_input())
            .filter_map(|(name, _)| {
                self.history
                    .get(name)
                    .and_then(|slots| slots.get(&0))
                    .map(|value| (*name, value.clone()))
            })
            .collect()
    }

    pub(crate) fn record_plot(&mut self, time: u64, values: Vec<Number>) {
        self.plot.push(PlotSample { time, values });
    }

    /// The accessor's value at the current time index.
    pub fn get_value(&mut self, name: Ident) -> Result<UnitValue, RuntimeError> {
        self.value_of(name, self.time, 0)
    }

    /// Writes directly into time slot 0 of the quantity's history.
    pub fn set_value(&mut self, name: Ident, value: UnitValue) -> Result<(), RuntimeError> {
        let compiled = self
            .compiled
            .get(&name)
            .ok_or_else(|| RuntimeError::UnknownQuantity(name.as_str()))?;
        if !compiled.parameters.is_empty() {
            return Err(RuntimeError::NotAssignable(name.as_str()));
        }
        self.history.entry(name).or_default().insert(0, value);
        if self.time > 0 {
            if let Some(slots) = self.history.get_mut(&name) {
                slots.remove(&self.time);
            }
        }
        self.invalidate_dependents(name);
        Ok(())
    }

    /// Advances discrete time by one step.
    ///
    /// Volatile (time-dependent, parameterless, non-input) quantities are
    /// forcibly re-evaluated at the new index so random samples, pointer
    /// reads and history lookups are fresh. Input quantities copy their
    /// externally-set current value into the new slot; momentary buttons
    /// then fall back to false so a press is visible for exactly one step.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        let next = self.time + 1;
        let names: Vec<(Ident, Category, bool, bool)> = self
            .compiled
            .iter()
            .map(|(name, compiled)| {
                (
                    *name,
                    compiled.category,
                    compiled.time_dependent,
                    compiled.parameters.is_empty(),
                )
            })
            .collect();

        // Clear every volatile slot before evaluating any of them: an
        // evaluation may pull another volatile quantity on demand, and that
        // sample must survive the rest of the sweep so all readers at the
        // new index see the same value.
        for (name, category, time_dependent, parameterless) in &names {
            if *time_dependent && *parameterless && !category.is_input() {
                if let Some(slots) = self.history.get_mut(name) {
                    slots.remove(&next);
                }
            }
        }
        for (name, category, time_dependent, parameterless) in &names {
            if *time_dependent && *parameterless && !category.is_input() {
                self.value_of(*name, next, 0)?;
            }
        }
        for (name, category, _, _) in &names {
            if category.is_input() {
                let current = self.value_of(*name, 0, 0)?;
                self.history.entry(*name).or_default().insert(next, current);
                if category.is_button() {
                    self.history
                        .entry(*name)
                        .or_default()
                        .insert(0, UnitValue::bool(false));
                }
            }
        }
        self.time = next;
        Ok(())
    }

    /// Back to the idle state: histories, pointer state and the plot
    /// buffer are cleared and time returns to 0.
    pub fn reset(&mut self) {
        self.history.clear();
        self.time = 0;
        self.pointer = Pointer::default();
        self.plot.clear();
    }

    /// Scoped what-if evaluation: overwrite the given inputs, read the
    /// requested outputs, then restore every input exactly as it was —
    /// including on the error path — so probes never leak state.
    pub fn execute_quantities(
        &mut self,
        inputs: &[(Ident, UnitValue)],
        outputs: &[Ident],
    ) -> Result<Vec<(Ident, UnitValue)>, RuntimeError> {
        for (name, _) in inputs {
            let compiled = self
                .compiled
                .get(name)
                .ok_or_else(|| RuntimeError::UnknownQuantity(name.as_str()))?;
            if !compiled.parameters.is_empty() {
                return Err(RuntimeError::NotAssignable(name.as_str()));
            }
        }

        let saved: Vec<(Ident, Option<UnitValue>)> = inputs
            .iter()
            .map(|(name, _)| {
                (
                    *name,
                    self.history.get(name).and_then(|slots| slots.get(&0)).cloned(),
                )
            })
            .collect();

        let probe = (|| {
            for (name, value) in inputs {
                self.set_value(*name, value.clone())?;
            }
            outputs
                .iter()
                .map(|name| self.value_of(*name, self.time, 0).map(|value| (*name, value)))
                .collect::<Result<Vec<_>, _>>()
        })();

        for (name, old) in saved {
            let slots = self.history.entry(name).or_default();
            match old {
                Some(value) => {
                    slots.insert(0, value);
                }
                None => {
                    slots.remove(&0);
                }
            }
            if self.time > 0 {
                if let Some(slots) = self.history.get_mut(&name) {
                    slots.remove(&self.time);
                }
            }
            self.invalidate_dependents(name);
        }

        probe
    }

    // Drops memoized values of everything downstream of `name` at the
    // current index so the next read recomputes from the new input state.
    fn invalidate_dependents(&mut self, name: Ident) {
        let mut visited: FxHashSet<Ident> = FxHashSet::default();
        visited.insert(name);
        let mut queue: Vec<Ident> = self
            .compiled
            .get(&name)
            .map(|compiled| compiled.dependents.clone())
            .unwrap_or_default();
        while let Some(dependent) = queue.pop() {
            if !visited.insert(dependent) {
                continue;
            }
            if let Some(slots) = self.history.get_mut(&dependent) {
                slots.remove(&self.time);
            }
            if let Some(compiled) = self.compiled.get(&dependent) {
                queue.extend(compiled.dependents.iter().copied());
            }
        }
    }

    fn value_of(&mut self, name: Ident, time: u64, depth: u32) -> Result<UnitValue, RuntimeError> {
        if let Some(value) = self.history.get(&name).and_then(|slots| slots.get(&time)) {
            return Ok(value.clone());
        }
        if depth >= self.options.max_call_depth {
            return Err(RuntimeError::CyclicEvaluation(name.as_str()));
        }
        let compiled = self
            .compiled
            .get(&name)
            .ok_or_else(|| RuntimeError::UnknownQuantity(name.as_str()))?;
        if !compiled.parameters.is_empty() {
            return Err(RuntimeError::FunctionReference(name.as_str()));
        }
        let expr = compiled.expr.clone();
        let declared_units = compiled.declared_units.clone();
        let is_input = compiled.category.is_input();

        // An input with no value at this index reads through to its
        // externally-set current value (slot 0) without caching, so a later
        // step's copy is not pinned to a pre-step read.
        if is_input && time > 0 {
            if let Some(current) = self.history.get(&name).and_then(|slots| slots.get(&0)) {
                return Ok(current.clone());
            }
        }

        let value = match expr {
            None => UnitValue::nan(),
            Some(expr) => {
                let mut locals = Locals::new();
                self.eval(&expr, time, depth + 1, &mut locals)?
            }
        };
        let value = if !declared_units.is_normal() && value.error.is_none() && value.is_normal() {
            value.with_unit(&declared_units)
        } else {
            value
        };
        self.history
            .entry(name)
            .or_default()
            .insert(time, value.clone());
        Ok(value)
    }

    fn eval(
        &mut self,
        expr: &Expr,
        time: u64,
        depth: u32,
        locals: &mut Locals,
    ) -> Result<UnitValue, RuntimeError> {
        match expr {
            Expr::Number(n) => Ok(UnitValue::number(*n)),
            Expr::Bool(b) => Ok(UnitValue::bool(*b)),
            Expr::String(s) => Ok(UnitValue::string(s.clone())),
            Expr::Ref(name) => {
                if let Some((_, value)) = locals.iter().rev().find(|(local, _)| local == name) {
                    return Ok(value.clone());
                }
                // Zero-argument primitives may be written without parens;
                // they never shadow a defined quantity because the analyser
                // keeps primitive names out of the map.
                if !self.compiled.contains_key(name) {
                    if let Some(builtin) = name.resolve_with(builtin::lookup) {
                        return builtin::apply(self, builtin, *name, Vec::new(), time);
                    }
                }
                self.value_of(*name, time, depth)
            }
            Expr::History(name, lag) => self.value_of(*name, time.saturating_sub(*lag), depth),
            Expr::Neg(inner) => {
                let value = self.eval(inner, time, depth, locals)?;
                Ok(value.multiply(&UnitValue::number(-1)))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, time, depth, locals)?;
                let rhs = self.eval(rhs, time, depth, locals)?;
                Ok(match op {
                    BinaryOp::Add => lhs.add(&rhs),
                    BinaryOp::Sub => lhs.subtract(&rhs),
                    BinaryOp::Mul => lhs.multiply(&rhs),
                    BinaryOp::Div => lhs.divide(&rhs),
                    BinaryOp::Pow => lhs.power(&rhs),
                })
            }
            Expr::Call(name, args) => self.eval_call(*name, args, time, depth, locals),
            Expr::Vector(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    let value = self.eval(&entry.expr, time, depth, locals)?;
                    values.push(match &entry.label {
                        Some(label) => UnitValue::labeled(label.clone(), value),
                        None => value,
                    });
                }
                Ok(UnitValue::array(values))
            }
            Expr::Fold {
                binder,
                list,
                body,
                combiner,
            } => self.eval_fold(*binder, list, body, combiner, time, depth, locals),
        }
    }

    fn eval_call(
        &mut self,
        name: Ident,
        args: &[Expr],
        time: u64,
        depth: u32,
        locals: &mut Locals,
    ) -> Result<UnitValue, RuntimeError> {
        if depth >= self.options.max_call_depth {
            return Err(RuntimeError::CyclicEvaluation(name.as_str()));
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, time, depth, locals)?);
        }

        // User-defined functions shadow nothing: builtins and functions
        // live in disjoint namespaces because the analyser excludes builtin
        // names from definitions.
        if let Some(compiled) = self.compiled.get(&name) {
            if !compiled.parameters.is_empty() {
                let parameters = compiled.parameters.clone();
                let Some(body) = compiled.expr.clone() else {
                    return Ok(UnitValue::nan());
                };
                if parameters.len() != values.len() {
                    return Err(RuntimeError::InvalidNumberOfArguments(
                        name.as_str(),
                        parameters.len().min(u8::MAX as usize) as u8,
                        values.len().min(u8::MAX as usize) as u8,
                    ));
                }
                // Function bodies see only their parameters, never the
                // caller's locals.
                let mut scope: Locals =
                    parameters.into_iter().zip(values).collect();
                return self.eval(&body, time, depth + 1, &mut scope);
            }
        }

        let builtin = name.resolve_with(builtin::lookup);
        match builtin {
            Some(builtin) => builtin::apply(self, builtin, name, values, time),
            None => Err(RuntimeError::UnknownQuantity(name.as_str())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_fold(
        &mut self,
        binder: Ident,
        list: &Expr,
        body: &Expr,
        combiner: &Expr,
        time: u64,
        depth: u32,
        locals: &mut Locals,
    ) -> Result<UnitValue, RuntimeError> {
        let list = self.eval(list, time, depth, locals)?;
        let items: Vec<UnitValue> = match list.value {
            Value::Array(items) => items,
            _ => vec![list],
        };

        let mut accumulated: Option<UnitValue> = None;
        for item in items {
            locals.push((binder, item));
            let mapped = self.eval(body, time, depth, locals);
            locals.pop();
            let mapped = mapped?;
            accumulated = Some(match accumulated {
                None => mapped,
                Some(acc) => self.combine(combiner, acc, mapped, time, depth)?,
            });
        }
        Ok(accumulated.unwrap_or_else(|| UnitValue::number(0)))
    }

    fn combine(
        &mut self,
        combiner: &Expr,
        acc: UnitValue,
        item: UnitValue,
        time: u64,
        depth: u32,
    ) -> Result<UnitValue, RuntimeError> {
        let Expr::Ref(name) = combiner else {
            return Err(RuntimeError::InvalidCombiner(format!("{combiner:?}")));
        };
        if let Some(builtin) = name.resolve_with(builtin::lookup) {
            return builtin::apply(self, builtin, *name, vec![acc, item], time);
        }
        let Some(compiled) = self.compiled.get(name) else {
            return Err(RuntimeError::InvalidCombiner(name.as_str()));
        };
        if compiled.parameters.len() != 2 {
            return Err(RuntimeError::InvalidCombiner(name.as_str()));
        }
        let parameters = compiled.parameters.clone();
        let Some(body) = compiled.expr.clone() else {
            return Ok(UnitValue::nan());
        };
        let mut scope: Locals = parameters.into_iter().zip([acc, item]).collect();
        self.eval(&body, time, depth + 1, &mut scope)
    }
}
