// The top-level facade: one live quantity map plus the runtime compiled
// from it. Edits mark the runtime dirty; it is recompiled lazily before the
// next read, carrying externally-set input values across the rebuild.
use crate::analyzer::{self, Analysis};
use crate::error::{Error, InnerError};
use crate::quantity::QuantityMap;
use crate::runtime::{PlotSample, Pointer, Runtime};
use crate::unit::UnitValue;
use crate::Ident;

/// A change to the set of known quantities, reported to the observer hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A definition was added or replaced.
    Defined(Ident),
    /// A todo placeholder was auto-created for a new reference.
    Created(Ident),
    /// An entry was deleted, either explicitly or by placeholder pruning.
    Removed(Ident),
}

type Observer = Box<dyn FnMut(Change)>;

#[derive(Default)]
pub struct Session {
    map: QuantityMap,
    runtime: Runtime,
    /// Names in first-definition order, for stable listings.
    order: Vec<Ident>,
    /// All successfully analysed lines, kept for diagnostics.
    source: String,
    dirty: bool,
    observer: Option<Observer>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook called for every quantity added or removed.
    pub fn on_change(&mut self, observer: impl FnMut(Change) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn quantities(&self) -> &QuantityMap {
        &self.map
    }

    /// Names in first-definition order, placeholders excluded.
    pub fn defined(&self) -> Vec<Ident> {
        self.order
            .iter()
            .copied()
            .filter(|name| self.map.get(*name).is_some_and(|q| !q.todo))
            .collect()
    }

    /// Placeholders still awaiting a definition.
    pub fn todos(&self) -> Vec<Ident> {
        let mut todos: Vec<Ident> = self.map.todos().map(|q| q.name).collect();
        todos.sort();
        todos
    }

    pub fn time(&self) -> u64 {
        self.runtime.time()
    }

    /// Analyses one definition line against the live map.
    pub fn analyse_line(&mut self, line: &str) -> Result<Analysis, Error> {
        let analysis = analyzer::analyse(line, &mut self.map)
            .map_err(|e| Error::from_error(line, InnerError::Analyze(e)))?;
        self.source.push_str(line.trim());
        self.source.push('\n');
        if !self.order.contains(&analysis.name) {
            self.order.push(analysis.name);
        }
        for created in &analysis.created {
            self.order.push(*created);
        }
        self.order
            .retain(|name| !analysis.pruned.contains(name) || self.map.contains(*name));
        self.dirty = true;

        if let Some(observer) = &mut self.observer {
            observer(Change::Defined(analysis.name));
            for created in &analysis.created {
                observer(Change::Created(*created));
            }
            for pruned in &analysis.pruned {
                observer(Change::Removed(*pruned));
            }
        }
        Ok(analysis)
    }

    /// Analyses a whole script, skipping blank and `//` comment lines.
    pub fn analyse_script(&mut self, script: &str) -> Result<Vec<Analysis>, Error> {
        script
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("//"))
            .map(|line| self.analyse_line(line))
            .collect()
    }

    /// Deletes a definition; returns the names pruned as a consequence.
    pub fn remove(&mut self, name: &str) -> Result<Vec<Ident>, Error> {
        let name = Ident::new(name);
        let pruned = analyzer::remove(name, &mut self.map)
            .map_err(|e| Error::from_error(self.source.clone(), InnerError::Analyze(e)))?;
        self.order
            .retain(|entry| !pruned.contains(entry) || self.map.contains(*entry));
        self.dirty = true;
        if let Some(observer) = &mut self.observer {
            for removed in &pruned {
                observer(Change::Removed(*removed));
            }
        }
        Ok(pruned)
    }

    pub fn get_value(&mut self, name: &str) -> Result<UnitValue, Error> {
        self.ensure_runtime()?;
        self.runtime
            .get_value(Ident::new(name))
            .map_err(|e| self.runtime_error(e))
    }

    pub fn set_value(&mut self, name: &str, value: UnitValue) -> Result<(), Error> {
        self.ensure_runtime()?;
        self.runtime
            .set_value(Ident::new(name), value)
            .map_err(|e| self.runtime_error(e))
    }

    pub fn step(&mut self) -> Result<(), Error> {
        self.ensure_runtime()?;
        self.runtime.step().map_err(|e| self.runtime_error(e))
    }

    pub fn reset(&mut self) -> Result<(), Error> {
        self.ensure_runtime()?;
        self.runtime.reset();
        Ok(())
    }

    /// What-if probe over the current state; see [`Runtime::execute_quantities`].
    pub fn execute_quantities(
        &mut self,
        inputs: &[(&str, UnitValue)],
        outputs: &[&str],
    ) -> Result<Vec<(Ident, UnitValue)>, Error> {
        self.ensure_runtime()?;
        let inputs: Vec<(Ident, UnitValue)> = inputs
            .iter()
            .map(|(name, value)| (Ident::new(name), value.clone()))
            .collect();
        let outputs: Vec<Ident> = outputs.iter().map(|name| Ident::new(name)).collect();
        self.runtime
            .execute_quantities(&inputs, &outputs)
            .map_err(|e| self.runtime_error(e))
    }

    pub fn set_pointer(&mut self, x: f64, y: f64, down: bool) {
        self.runtime.set_pointer(x, y, down);
    }

    pub fn plot_samples(&self) -> &[PlotSample] {
        self.runtime.plot_samples()
    }

    pub fn pointer(&self) -> Pointer {
        self.runtime.pointer()
    }

    fn runtime_error(&self, e: crate::runtime::error::RuntimeError) -> Error {
        Error::from_error(self.source.clone(), InnerError::Runtime(e))
    }

    // Recompiles the runtime if any edit happened since the last build.
    // Input values survive the rebuild; time restarts at 0 because the
    // graph shape changed.
    fn ensure_runtime(&mut self) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }
        let carried = self.runtime.input_states();
        let pointer = self.runtime.pointer();
        let mut runtime =
            Runtime::compile(&self.map).map_err(|e| self.runtime_error(e))?;
        runtime.set_pointer(pointer.x, pointer.y, pointer.down);
        for (name, value) in carried {
            if self
                .map
                .get(name)
                .is_some_and(|q| q.category.is_input() && !q.is_function())
            {
                runtime
                    .set_value(name, value)
                    .map_err(|e| Error::from_error(self.source.clone(), InnerError::Runtime(e)))?;
            }
        }
        self.runtime = runtime;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::unit::Units;

    #[test]
    fn test_script_round_trip() {
        let mut session = Session::new();
        session
            .analyse_script(
                "// free fall\n\nheight = 100 ; m\nspeed = 9.81 * elapsed ; m/s\nelapsed = 2 ; s",
            )
            .unwrap();
        let speed = session.get_value("speed").unwrap();
        assert_eq!(speed.numeric(), crate::Number::new(19.62));
        assert_eq!(speed.units(), &Units::of(&[("m", 1), ("s", -1)]));
        assert!(session.todos().is_empty());
    }

    #[test]
    fn test_edit_invalidates_previous_values() {
        let mut session = Session::new();
        session.analyse_line("a = b * 2").unwrap();
        session.analyse_line("b = 3").unwrap();
        assert_eq!(session.get_value("a").unwrap().numeric(), 6.into());
        session.analyse_line("b = 5").unwrap();
        assert_eq!(session.get_value("a").unwrap().numeric(), 10.into());
    }

    #[test]
    fn test_inputs_survive_rebuild() {
        let mut session = Session::new();
        session.analyse_line("gain = slider(0, 10, 1)").unwrap();
        session.set_value("gain", UnitValue::number(7)).unwrap();
        session.analyse_line("loudness = gain * 2").unwrap();
        assert_eq!(session.get_value("loudness").unwrap().numeric(), 14.into());
    }

    #[test]
    fn test_observer_sees_placeholder_churn() {
        let changes: Rc<RefCell<Vec<Change>>> = Rc::default();
        let sink = Rc::clone(&changes);
        let mut session = Session::new();
        session.on_change(move |change| sink.borrow_mut().push(change));

        session.analyse_line("a = ghost + 1").unwrap();
        session.analyse_line("a = 1").unwrap();
        let seen = changes.borrow();
        assert!(seen.contains(&Change::Defined(Ident::new("a"))));
        assert!(seen.contains(&Change::Created(Ident::new("ghost"))));
        assert!(seen.contains(&Change::Removed(Ident::new("ghost"))));
    }

    #[test]
    fn test_defined_listing_order_is_stable() {
        let mut session = Session::new();
        session.analyse_line("z = 1").unwrap();
        session.analyse_line("m = z + unknown_yet").unwrap();
        session.analyse_line("a = 2").unwrap();
        assert_eq!(
            session.defined(),
            vec![Ident::new("z"), Ident::new("m"), Ident::new("a")]
        );
    }

    #[test]
    fn test_remove_reports_pruned() {
        let mut session = Session::new();
        session.analyse_line("a = b + 1").unwrap();
        let mut pruned = session.remove("a").unwrap();
        pruned.sort();
        assert_eq!(pruned, vec![Ident::new("a"), Ident::new("b")]);
        assert!(session.quantities().is_empty());
    }

    #[test]
    fn test_malformed_line_is_a_diagnostic() {
        let mut session = Session::new();
        let error = session.analyse_line("no equals here").unwrap_err();
        assert!(matches!(error.cause, InnerError::Analyze(_)));
    }
}
