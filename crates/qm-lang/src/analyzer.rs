// Line-oriented analysis of definition lines against the live quantity map.
// This is deliberately a lightweight text scan, not a parser: lines are
// guarded, split on `=` and `;`, and referenced names are extracted with
// structural exclusions (parameters, vector labels, fold binders).
use std::sync::LazyLock;

use regex_lite::Regex;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::guard;
use crate::quantity::{Category, InputKind, Quantity, QuantityMap};
use crate::runtime::builtin;
use crate::Ident;

/// Primitives whose presence makes a quantity time-dependent: its formula
/// must be resampled every step rather than reused from cache.
///
/// Kept as a fixed list, separate from the builtin dispatch table; the two
/// could drift apart if a volatile builtin is added to one and not the
/// other. The integration tests pin the current membership.
pub const TIME_DEPENDENT_PRIMITIVES: &[&str] = &[
    "slider",
    "button",
    "checkbox",
    "random",
    "time",
    "pointer_x",
    "pointer_y",
    "pointer_down",
];

#[derive(Error, Debug, PartialEq)]
pub enum AnalyzeError {
    #[error("Malformed definition: \"{line}\"")]
    MalformedDefinition { line: String },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Outcome of analysing one line: the quantity defined by the line plus the
/// placeholder churn it caused, so callers can surface change notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub name: Ident,
    /// `true` if the line introduced a record that was not in the map.
    pub is_new: bool,
    /// Todo placeholders auto-created for newly referenced names.
    pub created: Vec<Ident>,
    /// Entries garbage-collected because this line dropped their last
    /// reverse dependency.
    pub pruned: Vec<Ident>,
}

static LHS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*$").unwrap()
});

static INPUT_CONSTRUCTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(slider|button|checkbox)\s*\(").unwrap());

static PLOT_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bplot\s*\(").unwrap());

static TIME_DEPENDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b({})\b", TIME_DEPENDENT_PRIMITIVES.join("|"))).unwrap()
});

/// Analyses one definition line against the live map.
///
/// The line is guarded, split at the first unguarded `=` into LHS and RHS,
/// and the RHS is split at the first unguarded `;` into definition and unit
/// suffix. An existing record is updated in place, preserving its
/// `reverse_deps`; otherwise a new record is inserted. Unresolved references
/// become todo placeholders, and dependencies dropped by a redefinition are
/// struck from their targets' reverse edges with cascade pruning.
pub fn analyse(line: &str, map: &mut QuantityMap) -> Result<Analysis, AnalyzeError> {
    let (protected, buffer) = guard::protect(line);

    let eq = protected
        .find('=')
        .ok_or_else(|| AnalyzeError::MalformedDefinition {
            line: line.to_string(),
        })?;
    let lhs_text = &protected[..eq];
    let rhs_text = &protected[eq + 1..];
    let (def_text, unit_text) = match rhs_text.find(';') {
        Some(semi) => (&rhs_text[..semi], rhs_text[semi + 1..].trim()),
        None => (rhs_text, ""),
    };

    let captures = LHS
        .captures(lhs_text)
        .ok_or_else(|| AnalyzeError::MalformedDefinition {
            line: line.to_string(),
        })?;
    let name = Ident::new(&captures[1]);
    let parameters = parse_parameters(captures.get(2).map(|m| m.as_str()), line)?;

    let def_trimmed = def_text.trim();
    let todo = def_trimmed.is_empty();
    let new_deps: FxHashSet<Ident> = if todo {
        FxHashSet::default()
    } else {
        extract_dependencies(def_trimmed, &parameters)
            .into_iter()
            .collect()
    };

    let definition = guard::restore(def_trimmed, &buffer);
    let is_time_dependent = def_trimmed.contains('@') || TIME_DEPENDENT.is_match(def_trimmed);
    let category = classify(def_trimmed);

    let (old_deps, is_new) = match map.get_mut(name) {
        Some(existing) => {
            // Redefinition: reverse_deps (who depends on this quantity) is
            // preserved untouched; everything derived from the line is
            // recomputed.
            let old = std::mem::take(&mut existing.dependencies);
            existing.lhs = lhs_text.trim().to_string();
            existing.source = line.trim().to_string();
            existing.definition = definition;
            existing.unit = guard::restore(unit_text, &buffer);
            existing.parameters = parameters;
            existing.dependencies = new_deps.clone();
            existing.todo = todo;
            existing.is_time_dependent = is_time_dependent;
            existing.category = category;
            (old, false)
        }
        None => {
            map.insert(Quantity {
                name,
                lhs: lhs_text.trim().to_string(),
                source: line.trim().to_string(),
                definition,
                unit: guard::restore(unit_text, &buffer),
                parameters,
                dependencies: new_deps.clone(),
                reverse_deps: FxHashSet::default(),
                todo,
                is_time_dependent,
                category,
            });
            (FxHashSet::default(), true)
        }
    };

    let mut created = Vec::new();
    for dep in &new_deps {
        match map.get_mut(*dep) {
            Some(target) => {
                target.reverse_deps.insert(name);
            }
            None => {
                let mut placeholder = Quantity::placeholder(*dep);
                placeholder.reverse_deps.insert(name);
                map.insert(placeholder);
                created.push(*dep);
            }
        }
    }

    let mut pruned = Vec::new();
    for removed in old_deps.difference(&new_deps) {
        strike(map, *removed, name, &mut pruned)?;
    }

    Ok(Analysis {
        name,
        is_new,
        created,
        pruned,
    })
}

/// Deletes a definition from the map.
///
/// A quantity that is still referenced elsewhere is demoted back to a todo
/// placeholder (its reverse dependents keep their edges); an unreferenced
/// one is removed outright. Either way its own outgoing edges are struck,
/// cascade-pruning placeholders orphaned by the deletion.
pub fn remove(name: Ident, map: &mut QuantityMap) -> Result<Vec<Ident>, AnalyzeError> {
    let Some(quantity) = map.get(name) else {
        return Ok(Vec::new());
    };
    let dependencies: Vec<Ident> = quantity.dependencies.iter().copied().collect();
    let still_referenced = !quantity.reverse_deps.is_empty();

    let mut pruned = Vec::new();
    if still_referenced {
        let quantity = map.get_mut(name).expect("checked above");
        let reverse_deps = std::mem::take(&mut quantity.reverse_deps);
        let mut placeholder = Quantity::placeholder(name);
        placeholder.reverse_deps = reverse_deps;
        *quantity = placeholder;
    } else {
        map.remove(name);
        pruned.push(name);
    }
    for dep in dependencies {
        strike(map, dep, name, &mut pruned)?;
    }
    Ok(pruned)
}

fn strike(
    map: &mut QuantityMap,
    dep: Ident,
    referrer: Ident,
    pruned: &mut Vec<Ident>,
) -> Result<(), AnalyzeError> {
    let Some(target) = map.get_mut(dep) else {
        return Err(AnalyzeError::InvariantViolation(format!(
            "dependency \"{dep}\" of \"{referrer}\" is missing from the map"
        )));
    };
    target.reverse_deps.remove(&referrer);
    if target.reverse_deps.is_empty() && target.todo {
        prune(map, dep, pruned)?;
    }
    Ok(())
}

// Speculative placeholders with no remaining reverse dependents are garbage
// collected, transitively. Fully-defined quantities are never deleted here.
fn prune(
    map: &mut QuantityMap,
    name: Ident,
    pruned: &mut Vec<Ident>,
) -> Result<(), AnalyzeError> {
    let Some(removed) = map.remove(name) else {
        return Ok(());
    };
    pruned.push(name);
    for dep in removed.dependencies {
        strike(map, dep, name, pruned)?;
    }
    Ok(())
}

fn parse_parameters(text: Option<&str>, line: &str) -> Result<Vec<Ident>, AnalyzeError> {
    let Some(text) = text else {
        return Ok(Vec::new());
    };
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part
                .chars()
                .enumerate()
                .all(|(i, c)| c == '_' || if i == 0 { c.is_alphabetic() } else { c.is_alphanumeric() })
            {
                Ok(Ident::new(part))
            } else {
                Err(AnalyzeError::MalformedDefinition {
                    line: line.to_string(),
                })
            }
        })
        .collect()
}

fn classify(definition: &str) -> Category {
    if let Some(captures) = INPUT_CONSTRUCTOR.captures(definition) {
        let kind = match &captures[1] {
            "slider" => InputKind::Slider,
            "button" => InputKind::Button,
            _ => InputKind::Checkbox,
        };
        Category::Input(kind)
    } else if PLOT_CALL.is_match(definition) {
        Category::Output
    } else {
        Category::Definition
    }
}

struct FoldScope {
    /// Paren depth at which this fold call closes.
    close_depth: usize,
    binder: Option<Ident>,
}

/// Extracts the distinct quantity names referenced by a (guarded)
/// definition, in textual order.
///
/// Exclusions, in order: builtin primitive names, the quantity's own
/// parameters, label keys of `key: value` vector entries, and fold binders.
/// In a fold call `#(i, ...)` the first argument names a local binder that
/// shadows any same-named quantity for the remainder of that call's
/// argument list.
pub fn extract_dependencies(definition: &str, parameters: &[Ident]) -> Vec<Ident> {
    let chars: Vec<char> = definition.chars().collect();
    let len = chars.len();
    let mut deps = Vec::new();
    let mut seen: FxHashSet<Ident> = FxHashSet::default();
    let mut folds: Vec<FoldScope> = Vec::new();
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < len {
        let c = chars[i];
        if c == '#' {
            let mut j = i + 1;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            if j < len && chars[j] == '(' {
                depth += 1;
                folds.push(FoldScope {
                    close_depth: depth,
                    binder: None,
                });
                i = j + 1;
                continue;
            }
            i += 1;
        } else if c == '(' || c == '[' {
            depth += 1;
            i += 1;
        } else if c == ')' || c == ']' {
            if c == ')'
                && folds
                    .last()
                    .is_some_and(|scope| scope.close_depth == depth)
            {
                folds.pop();
            }
            depth = depth.saturating_sub(1);
            i += 1;
        } else if c.is_ascii_digit() {
            // Skip numeric literals, including exponent forms like 1e5.
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let name = Ident::new(&word);

            if let Some(scope) = folds.last_mut() {
                if scope.binder.is_none() && scope.close_depth == depth {
                    scope.binder = Some(name);
                    continue;
                }
            }
            if folds.iter().any(|scope| scope.binder == Some(name)) {
                continue;
            }
            let mut j = i;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            if j < len && chars[j] == ':' {
                // Label key of a named-vector entry.
                continue;
            }
            if word == "true" || word == "false" {
                continue;
            }
            if parameters.contains(&name) || builtin::is_builtin(&word) {
                continue;
            }
            if seen.insert(name) {
                deps.push(name);
            }
        } else {
            i += 1;
        }
    }

    deps
}
