//! Name-keyed call registry with per-arity overloads.

use std::collections::HashMap;

use anyhow::anyhow;
use sdrblock_core::Value;

type CallFn<T> = Box<dyn Fn(&mut T, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

struct Overload<T> {
    arity: usize,
    f: CallFn<T>,
}

/// Registry of the calls a block exposes, operating on a target of type `T`.
///
/// A name may carry several overloads distinguished by argument count.
/// Registering the same name and arity twice replaces the earlier overload.
/// Getters registered as probes are also listed by [`probes`](Self::probes),
/// in registration order.
pub struct CallTable<T> {
    calls: HashMap<String, Vec<Overload<T>>>,
    probes: Vec<String>,
}

impl<T> Default for CallTable<T> {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
            probes: Vec::new(),
        }
    }
}

impl<T> CallTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, arity: usize, f: F)
    where
        F: Fn(&mut T, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let overloads = self.calls.entry(name.into()).or_default();
        overloads.retain(|o| o.arity != arity);
        overloads.push(Overload {
            arity,
            f: Box::new(f),
        });
    }

    /// Marks a registered getter as probed.
    ///
    /// # Errors
    ///
    /// Returns an error if `getter` has no zero-argument overload.
    pub fn register_probe(&mut self, getter: &str) -> anyhow::Result<()> {
        let has_nullary = self
            .calls
            .get(getter)
            .is_some_and(|overloads| overloads.iter().any(|o| o.arity == 0));
        if !has_nullary {
            return Err(anyhow!("cannot probe {getter}: no zero-argument call registered"));
        }
        if !self.probes.iter().any(|p| p == getter) {
            self.probes.push(getter.to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn probes(&self) -> &[String] {
        &self.probes
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.calls.contains_key(name)
    }

    /// Resolves the overload of `name` matching `args.len()` and runs it.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names, arity mismatches, and whatever the
    /// call itself returns.
    pub fn invoke(&self, target: &mut T, name: &str, args: &[Value]) -> anyhow::Result<Value> {
        let overloads = self
            .calls
            .get(name)
            .ok_or_else(|| anyhow!("unknown call {name}"))?;
        let overload = overloads
            .iter()
            .find(|o| o.arity == args.len())
            .ok_or_else(|| anyhow!("{name}: no overload takes {} argument(s)", args.len()))?;
        (overload.f)(target, args)
    }
}

// ---------------------------------------------------------------------------
// Argument extraction
// ---------------------------------------------------------------------------

fn bad_arg(call: &str, index: usize, expected: &str, got: &Value) -> anyhow::Error {
    anyhow!("{call}: argument {index} must be {expected}, got {got}")
}

pub(crate) fn f64_arg(call: &str, args: &[Value], index: usize) -> anyhow::Result<f64> {
    args[index]
        .as_f64()
        .ok_or_else(|| bad_arg(call, index, "a number", &args[index]))
}

pub(crate) fn bool_arg(call: &str, args: &[Value], index: usize) -> anyhow::Result<bool> {
    args[index]
        .as_bool()
        .ok_or_else(|| bad_arg(call, index, "a boolean", &args[index]))
}

pub(crate) fn str_arg<'a>(call: &str, args: &'a [Value], index: usize) -> anyhow::Result<&'a str> {
    args[index]
        .as_str()
        .ok_or_else(|| bad_arg(call, index, "a string", &args[index]))
}

/// Strings verbatim, anything else in its display form.
pub(crate) fn text_arg(args: &[Value], index: usize) -> String {
    match &args[index] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
