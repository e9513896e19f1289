use std::collections::HashMap;

/// Named variables visible to an expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: HashMap<String, f64>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.vars.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// A copy of this context with `name` shifted by `delta`.
    ///
    /// The receiver is left untouched, so finite-difference evaluations never
    /// observe each other's perturbations.
    pub fn perturbed(&self, name: &str, delta: f64) -> Self {
        let mut copy = self.clone();
        if let Some(v) = copy.vars.get_mut(name) {
            *v += delta;
        }
        copy
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        ctx.extend(iter);
        ctx
    }
}

impl<K: Into<String>> Extend<(K, f64)> for Context {
    fn extend<I: IntoIterator<Item = (K, f64)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.set(k, v);
        }
    }
}
