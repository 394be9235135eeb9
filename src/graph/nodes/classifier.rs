//! Classifier: tags each item with the label of the first matching rule.
//!
//! The target field is reached through an explicit [`Accessor`] (a get/set
//! pair) so any payload type can be classified.

use crate::graph::dataflow::Emitter;
use crate::graph::fault::StepResult;
use crate::graph::node::Processor;
use crate::graph::row::{NodeOutput, Row};
use serde_json::Value;

type Getter<T, V> = Box<dyn Fn(&T) -> Option<V> + Send>;
type Setter<T, V> = Box<dyn Fn(&mut T, V) -> anyhow::Result<()> + Send>;
type Rule<T> = Box<dyn Fn(&T) -> bool + Send>;

/// Reads and writes one field of `T`.
pub struct Accessor<T, V> {
    get: Getter<T, V>,
    set: Setter<T, V>,
}

impl<T, V> Accessor<T, V> {
    pub fn new<G, S>(get: G, set: S) -> Self
    where
        G: Fn(&T) -> Option<V> + Send + 'static,
        S: Fn(&mut T, V) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            get: Box::new(get),
            set: Box::new(set),
        }
    }

    pub fn get(&self, target: &T) -> Option<V> {
        (self.get)(target)
    }

    pub fn set(&self, target: &mut T, value: V) -> anyhow::Result<()> {
        (self.set)(target, value)
    }
}

impl Accessor<Row, Value> {
    /// Accessor for a `Row` column.
    pub fn column(name: impl Into<String>) -> Self {
        let name = name.into();
        let column = name.clone();
        Self::new(
            move |row: &Row| row.get(&name).cloned(),
            move |row: &mut Row, value| {
                row.set(column.clone(), value)?;
                Ok(())
            },
        )
    }
}

/// Writes the label of the first rule that matches, or the fallback label,
/// into a copy of each item. Items whose target is already set keep their
/// value unless `overwrite` is enabled.
pub struct Classifier<T, V> {
    target: Accessor<T, V>,
    rules: Vec<(V, Rule<T>)>,
    fallback: Option<V>,
    overwrite: bool,
}

impl<T: NodeOutput, V: Clone + Send + 'static> Classifier<T, V> {
    pub fn new(target: Accessor<T, V>) -> Self {
        Self {
            target,
            rules: Vec::new(),
            fallback: None,
            overwrite: false,
        }
    }

    /// Add a rule; rules are tried in the order they were added.
    pub fn rule<F>(mut self, label: V, matches: F) -> Self
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        self.rules.push((label, Box::new(matches)));
        self
    }

    /// Label for items no rule matches. Without one they pass unchanged.
    pub fn otherwise(mut self, label: V) -> Self {
        self.fallback = Some(label);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    fn label_for(&self, item: &T) -> Option<V> {
        self.rules
            .iter()
            .find(|(_, matches)| matches(item))
            .map(|(label, _)| label.clone())
            .or_else(|| self.fallback.clone())
    }
}

impl<T: NodeOutput, V: Clone + Send + 'static> Processor for Classifier<T, V> {
    type Input = T;
    type Output = T;

    fn process(&mut self, item: &T, out: &mut Emitter<'_, T>) -> StepResult {
        let already_set = self.target.get(item).is_some();
        let label = if already_set && !self.overwrite {
            None
        } else {
            self.label_for(item)
        };

        let mut copy = out.borrow()?;
        item.copy_to(&mut copy);
        if let Some(label) = label {
            if let Err(e) = self.target.set(&mut copy, label) {
                out.discard(copy);
                return Err(e.into());
            }
        }
        out.emit(copy)?;
        Ok(())
    }
}
