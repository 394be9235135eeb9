//! ResultCollector: materializes the final stream of a process.
//!
//! Every consumed item is copied into an owned, unpooled instance so the
//! collected output outlives the pools of the run.

use crate::context::Context;
use crate::graph::fault::StepResult;
use crate::graph::node::Sink;
use crate::graph::row::NodeOutput;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

/// Sink that keeps a copy of every item it receives, in arrival order.
pub struct ResultCollector<T: NodeOutput> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: NodeOutput> ResultCollector<T> {
    /// A collector and the handle that reads what it collected.
    pub fn new() -> (Self, ResultHandle<T>) {
        let items = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                items: items.clone(),
            },
            ResultHandle { items },
        )
    }
}

impl<T: NodeOutput> Sink for ResultCollector<T> {
    type Input = T;

    fn consume(&mut self, item: &T, _ctx: &Context) -> StepResult {
        let mut owned = T::default();
        item.copy_to(&mut owned);
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(owned);
        Ok(())
    }
}

/// Shared view of a collector's output.
pub struct ResultHandle<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> ResultHandle<T> {
    /// Take everything collected so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Type-erased drain, so a process can hand its collected output over
/// without knowing the payload type.
pub(crate) trait CollectedOutput: Send + Sync {
    fn take_any(&self) -> Box<dyn Any + Send>;
}

impl<T: NodeOutput> CollectedOutput for ResultHandle<T> {
    fn take_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.take())
    }
}
