use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered list of event observers.
///
/// Observers are notified in registration order. Unregistering keeps the
/// relative order of the remaining observers.
pub struct EventObservers<E> {
    next_id: u64,
    entries: Vec<(ObserverId, Box<dyn FnMut(&E)>)>,
}

impl<E> Default for EventObservers<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<E> EventObservers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&E) + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(observer)));
        id
    }

    /// Returns false when `id` was never registered or is already gone.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn notify(&mut self, event: &E) {
        trace!("notifying {} observers", self.entries.len());
        for (_, observer) in &mut self.entries {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
