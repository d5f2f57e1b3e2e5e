/// Bounded count of outstanding, unanswered requests.
///
/// A request may be issued only after [`try_acquire`](Self::try_acquire)
/// succeeds; every reply gives one credit back through
/// [`release`](Self::release).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditWindow {
    capacity: usize,
    available: usize,
}

impl CreditWindow {
    /// A window of `capacity` credits. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            available: capacity,
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        if self.available == 0 {
            return false;
        }
        self.available -= 1;
        true
    }

    /// Return one credit. Never exceeds the capacity.
    pub fn release(&mut self) {
        self.available = (self.available + 1).min(self.capacity);
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.available
    }

    /// Requests issued and not yet answered.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.capacity - self.available
    }
}
