use std::collections::VecDeque;

/// Fixed-capacity sliding buffer of the most recent raw ADC values.
///
/// Owned exclusively by the device session task; nothing else mutates it.
/// Once full, every insertion evicts the oldest value (FIFO).
#[derive(Debug, Clone)]
pub struct SignalWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SignalWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a validated value, evicting the oldest once at capacity.
    pub fn push(&mut self, value: f64) {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The buffered values in arrival order, right-padded with zeros up to
    /// capacity. This is the classifier's expected input shape.
    pub fn padded(&self) -> Vec<f64> {
        let mut out: Vec<f64> = self.samples.iter().copied().collect();
        out.resize(self.capacity, 0.0);
        out
    }

    /// The buffered values in arrival order, without padding.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}
