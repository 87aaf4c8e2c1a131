// WaveformSampler - bounded, evenly spaced sample of a stream
//
// Keeps every `stride`-th offered item. Whenever the buffer reaches twice
// the target capacity, every other kept item is dropped and the stride
// doubles, so the kept items stay evenly spread over everything offered so
// far while memory stays bounded by 2 x capacity.

#[derive(Debug, Clone)]
pub struct WaveformSampler<T> {
    capacity: usize,
    stride: u64,
    offered: u64,
    items: Vec<T>,
}

impl<T> WaveformSampler<T> {
    /// Sampler that finally yields at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            stride: 1,
            offered: 0,
            items: Vec::with_capacity(2 * capacity),
        }
    }

    /// Offer the next item of the stream
    pub fn offer(&mut self, item: T) {
        if self.offered % self.stride == 0 {
            self.items.push(item);
            if self.items.len() >= 2 * self.capacity {
                let mut index = 0usize;
                self.items.retain(|_| {
                    let keep = index % 2 == 0;
                    index += 1;
                    keep
                });
                self.stride *= 2;
            }
        }
        self.offered += 1;
    }

    /// Items offered so far
    pub fn offered(&self) -> u64 {
        self.offered
    }

    /// Items currently held
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// At most `capacity` items, evenly picked from those held
    pub fn finish(self) -> Vec<T> {
        let held = self.items.len();
        if held <= self.capacity {
            return self.items;
        }
        let capacity = self.capacity;
        let mut items: Vec<Option<T>> = self.items.into_iter().map(Some).collect();
        (0..capacity)
            .filter_map(|k| items[k * held / capacity].take())
            .collect()
    }
}
