//! Sliding-window, attention-sink-preserving KV cache (spec §2.C, §3, §4.C).
//!
//! Each layer keeps two physically separate regions: `sink` slots that
//! are written exactly once (the first `sink` tokens ever inserted,
//! forever) and a `window`-slot ring that every later token cycles
//! through. The window ring never touches the sink's storage, so the
//! sink can't be clobbered by a wrapping write.

use crate::precision::Precision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Filling,
    Saturated,
}

/// A possibly-discontiguous view into one layer's retained range, in
/// logical (oldest-to-newest) order. More than two parts are possible:
/// the sink region plus up to two ring segments when the ring has
/// wrapped.
pub struct RingView<'a> {
    pub parts: Vec<&'a [u8]>,
    pub total_len: usize,
}

/// Per-layer key/value storage (spec §3's `LayerCache`): a fixed sink
/// buffer plus a circular window buffer.
pub struct LayerCache {
    sink_keys: Vec<u8>,
    sink_values: Vec<u8>,
    ring_keys: Vec<u8>,
    ring_values: Vec<u8>,
    key_scratch: Vec<u8>,
    value_scratch: Vec<u8>,
    sink_filled: usize,
    ring_pushes: usize,
    total_seen: usize,
    sink: usize,
    window: usize,
    slot_bytes: usize,
}

impl LayerCache {
    fn new(window: usize, sink: usize, slot_bytes: usize) -> Self {
        Self {
            sink_keys: vec![0u8; sink * slot_bytes],
            sink_values: vec![0u8; sink * slot_bytes],
            ring_keys: vec![0u8; window * slot_bytes],
            ring_values: vec![0u8; window * slot_bytes],
            key_scratch: Vec::new(),
            value_scratch: Vec::new(),
            sink_filled: 0,
            ring_pushes: 0,
            total_seen: 0,
            sink,
            window,
            slot_bytes,
        }
    }

    pub fn state(&self, sink_plus_window: usize) -> CacheState {
        if self.total_seen == 0 {
            CacheState::Empty
        } else if self.total_seen < sink_plus_window {
            CacheState::Filling
        } else {
            CacheState::Saturated
        }
    }

    pub fn retained_len(&self, capacity: usize) -> usize {
        self.total_seen.min(capacity)
    }

    fn reset(&mut self) {
        self.sink_keys.fill(0);
        self.sink_values.fill(0);
        self.ring_keys.fill(0);
        self.ring_values.fill(0);
        self.sink_filled = 0;
        self.ring_pushes = 0;
        self.total_seen = 0;
    }

    /// Appends `added_len` new tokens' worth of bytes (already
    /// contiguous in `new_keys`/`new_values`), one token at a time: the
    /// first `sink` tokens ever seen land permanently in the sink
    /// buffer; every token after that cycles through the window ring.
    /// `sink` must equal `self.sink`.
    fn append(&mut self, new_keys: &[u8], new_values: &[u8], added_len: usize, sink: usize) {
        debug_assert_eq!(sink, self.sink);
        for t in 0..added_len {
            let key_chunk = &new_keys[t * self.slot_bytes..(t + 1) * self.slot_bytes];
            let value_chunk = &new_values[t * self.slot_bytes..(t + 1) * self.slot_bytes];

            if self.sink_filled < self.sink {
                let slot = self.sink_filled;
                self.sink_keys[slot * self.slot_bytes..(slot + 1) * self.slot_bytes]
                    .copy_from_slice(key_chunk);
                self.sink_values[slot * self.slot_bytes..(slot + 1) * self.slot_bytes]
                    .copy_from_slice(value_chunk);
                self.sink_filled += 1;
            } else if self.window > 0 {
                let slot = self.ring_pushes % self.window;
                self.ring_keys[slot * self.slot_bytes..(slot + 1) * self.slot_bytes]
                    .copy_from_slice(key_chunk);
                self.ring_values[slot * self.slot_bytes..(slot + 1) * self.slot_bytes]
                    .copy_from_slice(value_chunk);
                self.ring_pushes += 1;
            }
            // window == 0 and the sink is already full: this token is
            // outside both retained regions and is simply dropped.

            self.total_seen += 1;
        }
    }

    /// Splits `buf` (the ring's own key or value storage) into its
    /// logical-order segments: `None` if the ring is empty, one slice
    /// if it hasn't wrapped yet, two if it has. Takes plain copies of
    /// the ring metadata (not `&self`) so callers can build a view
    /// without holding a borrow of the whole cache — needed because
    /// the contiguous accessors below build a view and then write into
    /// a different field (`key_scratch`/`value_scratch`) right after.
    fn ring_segments(
        ring_pushes: usize,
        window: usize,
        slot_bytes: usize,
        buf: &[u8],
    ) -> (Option<&[u8]>, Option<&[u8]>) {
        let len = ring_pushes.min(window);
        if len == 0 {
            return (None, None);
        }
        let start = if ring_pushes <= window {
            0
        } else {
            ring_pushes % window
        };
        if start + len <= window {
            (Some(&buf[start * slot_bytes..(start + len) * slot_bytes]), None)
        } else {
            let first_len = window - start;
            let second_len = len - first_len;
            (
                Some(&buf[start * slot_bytes..window * slot_bytes]),
                Some(&buf[0..second_len * slot_bytes]),
            )
        }
    }

    fn build_view<'a>(
        sink_filled: usize,
        ring_pushes: usize,
        window: usize,
        slot_bytes: usize,
        sink_buf: &'a [u8],
        ring_buf: &'a [u8],
    ) -> RingView<'a> {
        let mut parts = Vec::with_capacity(3);
        if sink_filled > 0 {
            parts.push(&sink_buf[0..sink_filled * slot_bytes]);
        }
        let (ring1, ring2) = Self::ring_segments(ring_pushes, window, slot_bytes, ring_buf);
        if let Some(p) = ring1 {
            parts.push(p);
        }
        if let Some(p) = ring2 {
            parts.push(p);
        }
        let total_len = sink_filled + ring_pushes.min(window);
        RingView { parts, total_len }
    }

    pub fn get_key_view(&self) -> RingView<'_> {
        Self::build_view(
            self.sink_filled,
            self.ring_pushes,
            self.window,
            self.slot_bytes,
            &self.sink_keys,
            &self.ring_keys,
        )
    }

    pub fn get_value_view(&self) -> RingView<'_> {
        Self::build_view(
            self.sink_filled,
            self.ring_pushes,
            self.window,
            self.slot_bytes,
            &self.sink_values,
            &self.ring_values,
        )
    }

    /// Returns a pointer to the retained range when it is a single
    /// contiguous slice; otherwise materializes a contiguous copy into
    /// the per-layer scratch buffer (resized lazily, kept alive for the
    /// cache's lifetime).
    pub fn get_key_contiguous(&mut self) -> &[u8] {
        let (sink_filled, ring_pushes, window, slot_bytes) =
            (self.sink_filled, self.ring_pushes, self.window, self.slot_bytes);
        let view = Self::build_view(
            sink_filled, ring_pushes, window, slot_bytes, &self.sink_keys, &self.ring_keys,
        );
        if view.parts.len() <= 1 {
            return Self::contiguous_single(
                sink_filled, ring_pushes, window, slot_bytes, &self.sink_keys, &self.ring_keys,
            );
        }
        let total_bytes = view.total_len * slot_bytes;
        if self.key_scratch.len() < total_bytes {
            self.key_scratch.resize(total_bytes, 0);
        }
        let mut offset = 0;
        for part in &view.parts {
            self.key_scratch[offset..offset + part.len()].copy_from_slice(part);
            offset += part.len();
        }
        &self.key_scratch[..total_bytes]
    }

    pub fn get_value_contiguous(&mut self) -> &[u8] {
        let (sink_filled, ring_pushes, window, slot_bytes) =
            (self.sink_filled, self.ring_pushes, self.window, self.slot_bytes);
        let view = Self::build_view(
            sink_filled, ring_pushes, window, slot_bytes, &self.sink_values, &self.ring_values,
        );
        if view.parts.len() <= 1 {
            return Self::contiguous_single(
                sink_filled, ring_pushes, window, slot_bytes, &self.sink_values, &self.ring_values,
            );
        }
        let total_bytes = view.total_len * slot_bytes;
        if self.value_scratch.len() < total_bytes {
            self.value_scratch.resize(total_bytes, 0);
        }
        let mut offset = 0;
        for part in &view.parts {
            self.value_scratch[offset..offset + part.len()].copy_from_slice(part);
            offset += part.len();
        }
        &self.value_scratch[..total_bytes]
    }

    /// Fast path for `get_{key,value}_contiguous` when the retained
    /// range is zero or one part: the sink alone (ring empty), the ring
    /// alone unwrapped (sink empty, i.e. `sink == 0`), or nothing.
    /// Never reached when both sink and ring hold data, since that is
    /// always at least two parts.
    fn contiguous_single<'a>(
        sink_filled: usize,
        ring_pushes: usize,
        window: usize,
        slot_bytes: usize,
        sink_buf: &'a [u8],
        ring_buf: &'a [u8],
    ) -> &'a [u8] {
        if sink_filled > 0 {
            &sink_buf[0..sink_filled * slot_bytes]
        } else {
            let (ring1, _) = Self::ring_segments(ring_pushes, window, slot_bytes, ring_buf);
            ring1.unwrap_or(&ring_buf[0..0])
        }
    }
}

/// Array of `LayerCache` plus shared geometry (spec §3's `KVCache`).
pub struct KVCache {
    layers: Vec<LayerCache>,
    pub window: usize,
    pub sink: usize,
    pub kv_heads: usize,
    pub head_dim: usize,
    pub precision: Precision,
}

impl KVCache {
    pub fn init(
        num_layers: usize,
        window: usize,
        sink: usize,
        kv_heads: usize,
        head_dim: usize,
        precision: Precision,
    ) -> Self {
        let slot_bytes = kv_heads * head_dim * precision.element_size();
        let layers = (0..num_layers)
            .map(|_| LayerCache::new(window, sink, slot_bytes))
            .collect();
        Self {
            layers,
            window,
            sink,
            kv_heads,
            head_dim,
            precision,
        }
    }

    pub fn capacity(&self) -> usize {
        self.window + self.sink
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn state(&self, layer: usize) -> CacheState {
        self.layers[layer].state(self.capacity())
    }

    pub fn current_len(&self, layer: usize) -> usize {
        self.layers[layer].retained_len(self.capacity())
    }

    pub fn total_seen(&self, layer: usize) -> usize {
        self.layers[layer].total_seen
    }

    /// Appends `added_len` newly produced tokens of key/value bytes for
    /// `layer`, sliding the window (with sink preservation) as needed.
    pub fn update_layer(&mut self, layer: usize, new_keys: &[u8], new_values: &[u8], added_len: usize) {
        self.layers[layer].append(new_keys, new_values, added_len, self.sink);
    }

    pub fn get_key_view(&self, layer: usize) -> RingView<'_> {
        self.layers[layer].get_key_view()
    }

    pub fn get_value_view(&self, layer: usize) -> RingView<'_> {
        self.layers[layer].get_value_view()
    }

    pub fn get_key_ptr(&mut self, layer: usize) -> &[u8] {
        self.layers[layer].get_key_contiguous()
    }

    pub fn get_value_ptr(&mut self, layer: usize) -> &[u8] {
        self.layers[layer].get_value_contiguous()
    }

    /// Returns every layer to `Empty`.
    pub fn reset(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_token(cache: &mut KVCache, layer: usize, id: u8) {
        let slot_bytes = cache.kv_heads * cache.head_dim * cache.precision.element_size();
        let bytes = vec![id; slot_bytes];
        cache.update_layer(layer, &bytes, &bytes, 1);
    }

    fn flatten(view: &RingView) -> Vec<u8> {
        let mut out = Vec::with_capacity(view.total_len);
        for part in &view.parts {
            out.extend_from_slice(part);
        }
        out
    }

    #[test]
    fn sink_preservation_across_window_slide() {
        // window = 4, sink = 2: scenario S4 from the testable-properties list.
        let mut cache = KVCache::init(1, 4, 2, 1, 1, Precision::I8);
        for id in 1..=10u8 {
            push_token(&mut cache, 0, id);
        }
        let view = cache.get_key_view(0);
        assert_eq!(flatten(&view), vec![1, 2, 7, 8, 9, 10]);
    }

    #[test]
    fn sink_bytes_survive_many_window_slides() {
        // Push well past several full window cycles and confirm the
        // sink still reports the very first tokens, never the tokens
        // that happen to currently sit at low physical addresses.
        let mut cache = KVCache::init(1, 3, 2, 1, 1, Precision::I8);
        for id in 1..=50u8 {
            push_token(&mut cache, 0, id);
        }
        let view = cache.get_key_view(0);
        let bytes = flatten(&view);
        assert_eq!(&bytes[..2], &[1, 2]);
        assert_eq!(&bytes[2..], &[48, 49, 50]);
    }

    #[test]
    fn contiguous_accessor_matches_view_after_wrap() {
        let mut cache = KVCache::init(1, 4, 2, 1, 1, Precision::I8);
        for id in 1..=10u8 {
            push_token(&mut cache, 0, id);
        }
        let expected = flatten(&cache.get_key_view(0));
        assert_eq!(cache.get_key_ptr(0), expected.as_slice());
    }

    #[test]
    fn state_machine_transitions() {
        let mut cache = KVCache::init(1, 4, 2, 1, 1, Precision::F32);
        assert_eq!(cache.state(0), CacheState::Empty);
        push_token(&mut cache, 0, 1);
        assert_eq!(cache.state(0), CacheState::Filling);
        for id in 2..=6u8 {
            push_token(&mut cache, 0, id);
        }
        assert_eq!(cache.state(0), CacheState::Saturated);
        cache.reset();
        assert_eq!(cache.state(0), CacheState::Empty);
    }

    #[test]
    fn retained_length_is_min_of_total_seen_and_capacity() {
        let mut cache = KVCache::init(1, 4, 2, 1, 1, Precision::F32);
        for id in 1..=3u8 {
            push_token(&mut cache, 0, id);
        }
        assert_eq!(cache.current_len(0), 3);
        for id in 4..=10u8 {
            push_token(&mut cache, 0, id);
        }
        assert_eq!(cache.current_len(0), 6);
    }
}
