// THEORY:
// The ring buffer is the engine's short-term visual memory: a fixed number of
// owned raw frames, overwritten oldest-first. Each slot is an `Option<Vec<u8>>`,
// so a slot has at most one owner and overwriting or clearing it releases the old
// frame deterministically.
//
// Indices handed out by the buffer are always in `0..capacity`. Every step in
// either direction wraps modulo the capacity.

/// Default number of slots.
pub const DEFAULT_RING_CAPACITY: usize = 35;

#[derive(Debug, Clone)]
pub struct FrameRingBuffer {
    slots: Vec<Option<Vec<u8>>>,
    /// Slot the next frame will be written to.
    cursor: usize,
}

impl FrameRingBuffer {
    /// A buffer with at least one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Stores a copy of `frame` at the cursor, releasing the previous occupant.
    pub fn write(&mut self, frame: &[u8]) {
        match self.slots[self.cursor].as_mut() {
            Some(slot) if slot.len() == frame.len() => slot.copy_from_slice(frame),
            _ => self.slots[self.cursor] = Some(frame.to_vec()),
        }
        self.cursor = self.next_index(self.cursor);
    }

    /// Releases every frame and rewinds the cursor.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.cursor = 0;
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(index)?.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// `index` moved by `delta` slots, wrapping.
    pub fn offset(&self, index: usize, delta: isize) -> usize {
        let capacity = self.capacity() as isize;
        (index as isize + delta).rem_euclid(capacity) as usize
    }

    pub fn next_index(&self, index: usize) -> usize {
        self.offset(index, 1)
    }

    pub fn previous_index(&self, index: usize) -> usize {
        self.offset(index, -1)
    }

    /// Slot holding the most recently written frame.
    pub fn newest_index(&self) -> usize {
        self.previous_index(self.cursor)
    }

    /// Occupied slots from oldest to newest, with their indices.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = (usize, &[u8])> {
        (0..self.capacity()).filter_map(move |step| {
            let index = self.offset(self.cursor, step as isize);
            self.get(index).map(|frame| (index, frame))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraparound_keeps_the_latest_frames() {
        let capacity = 5;
        let mut ring = FrameRingBuffer::new(capacity);
        for value in 0..(capacity + 3) as u8 {
            ring.write(&[value; 4]);
        }

        assert_eq!(ring.len(), capacity);
        let retained: Vec<u8> = ring.iter_oldest_first().map(|(_, frame)| frame[0]).collect();
        assert_eq!(retained, vec![3, 4, 5, 6, 7]);
        assert_eq!(ring.get(ring.newest_index()), Some(&[7u8; 4][..]));
    }

    #[test]
    fn clear_releases_everything() {
        let mut ring = FrameRingBuffer::new(3);
        ring.write(&[1, 2]);
        ring.write(&[3, 4]);
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.get(0), None);
    }

    #[test]
    fn index_arithmetic_wraps_both_ways() {
        let ring = FrameRingBuffer::new(35);
        assert_eq!(ring.previous_index(0), 34);
        assert_eq!(ring.next_index(34), 0);
        assert_eq!(ring.offset(2, -32), 5);
        assert_eq!(ring.offset(30, 10), 5);
    }

    #[test]
    fn frames_of_a_new_size_replace_the_slot() {
        let mut ring = FrameRingBuffer::new(1);
        ring.write(&[1, 2, 3]);
        ring.write(&[9]);
        assert_eq!(ring.get(0), Some(&[9u8][..]));
    }

    #[test]
    fn zero_capacity_still_holds_one_frame() {
        let mut ring = FrameRingBuffer::new(0);
        ring.write(&[5]);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.len(), 1);
    }
}
