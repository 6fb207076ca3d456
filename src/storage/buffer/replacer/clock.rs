use crate::common::types::FrameId;

#[derive(Debug, Clone, Copy, Default)]
struct ClockSlot {
    /// Frame currently holds a page
    present: bool,
    /// Second-chance bit, set on access and cleared by the sweep
    referenced: bool,
    /// Frame is unpinned and may be chosen as a victim
    evictable: bool,
}

/// Second-chance (clock) page replacement.
///
/// Slots form a ring indexed by frame ID. The hand sweeps the ring at most
/// twice: referenced slots lose their bit, a clean unreferenced slot is
/// taken at once, and unreferenced dirty slots are remembered. When two
/// laps turn up no clean slot, the first remembered dirty slot is returned
/// and the caller must write it out before reuse.
#[derive(Debug)]
pub struct ClockReplacer {
    slots: Vec<ClockSlot>,
    hand: usize,
}

impl ClockReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            slots: vec![ClockSlot::default(); pool_size],
            hand: 0,
        }
    }

    /// Start tracking a frame that was just filled. New pages start
    /// referenced and pinned.
    pub fn insert(&mut self, frame_id: FrameId) {
        if let Some(slot) = self.slots.get_mut(frame_id as usize) {
            *slot = ClockSlot {
                present: true,
                referenced: true,
                evictable: false,
            };
        }
    }

    /// Record that a frame has been accessed
    pub fn record_access(&mut self, frame_id: FrameId) {
        if let Some(slot) = self.slots.get_mut(frame_id as usize) {
            slot.referenced = true;
        }
    }

    /// Mark a frame as (un)pinned
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(slot) = self.slots.get_mut(frame_id as usize) {
            slot.evictable = evictable;
        }
    }

    /// Stop tracking a frame
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(slot) = self.slots.get_mut(frame_id as usize) {
            *slot = ClockSlot::default();
        }
    }

    /// Whether the frame's reference bit is currently set
    pub fn is_referenced(&self, frame_id: FrameId) -> bool {
        self.slots
            .get(frame_id as usize)
            .is_some_and(|slot| slot.referenced)
    }

    /// Number of frames that could be chosen right now
    pub fn evictable_count(&self) -> usize {
        self.slots.iter().filter(|s| s.present && s.evictable).count()
    }

    /// Pick a victim frame. `is_dirty` is consulted only for evictable
    /// frames whose reference bit is already clear. The chosen frame stays
    /// tracked until the caller removes it.
    pub fn victim(&mut self, mut is_dirty: impl FnMut(FrameId) -> bool) -> Option<FrameId> {
        let ring_len = self.slots.len();
        let mut dirty_candidate = None;

        for _ in 0..2 * ring_len {
            let index = self.hand;
            self.hand = (self.hand + 1) % ring_len;

            let slot = &mut self.slots[index];
            if !slot.present || !slot.evictable {
                continue;
            }
            if slot.referenced {
                slot.referenced = false;
                continue;
            }

            let frame_id = index as FrameId;
            if !is_dirty(frame_id) {
                return Some(frame_id);
            }
            if dirty_candidate.is_none() {
                dirty_candidate = Some(frame_id);
            }
        }

        dirty_candidate
    }
}
