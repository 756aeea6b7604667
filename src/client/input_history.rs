use crate::game::components::Input;
use crate::game::tick_clock::TickNum;

/// Fixed-size ring of the inputs the client predicted with
///
/// Slot `tick % capacity` holds `(tick, input)`; keeping the tick lets a
/// lookup tell a live entry from one that has been overwritten.
#[derive(Debug, Clone)]
pub struct InputHistory {
    slots: Vec<Option<(TickNum, Input)>>,
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, tick: TickNum) -> usize {
        tick as usize % self.slots.len()
    }

    pub fn record(&mut self, tick: TickNum, input: Input) {
        let idx = self.slot(tick);
        self.slots[idx] = Some((tick, input));
    }

    /// Input used on `tick`, if it is still held
    pub fn get(&self, tick: TickNum) -> Option<Input> {
        match self.slots[self.slot(tick)] {
            Some((stored, input)) if stored == tick => Some(input),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::{InputState, InputType};

    #[test]
    fn test_record_and_get() {
        let mut history = InputHistory::new(4);
        let up = Input::default().with(InputType::Up, InputState::Pressed);
        history.record(10, up);
        assert_eq!(history.get(10), Some(up));
        assert_eq!(history.get(11), None);
    }

    #[test]
    fn test_evicted_slot_detected() {
        let mut history = InputHistory::new(4);
        for tick in 0..6 {
            history.record(tick, Input::default());
        }
        // 0 and 1 were overwritten by 4 and 5
        assert_eq!(history.get(0), None);
        assert_eq!(history.get(1), None);
        assert!(history.get(2).is_some());
        assert!(history.get(5).is_some());

        history.clear();
        assert_eq!(history.get(5), None);
    }
}
