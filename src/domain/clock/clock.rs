use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time source for staleness checks and metric timestamps.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now_in_s(&self) -> i64;

    /// Called by the control loop once a slot has been fully processed.
    fn advance_slot(&self) {}
}

pub type SharedClock = Arc<dyn Clock>;

fn get_system_time_s() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs() as i64
}

/// Real wall-clock time. Slots are only a scheduling unit here.
#[derive(Debug, Clone, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_in_s(&self) -> i64 {
        get_system_time_s()
    }
}

#[derive(Debug)]
struct SlotClockState {
    base_timestamp: i64,
    slot_width_s: i64,
    current_slot: u64,
}

/// Simulated time: every processed slot moves the clock forward by one slot width, independent of how long
/// the slot took in real time. Used to replay a day of hourly slots in a few minutes.
#[derive(Debug, Clone)]
pub struct SlotClock {
    state: Arc<Mutex<SlotClockState>>,
}

impl SlotClock {
    pub fn new(base_timestamp: i64, slot_width_s: i64) -> Self {
        SlotClock { state: Arc::new(Mutex::new(SlotClockState { base_timestamp, slot_width_s, current_slot: 0 })) }
    }

    pub fn starting_now(slot_width_s: i64) -> Self {
        Self::new(get_system_time_s(), slot_width_s)
    }

    pub fn current_slot(&self) -> u64 {
        self.state.lock().map(|s| s.current_slot).unwrap_or(0)
    }
}

impl Clock for SlotClock {
    fn now_in_s(&self) -> i64 {
        match self.state.lock() {
            Ok(state) => state.base_timestamp + state.current_slot as i64 * state.slot_width_s,
            Err(poisoned) => {
                let state = poisoned.into_inner();
                state.base_timestamp + state.current_slot as i64 * state.slot_width_s
            }
        }
    }

    fn advance_slot(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.current_slot += 1;
        }
    }
}
