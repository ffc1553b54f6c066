use crate::domain::clock::clock::Clock;

use std::sync::{Arc, RwLock};

/// Fixed, externally settable time for tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    pub time: Arc<RwLock<i64>>,
}

impl MockClock {
    pub fn new(time: i64) -> MockClock {
        MockClock { time: Arc::new(RwLock::new(time)) }
    }

    pub fn set(&self, time: i64) {
        if let Ok(mut t) = self.time.write() {
            *t = time;
        }
    }
}

impl Clock for MockClock {
    fn now_in_s(&self) -> i64 {
        self.time.read().map(|t| *t).unwrap_or(0)
    }
}
