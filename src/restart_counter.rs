use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A sliding-window restart budget: a restart is granted iff fewer than `max_restarts`
///  restarts were granted within the last `window`. Timestamps of *granted* restarts are what
///  counts - denied attempts do not consume budget.
pub struct RestartCounter {
    max_restarts: u32,
    window: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl RestartCounter {
    pub fn new(max_restarts: u32, window: Duration) -> RestartCounter {
        RestartCounter {
            max_restarts,
            window,
            granted: Mutex::new(VecDeque::with_capacity(max_restarts as usize)),
        }
    }

    pub fn attempt_restart(&self) -> bool {
        let now = Instant::now();
        let mut granted = self.granted.lock().unwrap();

        while let Some(oldest) = granted.front() {
            if now.duration_since(*oldest) >= self.window {
                granted.pop_front();
            }
            else {
                break;
            }
        }

        if granted.len() < self.max_restarts as usize {
            granted.push_back(now);
            true
        }
        else {
            false
        }
    }
}
