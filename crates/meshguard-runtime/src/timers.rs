//! Deadlines for the Core Logic task
//!
//! Timers never touch state; they only post a [`TimerEvent`] back into the
//! event channel, and the loop decides whether the deadline still matters.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use meshguard_core::channel::EventSender;
use meshguard_core::{Event, TimerEvent};

#[derive(Debug, Clone)]
pub struct TimerService {
    events: EventSender,
}

impl TimerService {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Post `event` once after `after`
    pub fn arm(&self, after: Duration, event: TimerEvent) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if events.send(Event::Timer(event)).await.is_err() {
                tracing::trace!("timer {:?} fired after shutdown", event);
            }
        })
    }

    /// Post `event` every `period`, starting one period from now
    pub fn every(&self, period: Duration, event: TimerEvent) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if events.send(Event::Timer(event)).await.is_err() {
                    break;
                }
            }
        })
    }
}
