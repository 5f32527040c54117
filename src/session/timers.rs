//! Request-scoped feedback tasks: the "thinking" counter and the rotating
//! loading message. Both are aborted when [`FeedbackTimers`] is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};

use super::SessionEvent;

pub static LOADING_MESSAGES: [&str; 7] = [
    "Analyzing prompt structure...",
    "Identifying key intent...",
    "Comparing against best practices...",
    "Adapting for target model...",
    "Generating optimized version...",
    "Calculating differences...",
    "Finalizing improvements...",
];

/// Shared view of the thinking counter.
#[derive(Debug, Clone, Default)]
pub struct ThinkingState {
    active: Arc<AtomicBool>,
    secs: Arc<AtomicU64>,
}

impl ThinkingState {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Stops the thinking counter. Cloneable so the first-token hook can own one.
#[derive(Debug, Clone)]
pub struct ThinkingStop {
    abort: AbortHandle,
    state: ThinkingState,
    events: broadcast::Sender<SessionEvent>,
}

impl ThinkingStop {
    pub fn stop(&self) {
        self.abort.abort();
        if self.state.active.swap(false, Ordering::SeqCst) {
            self.state.secs.store(0, Ordering::SeqCst);
            let _ = self.events.send(SessionEvent::ThinkingStopped);
        }
    }
}

pub struct FeedbackTimers {
    thinking: ThinkingStop,
    loading: JoinHandle<()>,
}

impl FeedbackTimers {
    pub fn start(
        state: &ThinkingState,
        events: &broadcast::Sender<SessionEvent>,
        loading_interval: Duration,
    ) -> Self {
        state.secs.store(0, Ordering::SeqCst);
        state.active.store(true, Ordering::SeqCst);

        let ticking = state.clone();
        let tx = events.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                if !ticking.is_active() {
                    break;
                }
                let n = ticking.secs.fetch_add(1, Ordering::SeqCst) + 1;
                // A stop that raced the increment must still leave zero behind.
                if !ticking.is_active() {
                    ticking.secs.store(0, Ordering::SeqCst);
                    break;
                }
                let _ = tx.send(SessionEvent::ThinkingTick(n));
            }
        });

        let tx = events.clone();
        let loading = tokio::spawn(async move {
            let mut interval = tokio::time::interval(loading_interval.max(Duration::from_millis(10)));
            for message in LOADING_MESSAGES.iter().cycle() {
                interval.tick().await;
                let _ = tx.send(SessionEvent::LoadingMessage(*message));
            }
        });

        Self {
            thinking: ThinkingStop {
                abort: ticker.abort_handle(),
                state: state.clone(),
                events: events.clone(),
            },
            loading,
        }
    }

    pub fn thinking_stop(&self) -> ThinkingStop {
        self.thinking.clone()
    }
}

impl Drop for FeedbackTimers {
    fn drop(&mut self) {
        self.thinking.stop();
        self.loading.abort();
    }
}
