// src/api/events.rs — Per-run event fan-out for the SSE stream

use serde::Serialize;
use tokio::sync::broadcast;

use crate::infra::config::EventsConfig;
use crate::pipeline::{LogChannel, ProgressSnapshot};
use crate::session::RunObserver;
use crate::util::truncate_message;

/// One event on a run's stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunEvent {
    StimulusUpdate {
        run_id: String,
        #[serde(rename = "type")]
        channel: LogChannel,
        message: String,
        timestamp: f64,
    },
    ProgressUpdate {
        run_id: String,
        progress: u8,
        timestamp: f64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::StimulusUpdate { run_id, .. } | RunEvent::ProgressUpdate { run_id, .. } => {
                run_id
            }
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::StimulusUpdate { .. } => "stimulus_update",
            RunEvent::ProgressUpdate { .. } => "progress_update",
        }
    }
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Broadcast hub shared by every run. Subscribers filter by run id.
pub struct EventHub {
    sender: broadcast::Sender<RunEvent>,
    max_message_chars: usize,
}

impl EventHub {
    pub fn new(config: &EventsConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            max_message_chars: config.max_message_chars,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RunEvent) {
        // No subscribers is the common case between page loads.
        let _ = self.sender.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(&EventsConfig::default())
    }
}

impl RunObserver for EventHub {
    fn on_log(&self, run_id: &str, channel: LogChannel, text: &str) {
        tracing::debug!(run_id, channel = %channel, "{}", crate::util::truncate_str(text, 200));
        self.publish(RunEvent::StimulusUpdate {
            run_id: run_id.to_string(),
            channel,
            message: truncate_message(text, self.max_message_chars),
            timestamp: now_seconds(),
        });
    }

    fn on_progress(&self, run_id: &str, progress: ProgressSnapshot) {
        self.publish(RunEvent::ProgressUpdate {
            run_id: run_id.to_string(),
            progress: progress.percent(),
            timestamp: now_seconds(),
        });
    }
}
