//! Ready-made event sinks: an in-memory history recorder and a console logger.

use crate::error::ForemanResult;
use crate::event::{Event, EventType};
use crate::event_bus::{EventBus, Subscription};
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Records every event published after it is attached.
///
/// This is the replay log: the bus keeps no history of its own.
#[derive(Debug)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
    subscription: Subscription,
}

impl EventRecorder {
    /// Subscribe to all events on `bus`.
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = bus.subscribe_all(move |event| sink.lock().push(event.clone()));
        Self {
            events,
            subscription,
        }
    }

    /// Snapshot of the history so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Recorded events of one type, in publication order.
    pub fn of_type(&self, event_type: EventType) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Serialize the history as JSON Lines, one event per line.
    pub fn to_jsonl(&self) -> ForemanResult<String> {
        let events = self.events.lock();
        let mut out = String::new();
        for event in events.iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write the history to `path` as JSON Lines, replacing any existing file.
    pub fn write_jsonl(&self, path: &Path) -> ForemanResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(self.to_jsonl()?.as_bytes())?;
        Ok(())
    }

    /// Stop recording. Already recorded events are kept.
    pub fn detach(&self) {
        self.subscription.unsubscribe();
    }
}

/// Parse a JSON Lines history written by [`EventRecorder::write_jsonl`].
pub fn read_jsonl(contents: &str) -> ForemanResult<Vec<Event>> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

/// Logs every event through `tracing`.
#[derive(Debug)]
pub struct ConsoleSink {
    subscription: Subscription,
}

impl ConsoleSink {
    /// Subscribe to all events on `bus`.
    pub fn attach(bus: &EventBus) -> Self {
        let subscription = bus.subscribe_all(|event| {
            let agent = event.agent_id().map(ToString::to_string).unwrap_or_default();
            let task = event.task_id().as_ref().map(ToString::to_string).unwrap_or_default();
            match event.event_type() {
                EventType::TaskFailed | EventType::AgentError | EventType::BuildFailed => warn!(
                    event_id = event.id(),
                    event_type = %event.event_type(),
                    agent = %agent,
                    task = %task,
                    data = %event.data(),
                    "event"
                ),
                _ => info!(
                    event_id = event.id(),
                    event_type = %event.event_type(),
                    agent = %agent,
                    task = %task,
                    data = %event.data(),
                    "event"
                ),
            }
        });
        Self { subscription }
    }

    /// Stop logging.
    pub fn detach(&self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ids::TaskId;

    #[test]
    fn test_recorder_collects_and_filters() {
        let bus = EventBus::new();
        let recorder = EventRecorder::attach(&bus);
        bus.emit(EventType::GoalSet, None, None, serde_json::json!({"goal": "ship"}));
        bus.emit(
            EventType::TaskCreated,
            None,
            Some(TaskId::new(1)),
            serde_json::Value::Null,
        );
        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.of_type(EventType::TaskCreated).len(), 1);

        recorder.detach();
        bus.emit(EventType::RunStopped, None, None, serde_json::Value::Null);
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_jsonl_file_round_trip() {
        let bus = EventBus::new();
        let recorder = EventRecorder::attach(&bus);
        bus.emit(EventType::RunStarted, None, None, serde_json::Value::Null);
        bus.emit(EventType::RunStopped, None, None, serde_json::json!({"reason": "done"}));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        recorder.write_jsonl(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let events = read_jsonl(&contents).unwrap();
        assert_eq!(events, recorder.events());
    }

    #[test]
    fn test_console_sink_counts_as_subscriber() {
        let bus = EventBus::new();
        let sink = ConsoleSink::attach(&bus);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(&Event::new(1, EventType::TaskFailed)), 1);
        sink.detach();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
