//! Diagnostic events attached to hardware objects.

use std::sync::Mutex;

use tracing::{info, warn};

use part_core::HardwareRef;

pub const REASON_FEATURE_DISABLED: &str = "FeatureDisabled";
pub const REASON_EXCLUSIVE_FALLBACK: &str = "ExclusiveFallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Sink for events about a physical GPU.
pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &HardwareRef, event_type: EventType, reason: &str, message: &str);
}

/// Recorder that writes events to the log.
#[derive(Debug, Default)]
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn record(&self, object: &HardwareRef, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Warning => warn!(gpu = %object, reason, "{message}"),
            EventType::Normal => info!(gpu = %object, reason, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: HardwareRef,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Recorder that keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, reason: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.reason == reason)
            .count()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, object: &HardwareRef, event_type: EventType, reason: &str, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedEvent {
                object: object.clone(),
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
            });
    }
}
