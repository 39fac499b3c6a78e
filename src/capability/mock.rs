use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Notify;

use super::{AnalysisRequest, Capability, ImageInput, TextExtractor};

#[derive(Debug, Clone)]
enum Behavior {
    Succeed(String),
    Fail(String),
    Panic(String),
    Hang,
}

/// A scripted capability for tests.
///
/// Optionally waits on a gate and/or sleeps before producing its outcome,
/// so tests can observe a stage while it is still running.
pub struct MockCapability {
    name: String,
    behavior: Behavior,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<AnalysisRequest>>,
}

impl MockCapability {
    fn with_behavior(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn succeeding(name: &str, text: &str) -> Self {
        Self::with_behavior(name, Behavior::Succeed(text.to_string()))
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self::with_behavior(name, Behavior::Fail(error.to_string()))
    }

    pub fn panicking(name: &str, message: &str) -> Self {
        Self::with_behavior(name, Behavior::Panic(message.to_string()))
    }

    /// Never resolves. Only a timeout or cancellation ends it.
    pub fn hanging(name: &str) -> Self {
        Self::with_behavior(name, Behavior::Hang)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// How many times `invoke` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AnalysisRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &AnalysisRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            Behavior::Succeed(text) => Ok(text.clone()),
            Behavior::Fail(error) => Err(anyhow!("{error}")),
            Behavior::Panic(message) => panic!("{message}"),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// A scripted extractor for tests.
pub struct MockExtractor {
    outcome: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn succeeding(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            outcome: Err(error.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for MockExtractor {
    async fn extract(&self, _image: &ImageInput) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone().map_err(|error| anyhow!("{error}"))
    }
}
