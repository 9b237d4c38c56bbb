//! Scripted collaborator gateways.
//!
//! Each gateway records every call it receives and answers from a queue
//! of scripted failures, succeeding once the queue is drained. Tests
//! script "fail twice with 503, then succeed" and assert on the call log.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use lumina_saga::{ActionError, AlbumGateway, MediaCommandGateway, NotificationGateway};

#[derive(Debug, Default)]
struct Script {
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<u16>>,
}

impl Script {
    fn push_failures(&self, times: usize, status: u16) {
        let mut failures = self.failures.lock();
        for _ in 0..times {
            failures.push_back(status);
        }
    }

    fn answer(&self, call: String) -> Result<(), ActionError> {
        self.calls.lock().push(call);
        match self.failures.lock().pop_front() {
            Some(status) => Err(ActionError::Remote {
                status,
                message: format!("scripted failure {status}"),
            }),
            None => Ok(()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// Scripted media command service.
#[derive(Debug, Default)]
pub struct ScriptedMediaCommand {
    process: Script,
    compensate: Script,
}

impl ScriptedMediaCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` process calls fail with `status`.
    pub fn fail_process(&self, times: usize, status: u16) {
        self.process.push_failures(times, status);
    }

    pub fn fail_compensate(&self, times: usize, status: u16) {
        self.compensate.push_failures(times, status);
    }

    pub fn process_calls(&self) -> Vec<String> {
        self.process.calls()
    }

    pub fn compensate_calls(&self) -> Vec<String> {
        self.compensate.calls()
    }
}

#[async_trait]
impl MediaCommandGateway for ScriptedMediaCommand {
    async fn process(&self, media_id: &str) -> Result<(), ActionError> {
        self.process.answer(media_id.to_string())
    }

    async fn compensate(
        &self,
        media_id: &str,
        saga_id: &str,
        reason: &str,
    ) -> Result<(), ActionError> {
        self.compensate
            .answer(format!("{media_id} saga={saga_id} reason={reason}"))
    }
}

/// Scripted album service.
#[derive(Debug, Default)]
pub struct ScriptedAlbum {
    add: Script,
    remove: Script,
}

impl ScriptedAlbum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_add(&self, times: usize, status: u16) {
        self.add.push_failures(times, status);
    }

    pub fn add_calls(&self) -> Vec<String> {
        self.add.calls()
    }

    pub fn remove_calls(&self) -> Vec<String> {
        self.remove.calls()
    }
}

#[async_trait]
impl AlbumGateway for ScriptedAlbum {
    async fn add_to_default(&self, media_id: &str, user_id: &str) -> Result<(), ActionError> {
        self.add.answer(format!("{media_id} user={user_id}"))
    }

    async fn remove_from_default(&self, media_id: &str) -> Result<(), ActionError> {
        self.remove.answer(media_id.to_string())
    }
}

/// Scripted notification service.
#[derive(Debug, Default)]
pub struct ScriptedNotifications {
    send: Script,
}

impl ScriptedNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_send(&self, times: usize, status: u16) {
        self.send.push_failures(times, status);
    }

    pub fn send_calls(&self) -> Vec<String> {
        self.send.calls()
    }
}

#[async_trait]
impl NotificationGateway for ScriptedNotifications {
    async fn send(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        media_id: &str,
    ) -> Result<(), ActionError> {
        self.send
            .answer(format!("{media_id} user={user_id} title={title} message={message}"))
    }
}
