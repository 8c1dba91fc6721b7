// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording notifier for testing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Notification, Notifier, NotifyError};

/// Keeps every notification it is handed. Can be told to fail delivery.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries all fail (after being recorded).
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    /// Notifications received so far.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn notifier_type(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}
