// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Completion futures for front-end requests.
//!
//! [`completion`] returns a [`Done`] callback to pass to a front-end
//! operation and a [`Completion`] that resolves once the callback ran.
//! Completions still have to be driven by interrupts or
//! [`SecEngine::poll`](crate::SecEngine::poll).

use crate::error::{RequestError, SecError, SecResult};
use crate::frontend::Done;
use tokio::sync::oneshot;

/// Receiving half of a front-end completion.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, RequestError>>,
}

/// Create a completion callback and the future it resolves.
pub fn completion<T: Send + 'static>() -> (Done<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    let done: Done<T> = Box::new(move |status| {
        // The receiver may be gone; nobody is waiting then.
        let _ = tx.send(status);
    });
    (done, Completion { rx })
}

fn flatten<T>(status: Result<T, RequestError>) -> SecResult<T> {
    status.map_err(SecError::from)
}

impl<T> Completion<T> {
    /// Wait for the request to complete.
    ///
    /// Fails with [`SecError::Dropped`] when the callback was dropped
    /// without running, which happens when the submission was rejected.
    pub async fn wait(self) -> SecResult<T> {
        match self.rx.await {
            Ok(status) => flatten(status),
            Err(_) => Err(SecError::Dropped),
        }
    }

    /// Outcome if the request has completed, without waiting.
    pub fn try_take(&mut self) -> Option<SecResult<T>> {
        match self.rx.try_recv() {
            Ok(status) => Some(flatten(status)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SecError::Dropped)),
        }
    }

    /// Block the current thread until the request completes. Must not be
    /// called from inside an async runtime.
    pub fn blocking_wait(self) -> SecResult<T> {
        match self.rx.blocking_recv() {
            Ok(status) => flatten(status),
            Err(_) => Err(SecError::Dropped),
        }
    }
}
