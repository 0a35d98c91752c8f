use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::oauth::DeviceCodeResponse;

/// Smallest wait after a slow-down signal.
pub const MIN_BACK_OFF: Duration = Duration::from_secs(1);

/// Lifecycle of a single device flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Created,
    AwaitingVerification,
    Completed,
    Canceled,
    Failed,
}

/// Mutable state of an in-progress device flow.
#[derive(Debug, Clone, Default)]
pub struct DeviceFlowSession {
    device_code: Option<String>,
    interval: Duration,
    expires_in: Duration,
}

impl DeviceFlowSession {
    /// Replace any previous grant with a freshly issued one.
    pub(crate) fn start(&mut self, grant: &DeviceCodeResponse) {
        self.device_code = Some(grant.device_code.clone());
        self.interval = grant.interval();
        self.expires_in = grant.expires_in();
    }

    pub(crate) fn device_code(&self) -> Option<&str> {
        self.device_code.as_deref()
    }

    pub fn has_device_code(&self) -> bool {
        self.device_code.is_some()
    }

    /// Wait between polls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Lifetime the authority granted the device code.
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Double the poll interval after a slow-down signal.
    ///
    /// A zero interval is raised to [`MIN_BACK_OFF`] so that slowing down always waits.
    pub fn back_off(&mut self) -> Duration {
        self.interval = self.interval.saturating_mul(2).max(MIN_BACK_OFF);
        self.interval
    }
}

/// Cooperative cancellation shared between the wait loop and its caller.
///
/// The flag only ever moves from unset to set; the loop checks it between
/// polls, never during a request.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelFlags>,
}

#[derive(Debug, Default)]
struct CancelFlags {
    requested: AtomicBool,
    throw_on_cancel: AtomicBool,
}

impl CancelHandle {
    pub fn cancel(&self, throw_on_cancel: bool) {
        self.inner
            .throw_on_cancel
            .store(throw_on_cancel, Ordering::Relaxed);
        self.inner.requested.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    pub(crate) fn throws(&self) -> bool {
        self.inner.throw_on_cancel.load(Ordering::Relaxed)
    }
}
