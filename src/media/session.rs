use std::ops::{Deref, DerefMut};
use tracing::debug;

use super::Release;

/// Scoped ownership of an open media handle.
///
/// The handle is released when the session is dropped, so an early `?` or a
/// dropped future cannot leave a capture process or recorder running.
pub struct Session<T: ?Sized + Release> {
    label: &'static str,
    inner: Box<T>,
}

impl<T: ?Sized + Release> Session<T> {
    pub fn new(label: &'static str, inner: Box<T>) -> Self {
        debug!("Opened {}", label);
        Self { label, inner }
    }
}

impl<T: ?Sized + Release> Deref for Session<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized + Release> DerefMut for Session<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: ?Sized + Release> Drop for Session<T> {
    fn drop(&mut self) {
        self.inner.release();
        debug!("Released {}", self.label);
    }
}
