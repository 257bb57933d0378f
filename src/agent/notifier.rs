//! Human-readable progress reporting.

/// Receives progress text. Nothing flows back into the turn loop.
pub trait Notifier: Send + Sync {
    fn status(&self, text: &str);
}

/// Emits status lines as `info` events on the `rtloop::status` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn status(&self, text: &str) {
        tracing::info!(target: "rtloop::status", "{text}");
    }
}

/// Discards all status text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn status(&self, _text: &str) {}
}

impl<F> Notifier for F
where
    F: Fn(&str) + Send + Sync,
{
    fn status(&self, text: &str) {
        self(text)
    }
}
