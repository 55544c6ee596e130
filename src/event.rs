use crate::http::Request;

/// Worker lifecycle events, delivered by the hosting runtime and routed by
/// [`crate::worker::Worker::dispatch`].
#[derive(Debug)]
pub enum Event {
  /// Precache the app shell.
  Install,
  /// Garbage-collect stale partitions and take control of open clients.
  Activate,
  /// An intercepted application request.
  Fetch(Request),
  /// A command posted to the worker.
  Message(Command),
}

/// Commands recognized on the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  /// Bypass the waiting phase and take control immediately.
  SkipWaiting,
}
