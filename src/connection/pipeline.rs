//! Command Pipeline Queue and Reply Demultiplexer
//!
//! A pipelined connection may have many commands on the wire before the
//! first reply comes back. The server answers strictly in order, so the
//! pairing rule is simple: the oldest unanswered command owns the next
//! decoded reply.
//!
//! The queue holds one success callback and one failure callback per
//! outstanding command, in submission order. Both queues advance together;
//! index *i* in each corresponds to the *i*-th command sent and not yet
//! answered.

use std::collections::VecDeque;

use crate::connection::{CommandError, FailureCallback, ReplyCallback};
use crate::protocol::RespValue;

/// Ordered queue of continuation pairs for outstanding commands.
///
/// Only the connection driver touches this; both queues are private and
/// every mutation pushes or pops them together, which is what keeps the
/// lockstep invariant from ever being violated.
pub(crate) struct Pipeline {
    on_reply: VecDeque<ReplyCallback>,
    on_failure: VecDeque<FailureCallback>,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self {
            on_reply: VecDeque::new(),
            on_failure: VecDeque::new(),
        }
    }

    /// Enqueues the continuation pair for a newly submitted command.
    pub(crate) fn push(&mut self, on_reply: ReplyCallback, on_failure: FailureCallback) {
        self.on_reply.push_back(on_reply);
        self.on_failure.push_back(on_failure);
    }

    /// Resolves the oldest outstanding command with a decoded reply.
    ///
    /// An error reply (`-ERR ...`) goes to the failure callback with the
    /// decoded payload; anything else goes to the success callback. The
    /// callbacks are moved out and each command resolves at most once.
    ///
    /// # Panics
    ///
    /// Panics if no command is outstanding. A reply without a matching
    /// entry means the decoder and the queue have desynchronized, which
    /// is a programming error, not a runtime condition to report.
    pub(crate) fn resolve(&mut self, reply: RespValue) {
        debug_assert_eq!(self.on_reply.len(), self.on_failure.len());

        let on_reply = self
            .on_reply
            .pop_front()
            .expect("reply arrived with no command outstanding");
        let on_failure = self
            .on_failure
            .pop_front()
            .expect("reply arrived with no command outstanding");

        match reply {
            RespValue::Error(message) => on_failure(CommandError::Server(message)),
            value => on_reply(value),
        }
    }

    /// Number of commands awaiting a reply.
    pub(crate) fn len(&self) -> usize {
        self.on_reply.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> ReplyCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |tag: &str| -> ReplyCallback {
            let log = Arc::clone(&log_clone);
            let tag = tag.to_string();
            Box::new(move |reply| log.lock().unwrap().push(format!("{}:{}", tag, reply)))
        };
        (log, make)
    }

    fn noop_failure() -> FailureCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_replies_resolve_in_fifo_order() {
        let (log, make) = recorder();
        let mut pipeline = Pipeline::new();

        pipeline.push(make("first"), noop_failure());
        pipeline.push(make("second"), noop_failure());
        pipeline.push(make("third"), noop_failure());
        assert_eq!(pipeline.len(), 3);

        pipeline.resolve(RespValue::simple_string("OK"));
        pipeline.resolve(RespValue::integer(1));
        pipeline.resolve(RespValue::null());

        assert_eq!(pipeline.len(), 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:\"OK\"", "second:(integer) 1", "third:(nil)"]
        );
    }

    #[test]
    fn test_error_reply_routes_to_failure_callback() {
        let (log, make) = recorder();
        let mut pipeline = Pipeline::new();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let failures_clone = Arc::clone(&failures);
        pipeline.push(
            make("success"),
            Box::new(move |err| failures_clone.lock().unwrap().push(err)),
        );

        pipeline.resolve(RespValue::error("ERR unknown command"));

        // Exactly one of the two callbacks ran.
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(
            *failures.lock().unwrap(),
            vec![CommandError::Server("ERR unknown command".to_string())]
        );
    }

    #[test]
    fn test_queues_advance_together() {
        let (_, make) = recorder();
        let mut pipeline = Pipeline::new();

        pipeline.push(make("a"), noop_failure());
        pipeline.push(make("b"), noop_failure());

        pipeline.resolve(RespValue::error("ERR first fails"));
        assert_eq!(pipeline.len(), 1);

        // The error consumed both callbacks of the first entry, so the
        // second command still resolves through its own success callback.
        pipeline.resolve(RespValue::ok());
        assert_eq!(pipeline.len(), 0);
    }

    #[test]
    #[should_panic(expected = "no command outstanding")]
    fn test_reply_without_pending_command_panics() {
        let mut pipeline = Pipeline::new();
        pipeline.resolve(RespValue::ok());
    }
}
