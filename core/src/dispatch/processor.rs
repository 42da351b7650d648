//! Tick-thread request processing
//!
//! Transport threads never touch host state; they hand requests over a
//! channel and wait for the response on a per-request channel. The processor
//! drains that queue from the host's tick and advances every suspended call
//! exactly once per tick. A client that disconnects while its call is
//! pending simply has the continuation discarded once it completes.

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::*;

use super::{CallContinuation, CallResult, Dispatcher, ProcedureCall, Response};
use crate::tickable::{Tickable, Ticks};

/// Message sent from a transport connection to the processor.
pub enum RpcMessage {
    /// A request to execute, with the channel the response goes back on
    Request {
        call: ProcedureCall,
        response_tx: Sender<Response>,
    },
    /// Server is shutting down; pending calls are dropped
    Shutdown,
}

struct PendingCall {
    continuation: CallContinuation,
    response_tx: Sender<Response>,
}

/// Consumes [`RpcMessage`]s on the tick thread and drives suspended calls.
pub struct RpcProcessor {
    dispatcher: Dispatcher,
    request_rx: Receiver<RpcMessage>,
    pending: Vec<PendingCall>,
}

impl RpcProcessor {
    pub fn new(dispatcher: Dispatcher, request_rx: Receiver<RpcMessage>) -> Self {
        Self {
            dispatcher,
            request_rx,
            pending: Vec::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Number of calls currently suspended between ticks.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Handles one queued request without blocking. Returns true if a request
    /// was processed.
    pub fn try_process(&mut self) -> bool {
        match self.request_rx.try_recv() {
            Ok(RpcMessage::Request { call, response_tx }) => {
                match self.dispatcher.handle_call(&call) {
                    CallResult::Completed(response) => {
                        if response_tx.send(response).is_err() {
                            debug!("client disconnected before response was sent");
                        }
                    }
                    CallResult::Pending(continuation) => {
                        trace!("{} suspended", continuation.procedure());
                        self.pending.push(PendingCall {
                            continuation,
                            response_tx,
                        });
                    }
                }
                true
            }
            Ok(RpcMessage::Shutdown) => {
                self.pending.clear();
                false
            }
            Err(_) => false,
        }
    }

    /// Handles all queued requests without blocking.
    pub fn process_all(&mut self) {
        while self.try_process() {}
    }

    /// Advances every pending continuation by exactly one step. Calls that
    /// complete have their response sent; calls that yield again wait for the
    /// next tick.
    pub fn advance_pending(&mut self) {
        for call in std::mem::take(&mut self.pending) {
            match call.continuation.run() {
                CallResult::Completed(response) => {
                    if call.response_tx.send(response).is_err() {
                        debug!("client disconnected while call was pending");
                    }
                }
                CallResult::Pending(continuation) => self.pending.push(PendingCall {
                    continuation,
                    response_tx: call.response_tx,
                }),
            }
        }
    }
}

impl Tickable for RpcProcessor {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        self.process_all();
        self.advance_pending();
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::test::build_test_registry;
    use crate::value::Value;
    use std::sync::atomic::Ordering;

    fn request(
        service: &str,
        procedure: &str,
        args: &[Value],
    ) -> (RpcMessage, Receiver<Response>) {
        let mut call = ProcedureCall::new(service, procedure);
        for (position, value) in args.iter().enumerate() {
            call = call.with_argument(position as u32, codec::encode(value).unwrap());
        }
        let (response_tx, response_rx) = crossbeam_channel::bounded(1);
        (RpcMessage::Request { call, response_tx }, response_rx)
    }

    #[test]
    fn processes_queued_requests_on_tick() {
        let fixture = build_test_registry();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = RpcProcessor::new(fixture.dispatcher(), rx);

        let (message, response_rx) = request("TestService", "ProcedureNoArgsNoReturn", &[]);
        tx.send(message).unwrap();
        assert!(response_rx.is_empty());

        processor.tick(1).unwrap();
        assert_eq!(response_rx.try_recv().unwrap(), Response::Empty);
        assert_eq!(fixture.no_args_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocking_call_spans_ticks() {
        let fixture = build_test_registry();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = RpcProcessor::new(fixture.dispatcher(), rx);

        let (message, response_rx) =
            request("TestService", "BlockingProcedureReturns", &[Value::Int32(3)]);
        tx.send(message).unwrap();

        // First tick dispatches the call and advances it once
        processor.tick(1).unwrap();
        assert_eq!(processor.pending_calls(), 1);
        assert!(response_rx.is_empty());

        processor.tick(1).unwrap();
        assert!(response_rx.is_empty());

        // n=3 completes on the fourth step
        processor.tick(1).unwrap();
        assert_eq!(processor.pending_calls(), 0);
        let response = response_rx.try_recv().unwrap();
        let Response::Value(payload) = response else {
            panic!("expected a value response");
        };
        assert_eq!(codec::decode(&payload).unwrap(), Value::Int32(6));
        assert_eq!(fixture.blocking_steps.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn multiple_clients_interleave() {
        let fixture = build_test_registry();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = RpcProcessor::new(fixture.dispatcher(), rx);

        let (blocking, blocking_rx) =
            request("TestService", "BlockingProcedureReturns", &[Value::Int32(2)]);
        let (quick, quick_rx) = request(
            "TestService",
            "ProcedureSingleArgReturns",
            &[Value::String("hi".into())],
        );
        tx.send(blocking).unwrap();
        tx.send(quick).unwrap();

        // The quick call completes on the first tick while the blocking call
        // stays pending
        processor.tick(1).unwrap();
        assert!(quick_rx.try_recv().is_ok());
        assert!(blocking_rx.is_empty());
        assert_eq!(processor.pending_calls(), 1);

        processor.tick(1).unwrap();
        assert!(blocking_rx.try_recv().is_ok());
        assert_eq!(processor.pending_calls(), 0);
    }

    #[test]
    fn disconnected_client_discards_pending_call() {
        let fixture = build_test_registry();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = RpcProcessor::new(fixture.dispatcher(), rx);

        let (message, response_rx) =
            request("TestService", "BlockingProcedureReturns", &[Value::Int32(2)]);
        tx.send(message).unwrap();
        processor.tick(1).unwrap();
        assert_eq!(processor.pending_calls(), 1);

        // Client goes away; completing the call must not panic
        drop(response_rx);
        processor.tick(1).unwrap();
        processor.tick(1).unwrap();
        assert_eq!(processor.pending_calls(), 0);
    }

    #[test]
    fn shutdown_drops_pending_calls() {
        let fixture = build_test_registry();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = RpcProcessor::new(fixture.dispatcher(), rx);

        let (message, _response_rx) =
            request("TestService", "BlockingProcedureReturns", &[Value::Int32(10)]);
        tx.send(message).unwrap();
        processor.tick(1).unwrap();
        assert_eq!(processor.pending_calls(), 1);

        tx.send(RpcMessage::Shutdown).unwrap();
        processor.tick(1).unwrap();
        assert_eq!(processor.pending_calls(), 0);
    }
}
