//! Call-order tracking shared by every protocol variant.
//!
//! # States
//! ```text
//! Send side:     Idle → Sending → Sent { complete }
//! Receive side:  Idle → Receiving → Received → Signaled
//! ```
//!
//! The two halves are independent. A failed send still ends in `Sent` with
//! `complete = false`; a failed receive stays in `Receiving`, so `received`
//! and the signal calls keep failing.

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending,
    Sent {
        complete: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    #[default]
    Idle,
    Receiving,
    Received,
    Signaled,
}

/// Per-session state machine.
#[derive(Debug, Default)]
pub struct SessionState {
    send: SendState,
    receive: ReceiveState,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_state(&self) -> SendState {
        self.send
    }

    pub fn receive_state(&self) -> ReceiveState {
        self.receive
    }

    pub fn begin_send(&mut self) -> Result<(), ProtocolError> {
        match self.send {
            SendState::Idle => {
                self.send = SendState::Sending;
                Ok(())
            }
            _ => Err(ProtocolError::OutOfOrder {
                operation: "send",
                required: "a fresh session",
            }),
        }
    }

    pub fn finish_send(&mut self, complete: bool) {
        self.send = SendState::Sent { complete };
    }

    pub fn send_succeeded(&self) -> Result<bool, ProtocolError> {
        match self.send {
            SendState::Sent { complete } => Ok(complete),
            _ => Err(ProtocolError::OutOfOrder {
                operation: "send_succeeded",
                required: "send",
            }),
        }
    }

    pub fn require_sent(&self, operation: &'static str) -> Result<(), ProtocolError> {
        match self.send {
            SendState::Sent { .. } => Ok(()),
            _ => Err(ProtocolError::OutOfOrder {
                operation,
                required: "send",
            }),
        }
    }

    pub fn begin_receive(&mut self) -> Result<(), ProtocolError> {
        match self.receive {
            ReceiveState::Idle => {
                self.receive = ReceiveState::Receiving;
                Ok(())
            }
            _ => Err(ProtocolError::OutOfOrder {
                operation: "receive",
                required: "a fresh session",
            }),
        }
    }

    pub fn finish_receive(&mut self) {
        self.receive = ReceiveState::Received;
    }

    pub fn require_received(&self, operation: &'static str) -> Result<(), ProtocolError> {
        match self.receive {
            ReceiveState::Received | ReceiveState::Signaled => Ok(()),
            _ => Err(ProtocolError::OutOfOrder {
                operation,
                required: "receive",
            }),
        }
    }

    /// Move to `Signaled`. Succeeds at most once per session.
    pub fn signal(&mut self, operation: &'static str) -> Result<(), ProtocolError> {
        match self.receive {
            ReceiveState::Received => {
                self.receive = ReceiveState::Signaled;
                Ok(())
            }
            ReceiveState::Signaled => Err(ProtocolError::AlreadySignaled),
            _ => Err(ProtocolError::OutOfOrder {
                operation,
                required: "receive",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_side_order() {
        let mut state = SessionState::new();
        assert!(matches!(
            state.send_succeeded(),
            Err(ProtocolError::OutOfOrder { operation: "send_succeeded", .. })
        ));
        assert!(state.require_sent("read_reply").is_err());

        state.begin_send().unwrap();
        assert!(state.send_succeeded().is_err());
        state.finish_send(true);
        assert!(state.send_succeeded().unwrap());
        assert!(state.require_sent("read_reply").is_ok());

        // no second send on the same session
        assert!(state.begin_send().is_err());
    }

    #[test]
    fn failed_send_reports_incomplete() {
        let mut state = SessionState::new();
        state.begin_send().unwrap();
        state.finish_send(false);
        assert!(!state.send_succeeded().unwrap());
    }

    #[test]
    fn receive_side_signals_once() {
        let mut state = SessionState::new();
        assert!(state.signal("signal_success").is_err());

        state.begin_receive().unwrap();
        assert!(state.require_received("received").is_err());
        assert!(state.signal("signal_success").is_err());

        state.finish_receive();
        state.signal("signal_success").unwrap();
        assert_eq!(state.receive_state(), ReceiveState::Signaled);
        assert!(matches!(
            state.signal("signal_error"),
            Err(ProtocolError::AlreadySignaled)
        ));
        // the document stays readable after signaling
        assert!(state.require_received("received").is_ok());
    }

    #[test]
    fn halves_are_independent() {
        let mut state = SessionState::new();
        state.begin_receive().unwrap();
        state.finish_receive();
        state.begin_send().unwrap();
        state.finish_send(true);
        assert_eq!(state.send_state(), SendState::Sent { complete: true });
        assert_eq!(state.receive_state(), ReceiveState::Received);
    }
}
