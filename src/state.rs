//! Session State Machine: the six phases a session moves
//! through from transport establishment to teardown.

use crate::capabilities::Encoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Connected,
    ControlStreamOpened,
    Initializing,
    Ready,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("event not valid in the current phase")]
    InvalidForPhase,
    /// The first Control Stream frame must be a JSON-encoded `initialize`
    /// request; any other frame closes the session with code -32600.
    #[error("first Control Stream frame was not an initialize request")]
    NotAnInitializeRequest,
}

/// Drives [`Phase`] transitions through the session lifecycle. Owns nothing
/// but the current phase; the Session glues this to the Request Table,
/// Stream Mux, and Control Stream I/O.
#[derive(Debug)]
pub struct StateMachine {
    phase: Phase,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { phase: Phase::Closed }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// CLOSED -> CONNECTED: the underlying WebTransport session was
    /// established.
    pub fn on_transport_established(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Closed => {
                self.phase = Phase::Connected;
                Ok(())
            }
            _ => Err(TransitionError::InvalidForPhase),
        }
    }

    /// CONNECTED -> CONTROL_STREAM_OPENED: the peer's bidirectional stream
    /// was accepted as the Control Stream. Further bidirectional streams
    /// are the caller's responsibility to refuse; this only tracks phase.
    pub fn on_control_stream_opened(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Connected => {
                self.phase = Phase::ControlStreamOpened;
                Ok(())
            }
            _ => Err(TransitionError::InvalidForPhase),
        }
    }

    /// CONTROL_STREAM_OPENED -> INITIALIZING, gated on the first frame
    /// being an `initialize` request.
    pub fn on_first_frame(&mut self, method: &str, has_id: bool) -> Result<(), TransitionError> {
        match self.phase {
            Phase::ControlStreamOpened => {
                if has_id && method == crate::message::methods::INITIALIZE {
                    self.phase = Phase::Initializing;
                    Ok(())
                } else {
                    Err(TransitionError::NotAnInitializeRequest)
                }
            }
            _ => Err(TransitionError::InvalidForPhase),
        }
    }

    /// INITIALIZING -> READY once the `initialize` response has been
    /// written.
    pub fn on_initialize_responded(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Initializing => {
                self.phase = Phase::Ready;
                Ok(())
            }
            _ => Err(TransitionError::InvalidForPhase),
        }
    }

    /// READY -> DRAINING, on sending or receiving `$/shutdown`.
    pub fn on_shutdown(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Ready => {
                self.phase = Phase::Draining;
                Ok(())
            }
            _ => Err(TransitionError::InvalidForPhase),
        }
    }

    /// DRAINING -> CLOSED, once the last stream has closed and no requests
    /// remain in flight.
    pub fn on_drain_complete(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Draining => {
                self.phase = Phase::Closed;
                Ok(())
            }
            _ => Err(TransitionError::InvalidForPhase),
        }
    }

    /// Any phase -> CLOSED, on a transport error or fatal protocol error.
    pub fn force_close(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Whether a frame received in the current phase should be decoded
    /// with the negotiated `encoding` (READY) rather than treated as the
    /// bootstrap `initialize` frame (CONTROL_STREAM_OPENED, always JSON).
    pub fn expects_negotiated_encoding(&self) -> bool {
        matches!(self.phase, Phase::Ready | Phase::Draining)
    }
}

/// The encoding in force for a given phase; `initialize`'s own request and
/// response are always JSON regardless of what gets negotiated.
pub fn bootstrap_encoding() -> Encoding {
    Encoding::Json
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_ready() {
        let mut sm = StateMachine::new();
        sm.on_transport_established().unwrap();
        sm.on_control_stream_opened().unwrap();
        sm.on_first_frame(crate::message::methods::INITIALIZE, true)
            .unwrap();
        sm.on_initialize_responded().unwrap();
        assert_eq!(sm.phase(), Phase::Ready);
    }

    #[test]
    fn first_frame_must_be_initialize_request() {
        let mut sm = StateMachine::new();
        sm.on_transport_established().unwrap();
        sm.on_control_stream_opened().unwrap();
        let err = sm.on_first_frame("ping", true).unwrap_err();
        assert_eq!(err, TransitionError::NotAnInitializeRequest);
        assert_eq!(sm.phase(), Phase::ControlStreamOpened);
    }

    #[test]
    fn first_frame_rejects_notification_even_named_initialize() {
        let mut sm = StateMachine::new();
        sm.on_transport_established().unwrap();
        sm.on_control_stream_opened().unwrap();
        let err = sm
            .on_first_frame(crate::message::methods::INITIALIZE, false)
            .unwrap_err();
        assert_eq!(err, TransitionError::NotAnInitializeRequest);
    }

    #[test]
    fn shutdown_then_drain_reaches_closed() {
        let mut sm = StateMachine::new();
        sm.on_transport_established().unwrap();
        sm.on_control_stream_opened().unwrap();
        sm.on_first_frame(crate::message::methods::INITIALIZE, true)
            .unwrap();
        sm.on_initialize_responded().unwrap();
        sm.on_shutdown().unwrap();
        assert_eq!(sm.phase(), Phase::Draining);
        sm.on_drain_complete().unwrap();
        assert_eq!(sm.phase(), Phase::Closed);
    }

    #[test]
    fn force_close_works_from_any_phase() {
        let mut sm = StateMachine::new();
        sm.on_transport_established().unwrap();
        sm.force_close();
        assert_eq!(sm.phase(), Phase::Closed);
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let mut sm = StateMachine::new();
        assert_eq!(
            sm.on_shutdown().unwrap_err(),
            TransitionError::InvalidForPhase
        );
    }
}
