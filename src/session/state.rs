use std::fmt;

/// Lifecycle of one camera session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Configuring,
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Configuring => "configuring",
            SessionState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Inputs to the session state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    OpenRequested,
    Opened,
    OpenFailed,
    Disconnected,
    Error(i32),
    ConfigureStarted,
    Configured,
    ConfigureFailed,
    RequestStarted,
    RequestFailed,
    EmptyOutputs,
    CloseRequested,
}

impl SessionEvent {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::OpenFailed
                | SessionEvent::Disconnected
                | SessionEvent::Error(_)
                | SessionEvent::ConfigureFailed
                | SessionEvent::RequestFailed
                | SessionEvent::EmptyOutputs
                | SessionEvent::CloseRequested
        )
    }
}

/// What the session must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Ask the backend to open the device
    OpenDevice,
    /// Configure a capture session over the surface snapshot
    Configure,
    /// Issue the repeating request
    StartRepeating,
    /// Release the capture session, the device and every output
    Teardown,
    /// State changed, nothing else to do
    Proceed,
    /// Event does not apply to the current state
    Ignore,
}

/// Next state and action for `event` in `state`.
pub fn transition(state: SessionState, event: &SessionEvent) -> (SessionState, SessionAction) {
    use SessionAction::*;
    use SessionState::*;

    if event.is_terminal() {
        return match state {
            Closed => (Closed, Ignore),
            _ => (Closed, Teardown),
        };
    }

    match (state, event) {
        (Closed, SessionEvent::OpenRequested) => (Opening, OpenDevice),
        (Opening, SessionEvent::Opened) => (Open, Configure),
        (Open, SessionEvent::ConfigureStarted) => (Configuring, Proceed),
        (Configuring, SessionEvent::Configured) => (Configuring, StartRepeating),
        (Configuring, SessionEvent::RequestStarted) => (Streaming, Proceed),
        (state, _) => (state, Ignore),
    }
}
