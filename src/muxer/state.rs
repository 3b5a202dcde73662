//! Muxer lifecycle state machine

/// Container lifecycle state.
///
/// `Uninitialized → (add_stream)* → write_header → (write_packet)* → finalize → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    /// Writer created, no stream declared yet
    Uninitialized,

    /// At least one stream declared, header not written
    StreamsDeclared,

    /// Header written, packets may flow
    HeaderWritten,

    /// Trailer written (or attempted); nothing more reaches the file
    Closed,
}

/// Operations that drive [`MuxerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerOp {
    AddStream,
    WriteHeader,
    WritePacket,
    Finalize,
}

impl MuxerOp {
    pub fn description(&self) -> &'static str {
        match self {
            MuxerOp::AddStream => "add a stream",
            MuxerOp::WriteHeader => "write the header",
            MuxerOp::WritePacket => "write a packet",
            MuxerOp::Finalize => "finalize",
        }
    }
}

impl MuxerState {
    /// State after applying `op`, or `None` if `op` is not allowed here.
    ///
    /// `Finalize` is accepted everywhere; before the header it leaves the
    /// state untouched.
    pub fn apply(self, op: MuxerOp) -> Option<MuxerState> {
        use MuxerOp::*;
        use MuxerState::*;

        match (self, op) {
            (Uninitialized | StreamsDeclared, AddStream) => Some(StreamsDeclared),
            (StreamsDeclared, WriteHeader) => Some(HeaderWritten),
            (HeaderWritten, WritePacket) => Some(HeaderWritten),
            (HeaderWritten, Finalize) => Some(Closed),
            (state, Finalize) => Some(state),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MuxerState::Uninitialized => "Uninitialized",
            MuxerState::StreamsDeclared => "StreamsDeclared",
            MuxerState::HeaderWritten => "HeaderWritten",
            MuxerState::Closed => "Closed",
        }
    }

    pub fn header_written(&self) -> bool {
        matches!(self, MuxerState::HeaderWritten | MuxerState::Closed)
    }
}

impl std::fmt::Display for MuxerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
