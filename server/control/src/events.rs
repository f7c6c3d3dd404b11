use crate::ids::ClientName;

/// An effect the Call controller wants delivered to some client's control
/// channel. The session handler translates these into outbound wire frames;
/// this crate stays free of any serialization format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallEvent {
    CallIncoming { to: ClientName, caller: ClientName },
    CallRinging { to: ClientName, callee: ClientName },
    CallStarted { to: ClientName, partner: ClientName },
    CallRejected { to: ClientName, message: String },
    CallEnded { to: ClientName, message: String },
}
