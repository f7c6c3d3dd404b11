use std::collections::HashMap;

use parking_lot::RwLock;

use crate::errors::{RelayError, RelayResult};
use crate::events::CallEvent;
use crate::ids::ClientName;

/// The active-call map: a symmetric relation between the two clients of an
/// established CallLink. Only `InCall` materializes here — ringing state is
/// implicit in the caller's in-flight signaling and is never stored, so
/// there is nothing to reconcile if a ringing client disconnects before an
/// accept/reject arrives.
///
/// Every insertion adds both directions and every deletion removes both,
/// atomically under one write lock. This is a deliberate departure from a
/// naive "delete mine, then scan for the reverse entry" approach, which can
/// leave a stale one-directional entry under contention.
pub struct CallController {
    active: RwLock<HashMap<ClientName, ClientName>>,
}

impl CallController {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn partner_of(&self, name: &ClientName) -> Option<ClientName> {
        self.active.read().get(name).cloned()
    }

    pub fn is_in_call(&self, name: &ClientName) -> bool {
        self.active.read().contains_key(name)
    }

    /// `call_request`. Rejects self-calls (I4) and rejects if either side is
    /// already `InCall` (the only non-Idle state this controller tracks).
    pub fn request(&self, caller: ClientName, callee: ClientName) -> RelayResult<Vec<CallEvent>> {
        if caller == callee {
            return Err(RelayError::CallStateViolation("cannot call yourself"));
        }
        let g = self.active.read();
        if g.contains_key(&caller) || g.contains_key(&callee) {
            return Err(RelayError::CallStateViolation("user is already in a call"));
        }
        drop(g);
        Ok(vec![
            CallEvent::CallIncoming {
                to: callee.clone(),
                caller: caller.clone(),
            },
            CallEvent::CallRinging {
                to: caller,
                callee,
            },
        ])
    }

    /// `call_accept`. Establishes the link unconditionally and symmetrically;
    /// the caller name comes from the accepting client's payload, exactly as
    /// the `call_incoming` notification told it.
    pub fn accept(&self, callee: ClientName, caller: ClientName) -> Vec<CallEvent> {
        {
            let mut g = self.active.write();
            g.insert(callee.clone(), caller.clone());
            g.insert(caller.clone(), callee.clone());
        }
        vec![
            CallEvent::CallStarted {
                to: caller.clone(),
                partner: callee.clone(),
            },
            CallEvent::CallStarted {
                to: callee,
                partner: caller,
            },
        ]
    }

    /// `call_reject`. No state to clear: a rejected call never touched the
    /// active-call map.
    pub fn reject(&self, callee: ClientName, caller: ClientName) -> Vec<CallEvent> {
        vec![CallEvent::CallRejected {
            to: caller,
            message: format!("{} declined the call", callee),
        }]
    }

    /// `call_end`, triggered by either party. A repeat call from a client no
    /// longer in the map is a true no-op: no events, nothing to clear.
    pub fn end(&self, by: &ClientName) -> Vec<CallEvent> {
        let partner = {
            let mut g = self.active.write();
            g.remove(by).inspect(|partner| {
                g.remove(partner);
            })
        };
        match partner {
            Some(partner) => vec![
                CallEvent::CallEnded {
                    to: partner,
                    message: format!("{} ended the call", by),
                },
                CallEvent::CallEnded {
                    to: by.clone(),
                    message: "Call ended".to_string(),
                },
            ],
            None => vec![],
        }
    }

    /// Forced teardown from session termination: only the partner is told,
    /// since `name`'s own channel is already gone.
    pub fn disconnect(&self, name: &ClientName) -> Vec<CallEvent> {
        let partner = {
            let mut g = self.active.write();
            g.remove(name).inspect(|partner| {
                g.remove(partner);
            })
        };
        match partner {
            Some(partner) => vec![CallEvent::CallEnded {
                to: partner,
                message: format!("{} disconnected", name),
            }],
            None => vec![],
        }
    }
}

impl Default for CallController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ClientName {
        ClientName::parse(s).unwrap()
    }

    #[test]
    fn request_rejects_self_call() {
        let cc = CallController::new();
        let err = cc.request(name("alice"), name("alice")).unwrap_err();
        assert_eq!(err, RelayError::CallStateViolation("cannot call yourself"));
    }

    #[test]
    fn request_rejects_when_either_party_busy() {
        let cc = CallController::new();
        cc.accept(name("bob"), name("carol"));
        assert!(cc.request(name("alice"), name("bob")).is_err());
        assert!(cc.request(name("carol"), name("dave")).is_err());
    }

    #[test]
    fn accept_establishes_symmetric_link() {
        let cc = CallController::new();
        cc.accept(name("bob"), name("alice"));
        assert_eq!(cc.partner_of(&name("alice")), Some(name("bob")));
        assert_eq!(cc.partner_of(&name("bob")), Some(name("alice")));
    }

    #[test]
    fn end_clears_both_directions_and_is_idempotent() {
        let cc = CallController::new();
        cc.accept(name("bob"), name("alice"));
        let events = cc.end(&name("alice"));
        assert_eq!(events.len(), 2);
        assert_eq!(cc.partner_of(&name("alice")), None);
        assert_eq!(cc.partner_of(&name("bob")), None);

        // second call_end is a genuine no-op
        assert!(cc.end(&name("alice")).is_empty());
    }

    #[test]
    fn disconnect_notifies_partner_only() {
        let cc = CallController::new();
        cc.accept(name("bob"), name("alice"));
        let events = cc.disconnect(&name("alice"));
        assert_eq!(
            events,
            vec![CallEvent::CallEnded {
                to: name("bob"),
                message: "alice disconnected".to_string(),
            }]
        );
        assert!(!cc.is_in_call(&name("bob")));
    }
}
