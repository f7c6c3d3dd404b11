use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::RwLock;

use crate::errors::{RelayError, RelayResult};
use crate::ids::ClientName;

/// Everything the Registry owns about one connected client, aside from its
/// voice endpoint (tracked separately since it is learned from UDP traffic,
/// not from the control connection).
struct ClientRecord<H> {
    handle: H,
    room: String,
}

struct Inner<H> {
    clients: HashMap<ClientName, ClientRecord<H>>,
    voice_endpoints: HashMap<ClientName, SocketAddr>,
}

/// The process-wide directory of connected clients: name -> (control channel
/// handle, current room, last known voice endpoint). `H` is the outbound
/// channel handle type; the gateway binary supplies its own `mpsc::Sender`
/// so this crate stays free of any wire-protocol or transport dependency.
///
/// A single coarse-grained lock guards all fields — every mutation here is
/// short, and per-client locking would not pay for itself at this scale.
pub struct Registry<H> {
    inner: RwLock<Inner<H>>,
    default_room: String,
}

impl<H: Clone> Registry<H> {
    pub fn new(default_room: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                clients: HashMap::new(),
                voice_endpoints: HashMap::new(),
            }),
            default_room: default_room.into(),
        }
    }

    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    /// Claims `name` for a newly logged-in client, placing it in the default
    /// room. Rejects names already in use.
    pub fn register(&self, name: ClientName, handle: H) -> RelayResult<()> {
        let mut g = self.inner.write();
        if g.clients.contains_key(&name) {
            return Err(RelayError::NameTaken);
        }
        g.clients.insert(
            name,
            ClientRecord {
                handle,
                room: self.default_room.clone(),
            },
        );
        Ok(())
    }

    /// Idempotent: removes the client and its voice endpoint if present.
    /// Returns the room the client was last in, if it existed.
    pub fn unregister(&self, name: &ClientName) -> Option<String> {
        let mut g = self.inner.write();
        g.voice_endpoints.remove(name);
        g.clients.remove(name).map(|rec| rec.room)
    }

    pub fn contains(&self, name: &ClientName) -> bool {
        self.inner.read().clients.contains_key(name)
    }

    /// Moves `name` to `room`, returning the previous room. Callers should
    /// skip the "left"/"joined" notifications when `old == room` (idempotent
    /// re-join is a no-op per the spec's round-trip property). Rejects a
    /// room name that is empty after trimming.
    pub fn set_room(&self, name: &ClientName, room: &str) -> RelayResult<String> {
        let room = room.trim();
        if room.is_empty() {
            return Err(RelayError::InvalidRoomName);
        }
        let mut g = self.inner.write();
        let rec = g
            .clients
            .get_mut(name)
            .ok_or(RelayError::NotFound("client"))?;
        Ok(std::mem::replace(&mut rec.room, room.to_string()))
    }

    pub fn room_of(&self, name: &ClientName) -> Option<String> {
        self.inner.read().clients.get(name).map(|r| r.room.clone())
    }

    pub fn handle_of(&self, name: &ClientName) -> Option<H> {
        self.inner.read().clients.get(name).map(|r| r.handle.clone())
    }

    /// Idempotent overwrite; learned from the first voice datagram a client sends.
    pub fn set_voice_endpoint(&self, name: &ClientName, addr: SocketAddr) {
        self.inner.write().voice_endpoints.insert(name.clone(), addr);
    }

    pub fn voice_endpoint(&self, name: &ClientName) -> Option<SocketAddr> {
        self.inner.read().voice_endpoints.get(name).copied()
    }

    pub fn snapshot_users(&self) -> Vec<ClientName> {
        let g = self.inner.read();
        let mut names: Vec<_> = g.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot_room(&self, room: &str) -> Vec<ClientName> {
        let g = self.inner.read();
        let mut names: Vec<_> = g
            .clients
            .iter()
            .filter(|(_, rec)| rec.room == room)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn snapshot_rooms(&self) -> HashMap<String, Vec<ClientName>> {
        let g = self.inner.read();
        let mut rooms: HashMap<String, Vec<ClientName>> = HashMap::new();
        for (name, rec) in g.clients.iter() {
            rooms.entry(rec.room.clone()).or_default().push(name.clone());
        }
        for members in rooms.values_mut() {
            members.sort();
        }
        rooms
    }

    /// Handles of every OTHER client currently in `room` — the fan-out list
    /// for a room broadcast. Handles are cloned out under the lock and the
    /// caller sends after releasing it.
    pub fn room_handles_excluding(&self, room: &str, exclude: &ClientName) -> Vec<H> {
        let g = self.inner.read();
        g.clients
            .iter()
            .filter(|(name, rec)| rec.room == room && *name != exclude)
            .map(|(_, rec)| rec.handle.clone())
            .collect()
    }

    pub fn all_handles_excluding(&self, exclude: &ClientName) -> Vec<H> {
        let g = self.inner.read();
        g.clients
            .iter()
            .filter(|(name, _)| *name != exclude)
            .map(|(_, rec)| rec.handle.clone())
            .collect()
    }

    pub fn all_handles(&self) -> Vec<H> {
        let g = self.inner.read();
        g.clients.values().map(|rec| rec.handle.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ClientName {
        ClientName::parse(s).unwrap()
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let reg: Registry<u32> = Registry::new("lobby");
        reg.register(name("alice"), 1).unwrap();
        assert_eq!(reg.register(name("alice"), 2), Err(RelayError::NameTaken));
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg: Registry<u32> = Registry::new("lobby");
        reg.register(name("alice"), 1).unwrap();
        assert_eq!(reg.unregister(&name("alice")), Some("lobby".to_string()));
        assert_eq!(reg.unregister(&name("alice")), None);
    }

    #[test]
    fn set_room_same_room_reports_same_old_value() {
        let reg: Registry<u32> = Registry::new("lobby");
        reg.register(name("carol"), 1).unwrap();
        let old = reg.set_room(&name("carol"), "lobby").unwrap();
        assert_eq!(old, "lobby");
    }

    #[test]
    fn set_room_rejects_empty_or_whitespace_name() {
        let reg: Registry<u32> = Registry::new("lobby");
        reg.register(name("carol"), 1).unwrap();
        assert_eq!(reg.set_room(&name("carol"), ""), Err(RelayError::InvalidRoomName));
        assert_eq!(reg.set_room(&name("carol"), "   "), Err(RelayError::InvalidRoomName));
        assert_eq!(reg.room_of(&name("carol")), Some("lobby".to_string()));
    }

    #[test]
    fn snapshot_rooms_groups_by_room() {
        let reg: Registry<u32> = Registry::new("lobby");
        reg.register(name("alice"), 1).unwrap();
        reg.register(name("bob"), 2).unwrap();
        reg.set_room(&name("bob"), "dev").unwrap();

        let rooms = reg.snapshot_rooms();
        assert_eq!(rooms.get("lobby"), Some(&vec![name("alice")]));
        assert_eq!(rooms.get("dev"), Some(&vec![name("bob")]));
    }

    #[test]
    fn voice_endpoint_round_trips() {
        let reg: Registry<u32> = Registry::new("lobby");
        reg.register(name("alice"), 1).unwrap();
        assert_eq!(reg.voice_endpoint(&name("alice")), None);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        reg.set_voice_endpoint(&name("alice"), addr);
        assert_eq!(reg.voice_endpoint(&name("alice")), Some(addr));
    }
}
