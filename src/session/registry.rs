//! Session registry.
//!
//! Owns every session in a generation-checked slab and maintains three
//! indices over them: by local discriminator, by single-hop key, and by
//! multihop key. The indices hold handles, never references, which keeps
//! ownership flat; a [`SessionHandle`] whose slot has been reused simply
//! stops resolving. Lookups are pure: they never mutate a session.

use super::{MultiHopKey, Session, SessionKey, SessionState, SingleHopKey};
use crate::wire::ControlPacket;
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

/// Why a session could not be inserted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("discriminator 0x{0:08x} already in use")]
    DiscriminatorInUse(u32),

    #[error("a session with this peer key already exists")]
    KeyInUse,
}

/// Stable reference to a registered session.
///
/// The generation distinguishes reuses of the same slot, so a handle held
/// by a timer that outlives its session resolves to nothing instead of to
/// an unrelated session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

impl SessionHandle {
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    session: Option<Session>,
}

/// The process-wide session store.
#[derive(Default)]
pub struct SessionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_discr: HashMap<u32, SessionHandle>,
    by_shop: HashMap<SingleHopKey, SessionHandle>,
    by_mhop: HashMap<MultiHopKey, SessionHandle>,
    labels: HashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_discr: HashMap::new(),
            by_shop: HashMap::new(),
            by_mhop: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_discr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_discr.is_empty()
    }

    /// Install a session into the slab and both applicable indices.
    ///
    /// Fails without side effects on a discriminator or key collision;
    /// the session is handed back so the caller can release its socket.
    pub fn insert(&mut self, session: Session) -> Result<SessionHandle, (Session, RegistryError)> {
        if self.by_discr.contains_key(&session.local_discr) {
            let discr = session.local_discr;
            return Err((session, RegistryError::DiscriminatorInUse(discr)));
        }
        let key_taken = match &session.key {
            SessionKey::SingleHop(k) => self.by_shop.contains_key(k),
            SessionKey::MultiHop(k) => self.by_mhop.contains_key(k),
        };
        if key_taken {
            return Err((session, RegistryError::KeyInUse));
        }

        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    session: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let handle = SessionHandle {
            index,
            generation: slot.generation,
        };

        self.by_discr.insert(session.local_discr, handle);
        match &session.key {
            SessionKey::SingleHop(k) => {
                self.by_shop.insert(k.clone(), handle);
            }
            SessionKey::MultiHop(k) => {
                self.by_mhop.insert(k.clone(), handle);
            }
        }
        slot.session = Some(session);
        Ok(handle)
    }

    /// Remove a session, dropping it from every index. The slot's
    /// generation bumps so stale handles stop resolving.
    pub fn remove(&mut self, handle: SessionHandle) -> Option<Session> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let session = slot.session.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);

        self.by_discr.remove(&session.local_discr);
        match &session.key {
            SessionKey::SingleHop(k) => {
                self.by_shop.remove(k);
            }
            SessionKey::MultiHop(k) => {
                self.by_mhop.remove(k);
            }
        }
        if let Some(label) = &session.label {
            self.labels.remove(label);
        }
        Some(session)
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&Session> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.session.as_ref()
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut Session> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.session.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionHandle, &Session)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.session.as_ref().map(|s| {
                (
                    SessionHandle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    s,
                )
            })
        })
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn find_by_discr(&self, discr: u32) -> Option<SessionHandle> {
        self.by_discr.get(&discr).copied()
    }

    /// Single-hop lookup. The interface spec is optional matching: a miss
    /// with a concrete interface retries with the wildcard (empty) name.
    pub fn find_by_shop(&self, peer: IpAddr, interface: &str) -> Option<SessionHandle> {
        let key = SingleHopKey {
            peer,
            interface: interface.to_string(),
        };
        if let Some(h) = self.by_shop.get(&key) {
            return Some(*h);
        }
        if !interface.is_empty() {
            let wildcard = SingleHopKey {
                peer,
                interface: String::new(),
            };
            return self.by_shop.get(&wildcard).copied();
        }
        None
    }

    pub fn find_by_mhop(&self, peer: IpAddr, local: IpAddr, vrf: &str) -> Option<SessionHandle> {
        let key = MultiHopKey {
            peer,
            local,
            vrf: vrf.to_string(),
        };
        self.by_mhop.get(&key).copied()
    }

    pub fn find_by_key(&self, key: &SessionKey) -> Option<SessionHandle> {
        match key {
            SessionKey::SingleHop(k) => self.find_by_shop(k.peer, &k.interface),
            SessionKey::MultiHop(k) => self.find_by_mhop(k.peer, k.local, &k.vrf),
        }
    }

    pub fn find_by_label(&self, label: &str) -> Option<SessionHandle> {
        self.labels.get(label).copied()
    }

    /// Demultiplex an inbound control packet to a session (RFC 5880
    /// §6.8.6).
    ///
    /// A nonzero your-discriminator resolves by discriminator, and the
    /// packet's source address must match the session's stored peer. A
    /// zero your-discriminator is only acceptable in Down or AdminDown
    /// (the codec enforces that) and resolves by address tuple.
    pub fn session_for_packet(
        &self,
        pkt: &ControlPacket,
        peer: IpAddr,
        local: IpAddr,
        interface: &str,
        vrf: &str,
        is_mhop: bool,
    ) -> Option<SessionHandle> {
        if pkt.your_discr != 0 {
            let handle = self.find_by_discr(pkt.your_discr)?;
            let session = self.get(handle)?;
            if session.peer_addr() == peer {
                return Some(handle);
            }
            return None;
        }
        if !matches!(pkt.state, SessionState::Down | SessionState::AdminDown) {
            return None;
        }
        if is_mhop {
            self.find_by_mhop(peer, local, vrf)
        } else {
            self.find_by_shop(peer, interface)
        }
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    /// Attach or rename a session label. Returns false (and changes
    /// nothing) when another session already holds the label.
    pub fn set_label(&mut self, handle: SessionHandle, label: &str) -> bool {
        match self.labels.get(label) {
            Some(owner) if *owner == handle => return true,
            Some(_) => return false,
            None => {}
        }
        let Some(session) = self.get_mut(handle) else {
            return false;
        };
        let old = session.label.replace(label.to_string());
        if let Some(old) = old {
            self.labels.remove(&old);
        }
        self.labels.insert(label.to_string(), handle);
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
