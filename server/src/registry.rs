//! Session tracking and verification for the dedicated server
//!
//! This module owns every piece of per-session state:
//! - The origin address a session was first seen from (the hijack guard)
//! - The reply handle used to send datagrams back to that address
//! - The character bound to the session and its live position
//!
//! All of it sits behind one registry-wide lock, so a session is always
//! either fully present or fully gone. Packets from the same session may be
//! handled by several workers at once; the lock serializes their updates.

use crate::error::SessionError;
use crate::reply::{OutboundSender, ReplyHandle};
use log::{debug, info, warn};
use shared::{DisconnectPacket, PlayerCharacter, SessionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Everything the server knows about one established session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Address of the first packet carrying this session id. Never changes.
    pub origin: SocketAddr,
    pub reply: ReplyHandle,
    /// Live copy of the connected character, if any.
    pub player: Option<PlayerCharacter>,
    /// Last time a verified packet arrived for this session.
    pub last_seen: Instant,
}

impl SessionRecord {
    fn player_name(&self) -> Option<&str> {
        self.player.as_ref().map(|pc| pc.firstname.as_str())
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// First packet for this session; it is now bound to the sender's address.
    Established,
    /// Known session, matching address.
    Verified,
}

/// Who a chat message goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every session with a character connected.
    Everyone,
    Zone(String),
    Guild(String),
    Party(String),
    /// A single character, by first name.
    Player(String),
}

impl Audience {
    fn includes(&self, pc: &PlayerCharacter) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Zone(zone) => pc.position.zone == *zone,
            Audience::Guild(guild) => pc.guild.as_deref() == Some(guild.as_str()),
            Audience::Party(party) => pc.party.as_deref() == Some(party.as_str()),
            Audience::Player(name) => pc.firstname == *name,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionRecord>,
    /// Character first name to the session it is connected on.
    players: HashMap<String, SessionId>,
}

impl RegistryState {
    /// Removes a session and its name index entry in one step.
    fn remove(&mut self, session_id: SessionId) -> Option<SessionRecord> {
        let record = self.sessions.remove(&session_id)?;
        if let Some(name) = record.player_name() {
            if self.players.get(name) == Some(&session_id) {
                self.players.remove(name);
            }
        }
        Some(record)
    }

    fn check_bindable(&self, session_id: SessionId, name: &str) -> Result<(), SessionError> {
        let record = self
            .sessions
            .get(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;

        if let Some(bound) = record.player_name() {
            if bound != name {
                return Err(SessionError::AlreadyBound {
                    session_id,
                    bound: bound.to_string(),
                });
            }
        }

        match self.players.get(name) {
            Some(&other) if other != session_id => Err(SessionError::DuplicateLogin {
                name: name.to_string(),
                other,
            }),
            _ => Ok(()),
        }
    }
}

/// Shared registry of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
    outbound: OutboundSender,
}

impl SessionRegistry {
    /// Creates an empty registry whose reply handles feed `outbound`.
    pub fn new(outbound: OutboundSender) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            outbound,
        }
    }

    /// Checks that `origin` is allowed to speak for `session_id`
    ///
    /// A known session must come from the address it was established from;
    /// anything else is a hijack attempt and leaves the registry untouched.
    /// An unseen session is established from `origin` when `establish` is
    /// set, and rejected as unknown otherwise.
    pub async fn verify(
        &self,
        session_id: SessionId,
        origin: SocketAddr,
        establish: bool,
    ) -> Result<Verification, SessionError> {
        let mut state = self.state.write().await;

        if let Some(record) = state.sessions.get_mut(&session_id) {
            if record.origin != origin {
                return Err(SessionError::HijackAttempt {
                    session_id,
                    expected: record.origin,
                    actual: origin,
                });
            }
            record.last_seen = Instant::now();
            return Ok(Verification::Verified);
        }

        if !establish {
            return Err(SessionError::UnknownSession(session_id));
        }

        let record = SessionRecord {
            session_id,
            origin,
            reply: ReplyHandle::new(origin, self.outbound.clone()),
            player: None,
            last_seen: Instant::now(),
        };
        state.sessions.insert(session_id, record);
        info!("Session {} established from {}", session_id, origin);
        Ok(Verification::Established)
    }

    /// Returns the error `bind_player` would give for `name`, without
    /// changing anything. Lets callers skip a store lookup that would be
    /// wasted.
    pub async fn check_bindable(&self, session_id: SessionId, name: &str) -> Result<(), SessionError> {
        self.state.read().await.check_bindable(session_id, name)
    }

    /// Binds a character to an established session
    ///
    /// Binding the character that is already bound is a no-op. Fails when
    /// the session has a different character, or when the character is
    /// connected on another session. The checks and the insert happen under
    /// the same lock, so two sessions racing for one name cannot both win.
    pub async fn bind_player(
        &self,
        session_id: SessionId,
        pc: PlayerCharacter,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        state.check_bindable(session_id, &pc.firstname)?;

        let name = pc.firstname.clone();
        if let Some(record) = state.sessions.get_mut(&session_id) {
            if record.player.is_some() {
                return Ok(());
            }
            record.player = Some(pc);
        }
        state.players.insert(name.clone(), session_id);
        info!("{} connected on session {}", name, session_id);
        Ok(())
    }

    /// Removes a session and everything tied to it
    ///
    /// With `notify` set, a DISCONNECT record is sent to the session's reply
    /// handle before it is dropped. Returns the removed record, or `None` if
    /// the session was not registered.
    pub async fn disconnect(&self, session_id: SessionId, notify: bool) -> Option<SessionRecord> {
        let record = self.state.write().await.remove(session_id)?;

        if notify {
            if let Err(e) = record.reply.send(&DisconnectPacket::new(session_id)) {
                warn!("Failed to notify session {} of disconnect: {}", session_id, e);
            }
        }

        match record.player_name() {
            Some(name) => info!("Session {} ({}) disconnected", session_id, name),
            None => info!("Session {} disconnected", session_id),
        }
        Some(record)
    }

    /// Updates the live position of the session's character.
    pub async fn move_player(
        &self,
        session_id: SessionId,
        x: f32,
        y: f32,
        z: f32,
        direction: f32,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let pc = state
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?
            .player
            .as_mut()
            .ok_or(SessionError::NoPlayerBound(session_id))?;

        pc.position.x = x;
        pc.position.y = y;
        pc.position.z = z;
        pc.position.direction = direction;
        Ok(())
    }

    /// Snapshot of the character bound to a session.
    pub async fn player(&self, session_id: SessionId) -> Option<PlayerCharacter> {
        let state = self.state.read().await;
        state.sessions.get(&session_id)?.player.clone()
    }

    pub async fn player_name(&self, session_id: SessionId) -> Option<String> {
        let state = self.state.read().await;
        state
            .sessions
            .get(&session_id)?
            .player_name()
            .map(str::to_string)
    }

    pub async fn session_for_player(&self, name: &str) -> Option<SessionId> {
        self.state.read().await.players.get(name).copied()
    }

    pub async fn origin(&self, session_id: SessionId) -> Option<SocketAddr> {
        let state = self.state.read().await;
        state.sessions.get(&session_id).map(|record| record.origin)
    }

    pub async fn reply_handle(&self, session_id: SessionId) -> Option<ReplyHandle> {
        let state = self.state.read().await;
        state.sessions.get(&session_id).map(|record| record.reply.clone())
    }

    pub async fn contains(&self, session_id: SessionId) -> bool {
        self.state.read().await.sessions.contains_key(&session_id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.sessions.is_empty()
    }

    /// Number of sessions with a character connected.
    pub async fn player_count(&self) -> usize {
        self.state.read().await.players.len()
    }

    /// Reply handles of every connected character in `audience`, with the
    /// character's name.
    pub async fn recipients(&self, audience: &Audience) -> Vec<(String, ReplyHandle)> {
        let state = self.state.read().await;
        state
            .sessions
            .values()
            .filter_map(|record| {
                let pc = record.player.as_ref()?;
                audience
                    .includes(pc)
                    .then(|| (pc.firstname.clone(), record.reply.clone()))
            })
            .collect()
    }

    /// Disconnects sessions that have not sent a verified packet within
    /// `timeout`, notifying each one. Returns the removed session ids.
    pub async fn reap_idle(&self, timeout: Duration) -> Vec<SessionId> {
        let removed: Vec<SessionRecord> = {
            let mut state = self.state.write().await;
            let idle: Vec<SessionId> = state
                .sessions
                .values()
                .filter(|record| record.last_seen.elapsed() > timeout)
                .map(|record| record.session_id)
                .collect();
            idle.into_iter()
                .filter_map(|session_id| state.remove(session_id))
                .collect()
        };

        for record in &removed {
            info!("Session {} timed out", record.session_id);
            if let Err(e) = record.reply.send(&DisconnectPacket::new(record.session_id)) {
                warn!("Failed to notify session {} of timeout: {}", record.session_id, e);
            }
        }

        removed.into_iter().map(|record| record.session_id).collect()
    }

    /// Drops sessions that never bound a character and have been quiet for
    /// `grace`. Nothing is sent back since the origin never proved itself.
    pub async fn reap_unbound(&self, grace: Duration) -> Vec<SessionId> {
        let mut state = self.state.write().await;
        let stale: Vec<SessionId> = state
            .sessions
            .values()
            .filter(|record| record.player.is_none() && record.last_seen.elapsed() > grace)
            .map(|record| record.session_id)
            .collect();

        stale
            .into_iter()
            .filter(|&session_id| {
                let removed = state.remove(session_id).is_some();
                if removed {
                    debug!("Session {} never bound a character, dropping it", session_id);
                }
                removed
            })
            .collect()
    }

    #[cfg(test)]
    async fn backdate(&self, session_id: SessionId, by: Duration) {
        let mut state = self.state.write().await;
        if let Some(record) = state.sessions.get_mut(&session_id) {
            record.last_seen = Instant::now() - by;
        }
    }
}
