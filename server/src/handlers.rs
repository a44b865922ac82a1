//! Handlers for session and character management opcodes.

use crate::config::RebindPolicy;
use crate::dispatch::{Caller, ServerContext};
use crate::error::{DispatchError, SessionError, StoreError};
use crate::registry::Verification;
use log::{debug, info, warn};
use shared::*;
use std::sync::Arc;

/// Sends a record to the caller's session, logging rather than failing.
pub(crate) async fn reply<R: Record>(ctx: &ServerContext, session_id: SessionId, record: &R) {
    match ctx.registry.reply_handle(session_id).await {
        Some(handle) => {
            if let Err(e) = handle.send(record) {
                warn!("Failed to reply {:?} to session {}: {}", R::OPCODE, session_id, e);
            }
        }
        None => debug!("Session {} gone before {:?} reply", session_id, R::OPCODE),
    }
}

pub async fn handle_empty(
    _ctx: Arc<ServerContext>,
    caller: Caller,
    _packet: EmptyPacket,
) -> Result<(), DispatchError> {
    debug!("EMPTY packet from {}", caller.origin);
    Ok(())
}

/// Debug ping; logged and otherwise ignored.
pub async fn handle_generic(
    _ctx: Arc<ServerContext>,
    caller: Caller,
    packet: GenericPacket,
) -> Result<(), DispatchError> {
    info!(
        "GENERIC packet from {} (session {})",
        caller.origin, packet.session_id
    );
    Ok(())
}

/// Opcodes that pass verification but have no game logic behind them yet.
pub async fn acknowledge<P>(
    _ctx: Arc<ServerContext>,
    caller: Caller,
    _packet: P,
) -> Result<(), DispatchError>
where
    P: Record + Send + 'static,
{
    debug!(
        "{:?} from session {} accepted, nothing to do",
        P::OPCODE,
        caller.session_id
    );
    Ok(())
}

pub async fn handle_req_clist(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: ReqClistPacket,
) -> Result<(), DispatchError> {
    let account = packet.account;
    let characters = ctx
        .store
        .call(move |store| store.character_list(&account))
        .await?;

    debug!(
        "Sending {} characters to session {}",
        characters.len(),
        caller.session_id
    );
    reply(&ctx, caller.session_id, &SendClistPacket::new(characters)).await;
    Ok(())
}

/// Validates and stores a new character, then acknowledges it
///
/// The character starts with the skills of its profession template on top
/// of whatever the client sent. A name race between two sessions is
/// settled by the store itself, which refuses the second insert.
pub async fn handle_create_player(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: CreatePlayerPacket,
) -> Result<(), DispatchError> {
    let mut pc = packet.pc;

    if !valid_character_name(&pc.firstname) {
        return Err(DispatchError::Denied(format!(
            "{:?} is not a valid name (3 to 20 letters)",
            pc.firstname
        )));
    }
    if ctx.world.templates.race(&pc.race).is_none() {
        return Err(DispatchError::Denied(format!("unknown race {}", pc.race)));
    }
    let profession = ctx
        .world
        .templates
        .profession(&pc.profession)
        .ok_or_else(|| DispatchError::Denied(format!("unknown profession {}", pc.profession)))?;
    for (skill, value) in &profession.skills {
        pc.skills.entry(skill.clone()).or_insert(*value);
    }

    let account = pc.account.clone();
    let max = ctx.max_character_slots;
    let slots = ctx
        .store
        .call(move |store| store.remaining_slots(&account, max))
        .await?;
    if slots == 0 {
        return Err(DispatchError::Denied(format!(
            "account {} has no free character slots",
            pc.account
        )));
    }

    let name = pc.firstname.clone();
    let taken = ctx
        .store
        .call(move |store| store.character_name_taken(&name))
        .await?;
    if taken {
        return Err(StoreError::NameTaken(pc.firstname).into());
    }

    let name = pc.firstname.clone();
    ctx.store.call(move |store| store.create_character(pc)).await?;
    info!("Session {} created character {}", caller.session_id, name);

    reply(&ctx, caller.session_id, &AckPacket::new(caller.session_id)).await;
    Ok(())
}

/// Binds a stored character to the caller's session
///
/// The registry is checked before the store lookup and again, atomically,
/// while binding. On success the live character is sent back.
pub async fn handle_connect(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: ConnectPacket,
) -> Result<(), DispatchError> {
    let session_id = caller.session_id;
    let name = packet.firstname;

    if let Err(e) = ctx.registry.check_bindable(session_id, &name).await {
        return Err(refuse_binding(&ctx, session_id, e).await);
    }

    let lookup = name.clone();
    let pc = ctx
        .store
        .call(move |store| store.load_character_by_name(&lookup))
        .await?
        .ok_or_else(|| SessionError::PlayerNotFound(name.clone()))?;

    if let Err(e) = ctx.registry.bind_player(session_id, pc).await {
        return Err(refuse_binding(&ctx, session_id, e).await);
    }

    let live = ctx
        .registry
        .player(session_id)
        .await
        .ok_or(SessionError::NoPlayerBound(session_id))?;
    if caller.verification == Some(Verification::Established) {
        info!("{} joined from {}", name, caller.origin);
    }
    reply(&ctx, session_id, &SendPlayerPacket::new(session_id, live)).await;
    Ok(())
}

/// Applies the rebind policy to a refused binding.
async fn refuse_binding(
    ctx: &ServerContext,
    session_id: SessionId,
    error: SessionError,
) -> DispatchError {
    if let SessionError::AlreadyBound { bound, .. } = &error {
        if ctx.rebind_policy == RebindPolicy::ForceDisconnect {
            warn!(
                "Session {} tried to connect a second character; dropping {}",
                session_id, bound
            );
            ctx.registry.disconnect(session_id, true).await;
        }
    }
    error.into()
}

/// Client-initiated teardown. Works whether or not a character is bound.
pub async fn handle_disconnect(
    ctx: Arc<ServerContext>,
    caller: Caller,
    _packet: DisconnectPacket,
) -> Result<(), DispatchError> {
    ctx.registry.disconnect(caller.session_id, false).await;
    Ok(())
}

pub async fn handle_move_player(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: MovePlayerPacket,
) -> Result<(), DispatchError> {
    ctx.registry
        .move_player(
            caller.session_id,
            packet.x,
            packet.y,
            packet.z,
            packet.direction,
        )
        .await?;
    Ok(())
}
