//! Chat relay.
//!
//! Each chat opcode resolves its recipients through the session registry
//! and pushes a relay record carrying the speaker's name to every one of
//! them, the speaker included.

use crate::dispatch::{Caller, ServerContext};
use crate::error::{DispatchError, SessionError};
use crate::registry::Audience;
use log::{debug, warn};
use shared::*;
use std::sync::Arc;

/// Sends `record` to everyone in `audience` and returns how many got it.
async fn relay<R: Record>(ctx: &ServerContext, audience: &Audience, record: &R) -> usize {
    let recipients = ctx.registry.recipients(audience).await;
    let mut delivered = 0;
    for (name, handle) in recipients {
        match handle.send(record) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Failed to relay {:?} to {}: {}", R::OPCODE, name, e),
        }
    }
    delivered
}

async fn speaker(ctx: &ServerContext, caller: &Caller) -> Result<PlayerCharacter, DispatchError> {
    ctx.registry
        .player(caller.session_id)
        .await
        .ok_or_else(|| SessionError::NoPlayerBound(caller.session_id).into())
}

pub async fn handle_say(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: SayCmdPacket,
) -> Result<(), DispatchError> {
    let pc = speaker(&ctx, &caller).await?;
    let audience = Audience::Zone(pc.position.zone.clone());
    let count = relay(&ctx, &audience, &RelaySayPacket::new(&pc.firstname, &packet.message)).await;
    debug!("{} says to {} in {}: {}", pc.firstname, count, pc.zone(), packet.message);
    Ok(())
}

/// Same reach as say for now; zones have no notion of distance yet.
pub async fn handle_yell(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: YellCmdPacket,
) -> Result<(), DispatchError> {
    let pc = speaker(&ctx, &caller).await?;
    let audience = Audience::Zone(pc.position.zone.clone());
    let count = relay(&ctx, &audience, &RelayYellPacket::new(&pc.firstname, &packet.message)).await;
    debug!("{} yells to {} in {}", pc.firstname, count, pc.zone());
    Ok(())
}

pub async fn handle_ooc(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: OocCmdPacket,
) -> Result<(), DispatchError> {
    let pc = speaker(&ctx, &caller).await?;
    relay(&ctx, &Audience::Everyone, &RelayOocPacket::new(&pc.firstname, &packet.message)).await;
    Ok(())
}

pub async fn handle_help(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: HelpCmdPacket,
) -> Result<(), DispatchError> {
    let pc = speaker(&ctx, &caller).await?;
    relay(&ctx, &Audience::Everyone, &RelayHelpPacket::new(&pc.firstname, &packet.message)).await;
    Ok(())
}

pub async fn handle_party_chat(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: PartyChatCmdPacket,
) -> Result<(), DispatchError> {
    let pc = speaker(&ctx, &caller).await?;
    let party = pc
        .party
        .clone()
        .ok_or_else(|| DispatchError::Denied("you are not in a party".to_string()))?;
    relay(
        &ctx,
        &Audience::Party(party),
        &RelayPartyChatPacket::new(&pc.firstname, &packet.message),
    )
    .await;
    Ok(())
}

pub async fn handle_guild_chat(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: GuildChatCmdPacket,
) -> Result<(), DispatchError> {
    let pc = speaker(&ctx, &caller).await?;
    let guild = pc
        .guild
        .clone()
        .ok_or_else(|| DispatchError::Denied("you are not in a guild".to_string()))?;
    relay(
        &ctx,
        &Audience::Guild(guild),
        &RelayGuildChatPacket::new(&pc.firstname, &packet.message),
    )
    .await;
    Ok(())
}

/// Delivers to the named character only; an offline target is an error
/// reported back to the sender.
pub async fn handle_whisper(
    ctx: Arc<ServerContext>,
    caller: Caller,
    packet: WhisperCmdPacket,
) -> Result<(), DispatchError> {
    let pc = speaker(&ctx, &caller).await?;
    let audience = Audience::Player(packet.target.clone());
    let delivered = relay(
        &ctx,
        &audience,
        &RelayWhisperPacket::new(&pc.firstname, &packet.message),
    )
    .await;

    if delivered == 0 {
        return Err(DispatchError::Denied(format!("{} is not online", packet.target)));
    }
    debug!("{} whispers to {}", pc.firstname, packet.target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::RebindPolicy;
    use crate::dispatch::tests::{addr, context, datagram, drain};
    use crate::dispatch::{dispatch, Outcome, RouteTable, ServerContext};
    use crate::reply::{OutboundReceiver, Outgoing};
    use shared::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    const JOE: u16 = 5001;
    const ANN: u16 = 5002;
    const BOB: u16 = 5003;

    /// Joe and Ann share Town and party p1; Joe and Bob share guild Lions.
    async fn connected() -> (Arc<ServerContext>, RouteTable, OutboundReceiver) {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();
        for (id, port, name) in [(1, JOE, "Joe"), (2, ANN, "Ann"), (3, BOB, "Bob")] {
            let outcome = dispatch(&ctx, &table, datagram(addr(port), &ConnectPacket::new(id, name))).await;
            assert_eq!(outcome, Outcome::Handled);
        }
        drain(&mut rx);
        (ctx, table, rx)
    }

    fn recipients(sent: &[Outgoing]) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = sent.iter().map(|outgoing| outgoing.addr).collect();
        addrs.sort();
        addrs
    }

    #[tokio::test]
    async fn test_say_reaches_zone() {
        let (ctx, table, mut rx) = connected().await;

        let outcome = dispatch(&ctx, &table, datagram(addr(JOE), &SayCmdPacket::new(1, "hello"))).await;
        assert_eq!(outcome, Outcome::Handled);

        let sent = drain(&mut rx);
        assert_eq!(recipients(&sent), [addr(JOE), addr(ANN)]);
        let relay: RelaySayPacket = decode(&sent[0].payload).unwrap();
        assert_eq!(relay.opcode, Opcode::RelaySay);
        assert_eq!(relay.sender, "Joe");
        assert_eq!(relay.message, "hello");
    }

    #[tokio::test]
    async fn test_ooc_reaches_everyone() {
        let (ctx, table, mut rx) = connected().await;

        dispatch(&ctx, &table, datagram(addr(BOB), &OocCmdPacket::new(3, "anyone?"))).await;
        let sent = drain(&mut rx);
        assert_eq!(recipients(&sent), [addr(JOE), addr(ANN), addr(BOB)]);
        let relay: RelayOocPacket = decode(&sent[0].payload).unwrap();
        assert_eq!(relay.sender, "Bob");
    }

    #[tokio::test]
    async fn test_group_chat() {
        let (ctx, table, mut rx) = connected().await;

        dispatch(&ctx, &table, datagram(addr(ANN), &PartyChatCmdPacket::new(2, "inv"))).await;
        assert_eq!(recipients(&drain(&mut rx)), [addr(JOE), addr(ANN)]);

        dispatch(&ctx, &table, datagram(addr(JOE), &GuildChatCmdPacket::new(1, "lions"))).await;
        assert_eq!(recipients(&drain(&mut rx)), [addr(JOE), addr(BOB)]);

        // Bob has no party.
        let outcome = dispatch(&ctx, &table, datagram(addr(BOB), &PartyChatCmdPacket::new(3, "x"))).await;
        assert_eq!(outcome, Outcome::Failed);
        let sent = drain(&mut rx);
        assert_eq!(recipients(&sent), [addr(BOB)]);
        let error: ErrorPacket = decode(&sent[0].payload).unwrap();
        assert_eq!(error.message, "you are not in a party");
    }

    #[tokio::test]
    async fn test_whisper() {
        let (ctx, table, mut rx) = connected().await;

        let outcome = dispatch(
            &ctx,
            &table,
            datagram(addr(JOE), &WhisperCmdPacket::new(1, "Bob", "psst")),
        )
        .await;
        assert_eq!(outcome, Outcome::Handled);
        let sent = drain(&mut rx);
        assert_eq!(recipients(&sent), [addr(BOB)]);
        let relay: RelayWhisperPacket = decode(&sent[0].payload).unwrap();
        assert_eq!(relay.sender, "Joe");
        assert_eq!(relay.message, "psst");
    }

    #[tokio::test]
    async fn test_whisper_to_offline_target() {
        let (ctx, table, mut rx) = connected().await;

        let outcome = dispatch(
            &ctx,
            &table,
            datagram(addr(JOE), &WhisperCmdPacket::new(1, "Nobody", "psst")),
        )
        .await;
        assert_eq!(outcome, Outcome::Failed);

        let sent = drain(&mut rx);
        assert_eq!(recipients(&sent), [addr(JOE)]);
        let error: ErrorPacket = decode(&sent[0].payload).unwrap();
        assert_eq!(error.session_id, 1);
        assert_eq!(error.message, "Nobody is not online");
    }

    #[tokio::test]
    async fn test_chat_needs_a_character() {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        dispatch(&ctx, &table, datagram(addr(JOE), &ReqClistPacket::new(1, "alice"))).await;
        drain(&mut rx);

        let outcome = dispatch(&ctx, &table, datagram(addr(JOE), &SayCmdPacket::new(1, "hi"))).await;
        assert_eq!(outcome, Outcome::Failed);
        let error: ErrorPacket = decode(&drain(&mut rx)[0].payload).unwrap();
        assert_eq!(error.message, "session 1 has no character connected");
    }
}
