//! Opcode routing
//!
//! Every opcode a client may send has one [`Route`]: the rule deciding how
//! its session is checked, the record type it decodes to and the handler
//! that runs afterwards. Adding an opcode means adding a route; nothing in
//! [`dispatch`] changes.

use crate::chat;
use crate::config::RebindPolicy;
use crate::error::{DispatchError, SessionError};
use crate::handlers;
use crate::queue::RawDatagram;
use crate::registry::{SessionRegistry, Verification};
use crate::stats::ServerStats;
use crate::store::{StoreGateway, WorldData};
use log::{debug, warn};
use shared::*;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

/// State every handler can reach.
#[derive(Debug)]
pub struct ServerContext {
    pub registry: SessionRegistry,
    pub store: StoreGateway,
    pub world: WorldData,
    pub stats: Arc<ServerStats>,
    pub rebind_policy: RebindPolicy,
    pub max_character_slots: u32,
}

/// How a route checks the sender before its handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No session check at all.
    Open,
    /// May open a new session; a known one must match its origin.
    Handshake,
    /// Session must already exist and match its origin.
    Verified,
}

/// Who sent the packet being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub session_id: SessionId,
    pub origin: SocketAddr,
    /// `None` for open routes.
    pub verification: Option<Verification>,
}

/// How far a datagram got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Unknown opcode, or one clients never send.
    Unrouted,
    Malformed,
    Rejected,
    Failed,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send>>;
type Invoke = Box<dyn Fn(Arc<ServerContext>, RawDatagram) -> HandlerFuture + Send + Sync>;

pub struct Route {
    opcode: Opcode,
    access: Access,
    invoke: Invoke,
}

impl Route {
    /// Builds the route for record type `P`
    ///
    /// The returned route decodes the full record, checks the session
    /// according to `access`, and hands the record to `handler`. Handler
    /// errors the client can act on are answered with an error packet.
    pub fn new<P, H, Fut>(access: Access, handler: H) -> Self
    where
        P: Record + SessionPacket + Send + 'static,
        H: Fn(Arc<ServerContext>, Caller, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke = move |ctx: Arc<ServerContext>, datagram: RawDatagram| -> HandlerFuture {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let packet: P = decode(datagram.payload())?;
                let caller = authorize(&ctx, access, packet.session_id(), datagram.origin).await?;

                let result = (*handler)(Arc::clone(&ctx), caller, packet).await;
                if let Err(e) = &result {
                    if caller.verification.is_some() {
                        report(&ctx, caller.session_id, e).await;
                    }
                }
                result
            })
        };

        Self {
            opcode: P::OPCODE,
            access,
            invoke: Box::new(invoke),
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn access(&self) -> Access {
        self.access
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("opcode", &self.opcode)
            .field("access", &self.access)
            .finish()
    }
}

async fn authorize(
    ctx: &ServerContext,
    access: Access,
    session_id: Option<SessionId>,
    origin: SocketAddr,
) -> Result<Caller, DispatchError> {
    if access == Access::Open {
        return Ok(Caller {
            session_id: session_id.unwrap_or_default(),
            origin,
            verification: None,
        });
    }

    // Every non-open record carries a session id; zero stands in for a
    // record type that somehow does not.
    let session_id = session_id.ok_or(SessionError::UnknownSession(0))?;
    let verification = ctx
        .registry
        .verify(session_id, origin, access == Access::Handshake)
        .await?;

    Ok(Caller {
        session_id,
        origin,
        verification: Some(verification),
    })
}

/// Sends an error packet for failures the client should hear about.
async fn report(ctx: &ServerContext, session_id: SessionId, error: &DispatchError) {
    let message = match error.client_message() {
        Some(message) => message,
        None => return,
    };
    // A forced disconnect has already removed the session.
    if let Some(reply) = ctx.registry.reply_handle(session_id).await {
        if let Err(e) = reply.send(&ErrorPacket::new(session_id, &message)) {
            warn!("Failed to send error to session {}: {}", session_id, e);
        }
    }
}

/// Routes keyed by raw opcode value.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<u8, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every opcode the server accepts from clients.
    pub fn standard() -> Self {
        use Access::*;

        let mut table = Self::new();

        table.insert(Route::new(Open, handlers::handle_empty));
        table.insert(Route::new(Open, handlers::handle_generic));

        table.insert(Route::new(Handshake, handlers::handle_req_clist));
        table.insert(Route::new(Handshake, handlers::handle_create_player));
        table.insert(Route::new(Handshake, handlers::handle_connect));

        table.insert(Route::new(Verified, handlers::handle_disconnect));
        table.insert(Route::new(Verified, handlers::handle_move_player));

        table.insert(Route::new(Verified, chat::handle_say));
        table.insert(Route::new(Verified, chat::handle_yell));
        table.insert(Route::new(Verified, chat::handle_ooc));
        table.insert(Route::new(Verified, chat::handle_help));
        table.insert(Route::new(Verified, chat::handle_party_chat));
        table.insert(Route::new(Verified, chat::handle_guild_chat));
        table.insert(Route::new(Verified, chat::handle_whisper));

        table.insert(Route::new(Verified, handlers::acknowledge::<AckPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<ErrorPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<SpendDpPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<TalkCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<AttackCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<TradeCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<InviteCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<GuildInviteCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<GuildKickCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<GuildPromoteCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<GuildDemoteCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<ActivateCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<DialogueCmdPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<BuyItemPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<TakeLootPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<OfferItemPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<PullItemPacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<AcceptTradePacket>));
        table.insert(Route::new(Verified, handlers::acknowledge::<UnacceptTradePacket>));

        table
    }

    /// Adds or replaces the route for the route's opcode.
    pub fn insert(&mut self, route: Route) -> Option<Route> {
        self.routes.insert(route.opcode.as_u8(), route)
    }

    pub fn get(&self, opcode: u8) -> Option<&Route> {
        self.routes.get(&opcode)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Runs one datagram through its route and records the outcome
///
/// Never fails: every problem is logged, counted and swallowed so the
/// calling worker can move on to the next datagram.
pub async fn dispatch(ctx: &Arc<ServerContext>, routes: &RouteTable, datagram: RawDatagram) -> Outcome {
    let origin = datagram.origin;

    let raw = match peek_opcode(datagram.payload()) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Dropping malformed datagram from {}: {}", origin, e);
            ctx.stats.record_decode_failure();
            return Outcome::Malformed;
        }
    };

    let route = match routes.get(raw) {
        Some(route) => route,
        None => {
            match Opcode::try_from(raw) {
                Ok(opcode) => debug!("Ignoring {:?} from {}: not a client opcode", opcode, origin),
                Err(e) => debug!("Ignoring datagram from {}: {}", origin, e),
            }
            ctx.stats.record_unrouted();
            return Outcome::Unrouted;
        }
    };

    match (route.invoke)(Arc::clone(ctx), datagram).await {
        Ok(()) => {
            ctx.stats.record_handled();
            Outcome::Handled
        }
        Err(DispatchError::Codec(e)) => {
            debug!("Dropping undecodable {:?} from {}: {}", route.opcode, origin, e);
            ctx.stats.record_decode_failure();
            Outcome::Malformed
        }
        Err(DispatchError::Session(e)) if e.is_verification_failure() => {
            warn!("Rejected {:?} from {}: {}", route.opcode, origin, e);
            ctx.stats.record_rejected();
            Outcome::Rejected
        }
        Err(e) => {
            warn!("{:?} from {} failed: {}", route.opcode, origin, e);
            ctx.stats.record_failed();
            Outcome::Failed
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reply::{OutboundReceiver, Outgoing};
    use crate::store::{MemoryStore, WorldSeed};
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    pub(crate) fn world_seed() -> WorldSeed {
        let json = r#"{
            "Templates": {
                "Races": [{ "Name": "Human" }, { "Name": "Elf" }],
                "Professions": [{ "Name": "Warrior", "Skills": { "Swords": 5 } }]
            },
            "Characters": [
                { "Account": "alice", "Firstname": "Joe", "Race": "Human", "Profession": "Warrior",
                  "Guild": "Lions", "Party": "p1", "Position": { "Zone": "Town", "X": 0, "Y": 0, "Z": 0, "Direction": 0 } },
                { "Account": "alice", "Firstname": "Ann", "Race": "Elf", "Profession": "Warrior",
                  "Party": "p1", "Position": { "Zone": "Town", "X": 0, "Y": 0, "Z": 0, "Direction": 0 } },
                { "Account": "bob", "Firstname": "Bob", "Race": "Human", "Profession": "Warrior",
                  "Guild": "Lions", "Position": { "Zone": "Cave", "X": 0, "Y": 0, "Z": 0, "Direction": 0 } }
            ]
        }"#;
        serde_json::from_str(json).unwrap()
    }

    pub(crate) fn context(policy: RebindPolicy) -> (Arc<ServerContext>, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = MemoryStore::new(world_seed());
        let world = WorldData::load(&store).unwrap();
        let ctx = ServerContext {
            registry: SessionRegistry::new(tx),
            store: StoreGateway::new(Arc::new(store), 4, Duration::from_secs(1)),
            world,
            stats: Arc::new(ServerStats::new()),
            rebind_policy: policy,
            max_character_slots: 3,
        };
        (Arc::new(ctx), rx)
    }

    pub(crate) fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    pub(crate) fn datagram<R: Record>(origin: SocketAddr, record: &R) -> RawDatagram {
        RawDatagram::new(origin, &encode(record).unwrap())
    }

    pub(crate) fn drain(rx: &mut OutboundReceiver) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Ok(outgoing) = rx.try_recv() {
            out.push(outgoing);
        }
        out
    }

    #[test]
    fn test_standard_table_covers_client_opcodes() {
        let table = RouteTable::standard();

        for opcode in [Opcode::Empty, Opcode::Generic] {
            assert_eq!(table.get(opcode.as_u8()).unwrap().access(), Access::Open);
        }
        for opcode in [Opcode::ReqClist, Opcode::CreatePlayer, Opcode::Connect] {
            assert_eq!(table.get(opcode.as_u8()).unwrap().access(), Access::Handshake);
        }
        for opcode in [Opcode::Disconnect, Opcode::MovePlayer, Opcode::SayCmd, Opcode::AttackCmd] {
            assert_eq!(table.get(opcode.as_u8()).unwrap().access(), Access::Verified);
        }
        for opcode in [Opcode::SendClist, Opcode::RelaySay, Opcode::SendPlayer, Opcode::InitCombat] {
            assert!(table.get(opcode.as_u8()).is_none(), "{:?} is server to client", opcode);
        }
        for (raw, route) in &table.routes {
            assert_eq!(*raw, route.opcode().as_u8());
        }
    }

    #[tokio::test]
    async fn test_connect_then_move() {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &ConnectPacket::new(42, "Joe"))).await;
        assert_eq!(outcome, Outcome::Handled);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        let player: SendPlayerPacket = decode(&sent[0].payload).unwrap();
        assert_eq!(player.pc.firstname, "Joe");

        let outcome = dispatch(
            &ctx,
            &table,
            datagram(addr(5000), &MovePlayerPacket::new(42, 1.0, 2.0, 3.0, 90.0)),
        )
        .await;
        assert_eq!(outcome, Outcome::Handled);

        let joe = ctx.registry.player(42).await.unwrap();
        assert_approx_eq!(joe.position.x, 1.0);
        assert_approx_eq!(joe.position.y, 2.0);
        assert_approx_eq!(joe.position.z, 3.0);
        assert_approx_eq!(joe.position.direction, 90.0);
    }

    #[tokio::test]
    async fn test_unknown_and_unrouted_opcodes_are_ignored() {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        let unknown = rmp_serde::to_vec_named(&OpcodeHeader { opcode: 200 }).unwrap();
        let outcome = dispatch(&ctx, &table, RawDatagram::new(addr(5000), &unknown)).await;
        assert_eq!(outcome, Outcome::Unrouted);

        let relay = datagram(addr(5000), &RelaySayPacket::new("Joe", "hi"));
        assert_eq!(dispatch(&ctx, &table, relay).await, Outcome::Unrouted);

        let garbage = RawDatagram::new(addr(5000), &[0xc1, 0x00, 0xff]);
        assert_eq!(dispatch(&ctx, &table, garbage).await, Outcome::Malformed);

        let empty = RawDatagram::new(addr(5000), &[]);
        assert_eq!(dispatch(&ctx, &table, empty).await, Outcome::Malformed);

        // Still serving.
        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &ConnectPacket::new(42, "Joe"))).await;
        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(drain(&mut rx).len(), 1);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.unrouted, 2);
        assert_eq!(stats.decode_failures, 2);
        assert_eq!(stats.handled, 1);
    }

    #[tokio::test]
    async fn test_wrong_shape_for_opcode_is_malformed() {
        let (ctx, _rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        // Carries the CONNECT opcode but lacks Firstname.
        let bogus = rmp_serde::to_vec_named(&DisconnectPacket {
            opcode: Opcode::Connect,
            session_id: 42,
        })
        .unwrap();
        let outcome = dispatch(&ctx, &table, RawDatagram::new(addr(5000), &bogus)).await;
        assert_eq!(outcome, Outcome::Malformed);
        assert!(!ctx.registry.contains(42).await);
    }

    #[tokio::test]
    async fn test_hijack_is_rejected_silently() {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        dispatch(&ctx, &table, datagram(addr(5000), &ConnectPacket::new(42, "Joe"))).await;
        drain(&mut rx);

        let outcome = dispatch(
            &ctx,
            &table,
            datagram(addr(6000), &MovePlayerPacket::new(42, 9.0, 9.0, 9.0, 9.0)),
        )
        .await;
        assert_eq!(outcome, Outcome::Rejected);

        let outcome = dispatch(&ctx, &table, datagram(addr(6000), &DisconnectPacket::new(42))).await;
        assert_eq!(outcome, Outcome::Rejected);

        assert!(drain(&mut rx).is_empty());
        assert_eq!(ctx.registry.origin(42).await, Some(addr(5000)));
        assert_eq!(ctx.registry.player(42).await.unwrap().position.x, 0.0);
        assert_eq!(ctx.stats.snapshot().rejected, 2);
    }

    #[tokio::test]
    async fn test_verified_opcode_needs_established_session() {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &SayCmdPacket::new(7, "hello"))).await;
        assert_eq!(outcome, Outcome::Rejected);
        assert!(!ctx.registry.contains(7).await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_open_routes_skip_session_checks() {
        let (ctx, _rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &EmptyPacket::new())).await;
        assert_eq!(outcome, Outcome::Handled);
        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &GenericPacket::new(9))).await;
        assert_eq!(outcome, Outcome::Handled);
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_handler_failure_sends_error_packet() {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &ConnectPacket::new(42, "Nobody"))).await;
        assert_eq!(outcome, Outcome::Failed);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].addr, addr(5000));
        let error: ErrorPacket = decode(&sent[0].payload).unwrap();
        assert_eq!(error.session_id, 42);
        assert_eq!(error.message, "no character named Nobody");
        assert_eq!(ctx.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_placeholders_are_verified_then_ignored() {
        let (ctx, mut rx) = context(RebindPolicy::Reject);
        let table = RouteTable::standard();

        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &AttackCmdPacket::new(42))).await;
        assert_eq!(outcome, Outcome::Rejected);

        dispatch(&ctx, &table, datagram(addr(5000), &ConnectPacket::new(42, "Joe"))).await;
        drain(&mut rx);

        let outcome = dispatch(&ctx, &table, datagram(addr(5000), &AttackCmdPacket::new(42))).await;
        assert_eq!(outcome, Outcome::Handled);
        assert!(drain(&mut rx).is_empty());
    }
}
