//! Opcode enumeration shared by the server and clients.
//!
//! Every wire record starts with an `Opcode` field. Values are dense, starting
//! at zero, so the numeric value doubles as an index into [`Opcode::ALL`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw opcode value that does not name any known record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown opcode {0}")]
pub struct UnknownOpcode(pub u8);

/// Tag identifying the shape of a wire record.
///
/// The comment on each variant names the direction it travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Opcode {
    /// Both. Ignored.
    Empty = 0,
    /// Both. Debug traffic.
    Generic,
    /// Both. Acknowledges a request.
    Ack,
    /// Both. Carries an error message.
    Error,
    /// Client. Requests the character list of an account.
    ReqClist,
    /// Server. Character list reply.
    SendClist,
    /// Client. Submits a newly created character.
    CreatePlayer,
    /// Client. Binds a character to the session.
    Connect,
    /// Both. Ends the session.
    Disconnect,
    /// Server. Full update of the session's own character.
    SendPlayer,
    /// Server. Update of another player character.
    SendPc,
    /// Server. Update of a non-player character.
    SendNpc,
    /// Client. Position and facing update.
    MovePlayer,
    /// Client. Development point expenditure.
    SpendDp,
    TalkCmd,
    AttackCmd,
    TradeCmd,
    InviteCmd,
    GuildInviteCmd,
    GuildKick,
    GuildPromote,
    GuildDemote,
    /// Client. `/s`
    SayCmd,
    /// Client. `/y`
    YellCmd,
    /// Client. `/ooc`
    OocCmd,
    /// Client. `/h`
    HelpCmd,
    /// Client. `/p`
    PartyChatCmd,
    /// Client. `/g`
    GuildChatCmd,
    /// Client. `/w <target>`
    WhisperCmd,
    RelaySay,
    RelayYell,
    RelayOoc,
    RelayHelp,
    RelayPartyChat,
    RelayGuildChat,
    RelayWhisper,
    ActivateCmd,
    EnvUpdate,
    DialogueText,
    DialogueCmd,
    SendItem,
    InitShop,
    ShopItem,
    BuyItem,
    InitLoot,
    LootItem,
    TakeLoot,
    InitTrade,
    OfferItem,
    PullItem,
    TradeItem,
    RemoveItem,
    AcceptTrade,
    UnacceptTrade,
    CommunicateTrade,
    FinalizeTrade,
    InitCombat,
    AddNpcCombat,
    AddPcCombat,
    RemoveNpcCombat,
    RemovePcCombat,
}

impl Opcode {
    /// Every opcode, ordered by wire value.
    pub const ALL: [Opcode; 61] = [
        Opcode::Empty,
        Opcode::Generic,
        Opcode::Ack,
        Opcode::Error,
        Opcode::ReqClist,
        Opcode::SendClist,
        Opcode::CreatePlayer,
        Opcode::Connect,
        Opcode::Disconnect,
        Opcode::SendPlayer,
        Opcode::SendPc,
        Opcode::SendNpc,
        Opcode::MovePlayer,
        Opcode::SpendDp,
        Opcode::TalkCmd,
        Opcode::AttackCmd,
        Opcode::TradeCmd,
        Opcode::InviteCmd,
        Opcode::GuildInviteCmd,
        Opcode::GuildKick,
        Opcode::GuildPromote,
        Opcode::GuildDemote,
        Opcode::SayCmd,
        Opcode::YellCmd,
        Opcode::OocCmd,
        Opcode::HelpCmd,
        Opcode::PartyChatCmd,
        Opcode::GuildChatCmd,
        Opcode::WhisperCmd,
        Opcode::RelaySay,
        Opcode::RelayYell,
        Opcode::RelayOoc,
        Opcode::RelayHelp,
        Opcode::RelayPartyChat,
        Opcode::RelayGuildChat,
        Opcode::RelayWhisper,
        Opcode::ActivateCmd,
        Opcode::EnvUpdate,
        Opcode::DialogueText,
        Opcode::DialogueCmd,
        Opcode::SendItem,
        Opcode::InitShop,
        Opcode::ShopItem,
        Opcode::BuyItem,
        Opcode::InitLoot,
        Opcode::LootItem,
        Opcode::TakeLoot,
        Opcode::InitTrade,
        Opcode::OfferItem,
        Opcode::PullItem,
        Opcode::TradeItem,
        Opcode::RemoveItem,
        Opcode::AcceptTrade,
        Opcode::UnacceptTrade,
        Opcode::CommunicateTrade,
        Opcode::FinalizeTrade,
        Opcode::InitCombat,
        Opcode::AddNpcCombat,
        Opcode::AddPcCombat,
        Opcode::RemoveNpcCombat,
        Opcode::RemovePcCombat,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(value: u8) -> Result<Self, UnknownOpcode> {
        Opcode::ALL
            .get(value as usize)
            .copied()
            .ok_or(UnknownOpcode(value))
    }
}
