//! One record type per opcode.
//!
//! Field names on the wire are fixed by the `serde` renames below; the codec
//! matches fields by name, so renaming one breaks compatibility with
//! existing clients even if the Rust field keeps its name.

use crate::character::PlayerCharacter;
use crate::opcode::Opcode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Client-chosen session key.
pub type SessionId = u64;

/// A wire record tied to exactly one opcode.
pub trait Record: Serialize + DeserializeOwned {
    const OPCODE: Opcode;
}

/// Records that name the session they belong to.
pub trait SessionPacket {
    fn session_id(&self) -> Option<SessionId>;
}

/// Minimal view of any record: only the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeHeader {
    #[serde(rename = "Opcode")]
    pub opcode: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmptyPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
}

impl EmptyPacket {
    pub fn new() -> Self {
        Self {
            opcode: Opcode::Empty,
        }
    }
}

impl Default for EmptyPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl Record for EmptyPacket {
    const OPCODE: Opcode = Opcode::Empty;
}

impl SessionPacket for EmptyPacket {
    fn session_id(&self) -> Option<SessionId> {
        None
    }
}

/// Records made of an opcode and a session id and nothing else.
macro_rules! session_records {
    ($($(#[$meta:meta])* $name:ident => $opcode:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
            pub struct $name {
                #[serde(rename = "Opcode")]
                pub opcode: Opcode,
                #[serde(rename = "SessionID")]
                pub session_id: SessionId,
            }

            impl $name {
                pub fn new(session_id: SessionId) -> Self {
                    Self {
                        opcode: Opcode::$opcode,
                        session_id,
                    }
                }
            }

            impl Record for $name {
                const OPCODE: Opcode = Opcode::$opcode;
            }

            impl SessionPacket for $name {
                fn session_id(&self) -> Option<SessionId> {
                    Some(self.session_id)
                }
            }
        )*
    };
}

/// Client chat commands: session id plus message text.
macro_rules! chat_records {
    ($($(#[$meta:meta])* $name:ident => $opcode:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
            pub struct $name {
                #[serde(rename = "Opcode")]
                pub opcode: Opcode,
                #[serde(rename = "SessionID")]
                pub session_id: SessionId,
                #[serde(rename = "Message")]
                pub message: String,
            }

            impl $name {
                pub fn new(session_id: SessionId, message: &str) -> Self {
                    Self {
                        opcode: Opcode::$opcode,
                        session_id,
                        message: message.to_string(),
                    }
                }
            }

            impl Record for $name {
                const OPCODE: Opcode = Opcode::$opcode;
            }

            impl SessionPacket for $name {
                fn session_id(&self) -> Option<SessionId> {
                    Some(self.session_id)
                }
            }
        )*
    };
}

/// Server relays of chat: who said it and what was said.
macro_rules! relay_records {
    ($($(#[$meta:meta])* $name:ident => $opcode:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
            pub struct $name {
                #[serde(rename = "Opcode")]
                pub opcode: Opcode,
                #[serde(rename = "Sender")]
                pub sender: String,
                #[serde(rename = "Message")]
                pub message: String,
            }

            impl $name {
                pub fn new(sender: &str, message: &str) -> Self {
                    Self {
                        opcode: Opcode::$opcode,
                        sender: sender.to_string(),
                        message: message.to_string(),
                    }
                }
            }

            impl Record for $name {
                const OPCODE: Opcode = Opcode::$opcode;
            }
        )*
    };
}

session_records! {
    /// Debug traffic.
    GenericPacket => Generic;
    AckPacket => Ack;
    /// Ends the session. Sent by clients, and by the server as a notification
    /// before it drops a session.
    DisconnectPacket => Disconnect;
    SendPcPacket => SendPc;
    SendNpcPacket => SendNpc;
    SpendDpPacket => SpendDp;
    TalkCmdPacket => TalkCmd;
    AttackCmdPacket => AttackCmd;
    TradeCmdPacket => TradeCmd;
    InviteCmdPacket => InviteCmd;
    GuildInviteCmdPacket => GuildInviteCmd;
    GuildKickCmdPacket => GuildKick;
    GuildPromoteCmdPacket => GuildPromote;
    GuildDemoteCmdPacket => GuildDemote;
    ActivateCmdPacket => ActivateCmd;
    EnvironmentUpdatePacket => EnvUpdate;
    DialogueTextPacket => DialogueText;
    DialogueCmdPacket => DialogueCmd;
    SendItemPacket => SendItem;
    InitShopPacket => InitShop;
    ShopItemPacket => ShopItem;
    BuyItemPacket => BuyItem;
    InitLootPacket => InitLoot;
    LootItemPacket => LootItem;
    TakeLootPacket => TakeLoot;
    InitTradePacket => InitTrade;
    OfferItemPacket => OfferItem;
    PullItemPacket => PullItem;
    TradeItemPacket => TradeItem;
    RemoveItemPacket => RemoveItem;
    AcceptTradePacket => AcceptTrade;
    UnacceptTradePacket => UnacceptTrade;
    CommunicateTradePacket => CommunicateTrade;
    FinalizeTradePacket => FinalizeTrade;
    InitCombatPacket => InitCombat;
    AddNpcCombatPacket => AddNpcCombat;
    AddPcCombatPacket => AddPcCombat;
    RemoveNpcCombatPacket => RemoveNpcCombat;
    RemovePcCombatPacket => RemovePcCombat;
}

chat_records! {
    SayCmdPacket => SayCmd;
    YellCmdPacket => YellCmd;
    OocCmdPacket => OocCmd;
    HelpCmdPacket => HelpCmd;
    PartyChatCmdPacket => PartyChatCmd;
    GuildChatCmdPacket => GuildChatCmd;
}

relay_records! {
    RelaySayPacket => RelaySay;
    RelayYellPacket => RelayYell;
    RelayOocPacket => RelayOoc;
    RelayHelpPacket => RelayHelp;
    RelayPartyChatPacket => RelayPartyChat;
    RelayGuildChatPacket => RelayGuildChat;
    RelayWhisperPacket => RelayWhisper;
}

/// Error report. Inbound from clients it is only logged; outbound it tells
/// the client why a request failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "SessionID")]
    pub session_id: SessionId,
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl ErrorPacket {
    pub fn new(session_id: SessionId, message: &str) -> Self {
        Self {
            opcode: Opcode::Error,
            session_id,
            message: message.to_string(),
        }
    }
}

impl Record for ErrorPacket {
    const OPCODE: Opcode = Opcode::Error;
}

impl SessionPacket for ErrorPacket {
    fn session_id(&self) -> Option<SessionId> {
        Some(self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReqClistPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "SessionID")]
    pub session_id: SessionId,
    #[serde(rename = "Account")]
    pub account: String,
}

impl ReqClistPacket {
    pub fn new(session_id: SessionId, account: &str) -> Self {
        Self {
            opcode: Opcode::ReqClist,
            session_id,
            account: account.to_string(),
        }
    }
}

impl Record for ReqClistPacket {
    const OPCODE: Opcode = Opcode::ReqClist;
}

impl SessionPacket for ReqClistPacket {
    fn session_id(&self) -> Option<SessionId> {
        Some(self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendClistPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "Characters")]
    pub characters: Vec<String>,
}

impl SendClistPacket {
    pub fn new(characters: Vec<String>) -> Self {
        Self {
            opcode: Opcode::SendClist,
            characters,
        }
    }
}

impl Record for SendClistPacket {
    const OPCODE: Opcode = Opcode::SendClist;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePlayerPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "SessionID")]
    pub session_id: SessionId,
    #[serde(rename = "Pc")]
    pub pc: PlayerCharacter,
}

impl CreatePlayerPacket {
    pub fn new(session_id: SessionId, pc: PlayerCharacter) -> Self {
        Self {
            opcode: Opcode::CreatePlayer,
            session_id,
            pc,
        }
    }
}

impl Record for CreatePlayerPacket {
    const OPCODE: Opcode = Opcode::CreatePlayer;
}

impl SessionPacket for CreatePlayerPacket {
    fn session_id(&self) -> Option<SessionId> {
        Some(self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "SessionID")]
    pub session_id: SessionId,
    #[serde(rename = "Firstname")]
    pub firstname: String,
}

impl ConnectPacket {
    pub fn new(session_id: SessionId, firstname: &str) -> Self {
        Self {
            opcode: Opcode::Connect,
            session_id,
            firstname: firstname.to_string(),
        }
    }
}

impl Record for ConnectPacket {
    const OPCODE: Opcode = Opcode::Connect;
}

impl SessionPacket for ConnectPacket {
    fn session_id(&self) -> Option<SessionId> {
        Some(self.session_id)
    }
}

/// Full state of the character bound to the receiving session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendPlayerPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "SessionID")]
    pub session_id: SessionId,
    #[serde(rename = "Pc")]
    pub pc: PlayerCharacter,
}

impl SendPlayerPacket {
    pub fn new(session_id: SessionId, pc: PlayerCharacter) -> Self {
        Self {
            opcode: Opcode::SendPlayer,
            session_id,
            pc,
        }
    }
}

impl Record for SendPlayerPacket {
    const OPCODE: Opcode = Opcode::SendPlayer;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePlayerPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "SessionID")]
    pub session_id: SessionId,
    #[serde(rename = "X")]
    pub x: f32,
    #[serde(rename = "Y")]
    pub y: f32,
    #[serde(rename = "Z")]
    pub z: f32,
    #[serde(rename = "Direction")]
    pub direction: f32,
}

impl MovePlayerPacket {
    pub fn new(session_id: SessionId, x: f32, y: f32, z: f32, direction: f32) -> Self {
        Self {
            opcode: Opcode::MovePlayer,
            session_id,
            x,
            y,
            z,
            direction,
        }
    }
}

impl Record for MovePlayerPacket {
    const OPCODE: Opcode = Opcode::MovePlayer;
}

impl SessionPacket for MovePlayerPacket {
    fn session_id(&self) -> Option<SessionId> {
        Some(self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhisperCmdPacket {
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,
    #[serde(rename = "SessionID")]
    pub session_id: SessionId,
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl WhisperCmdPacket {
    pub fn new(session_id: SessionId, target: &str, message: &str) -> Self {
        Self {
            opcode: Opcode::WhisperCmd,
            session_id,
            target: target.to_string(),
            message: message.to_string(),
        }
    }
}

impl Record for WhisperCmdPacket {
    const OPCODE: Opcode = Opcode::WhisperCmd;
}

impl SessionPacket for WhisperCmdPacket {
    fn session_id(&self) -> Option<SessionId> {
        Some(self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_matching_opcode() {
        assert_eq!(ConnectPacket::new(1, "Joe").opcode, ConnectPacket::OPCODE);
        assert_eq!(DisconnectPacket::new(1).opcode, DisconnectPacket::OPCODE);
        assert_eq!(
            MovePlayerPacket::new(1, 0.0, 0.0, 0.0, 0.0).opcode,
            MovePlayerPacket::OPCODE
        );
        assert_eq!(SayCmdPacket::new(1, "hi").opcode, Opcode::SayCmd);
        assert_eq!(RelayWhisperPacket::new("Joe", "hi").opcode, Opcode::RelayWhisper);
        assert_eq!(TakeLootPacket::new(1).opcode, Opcode::TakeLoot);
        assert_eq!(SendClistPacket::new(vec![]).opcode, Opcode::SendClist);
    }

    #[test]
    fn test_session_ids() {
        assert_eq!(EmptyPacket::new().session_id(), None);
        assert_eq!(GenericPacket::new(9).session_id(), Some(9));
        assert_eq!(WhisperCmdPacket::new(42, "Bob", "psst").session_id(), Some(42));
        assert_eq!(ErrorPacket::new(7, "nope").session_id(), Some(7));
    }
}
