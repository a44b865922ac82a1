//! # Shared protocol schema
//!
//! Opcodes, wire records and character data used by both the dedicated
//! server and its clients, plus the MessagePack codec that moves them over
//! UDP. Nothing in this crate performs I/O.

pub mod character;
pub mod codec;
pub mod opcode;
pub mod packets;

pub use character::{
    valid_character_name, Attributes, Equipment, ItemTemplate, Npc, PlayerCharacter, Position,
    ProfessionTemplate, RaceTemplate, SpellTemplate, Templates, Vitals,
};
pub use codec::{decode, encode, peek_known_opcode, peek_opcode, CodecError};
pub use opcode::{Opcode, UnknownOpcode};
pub use packets::*;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Receive buffer size used when nothing else is configured.
pub const DEFAULT_DATAGRAM_SIZE: usize = 4096;
