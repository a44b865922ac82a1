//! Character and template records.
//!
//! These are owned by the game state store. The server keeps a live copy of
//! each connected [`PlayerCharacter`] and never mutates templates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location and facing inside a zone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    pub zone: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub direction: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vitals {
    pub hp: u32,
    pub max_hp: u32,
    pub bp: u32,
    pub max_bp: u32,
    pub mp: u32,
    pub max_mp: u32,
    /// Stamina.
    pub ep: u32,
    pub max_ep: u32,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            hp: 100,
            max_hp: 100,
            bp: 100,
            max_bp: 100,
            mp: 50,
            max_mp: 50,
            ep: 100,
            max_ep: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attributes {
    pub strength: u32,
    pub constitution: u32,
    pub intelligence: u32,
    pub dexterity: u32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            strength: 10,
            constitution: 10,
            intelligence: 10,
            dexterity: 10,
        }
    }
}

/// Item template names worn in each slot. `None` means the slot is empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Equipment {
    pub head: Option<String>,
    pub chest: Option<String>,
    pub arms: Option<String>,
    pub hands: Option<String>,
    pub legs: Option<String>,
    pub feet: Option<String>,
    pub cloak: Option<String>,
    pub necklace: Option<String>,
    pub ring_one: Option<String>,
    pub ring_two: Option<String>,
    pub right_hand: Option<String>,
    pub left_hand: Option<String>,
}

/// Persistent avatar of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerCharacter {
    pub account: String,
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub guild: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
    pub race: String,
    pub profession: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub skin: String,
    #[serde(default = "default_alive")]
    pub alive: bool,
    #[serde(default = "default_level")]
    pub level: u32,
    /// Unspent development points.
    #[serde(default)]
    pub dp: u32,
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub skills: BTreeMap<String, u32>,
    #[serde(default)]
    pub equipment: Equipment,
    #[serde(default)]
    pub position: Position,
}

fn default_alive() -> bool {
    true
}

fn default_level() -> u32 {
    1
}

impl PlayerCharacter {
    /// Creates a level one character with default vitals, standing at the
    /// origin of `zone`.
    pub fn new(account: &str, firstname: &str, race: &str, profession: &str, zone: &str) -> Self {
        Self {
            account: account.to_string(),
            firstname: firstname.to_string(),
            lastname: String::new(),
            guild: None,
            party: None,
            race: race.to_string(),
            profession: profession.to_string(),
            gender: String::new(),
            face: String::new(),
            skin: String::new(),
            alive: true,
            level: 1,
            dp: 0,
            vitals: Vitals::default(),
            attributes: Attributes::default(),
            skills: BTreeMap::new(),
            equipment: Equipment::default(),
            position: Position {
                zone: zone.to_string(),
                ..Position::default()
            },
        }
    }

    pub fn zone(&self) -> &str {
        &self.position.zone
    }
}

/// Checks that a character first name is 3 to 20 ASCII letters.
pub fn valid_character_name(name: &str) -> bool {
    (3..=20).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphabetic())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RaceTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub strength_mod: i32,
    #[serde(default)]
    pub constitution_mod: i32,
    #[serde(default)]
    pub intelligence_mod: i32,
    #[serde(default)]
    pub dexterity_mod: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProfessionTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hp_per_level: u32,
    #[serde(default)]
    pub mp_per_level: u32,
    /// Skills the profession starts with and their initial values.
    #[serde(default)]
    pub skills: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemTemplate {
    pub name: String,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub weight: f32,
    #[serde(default)]
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpellTemplate {
    pub name: String,
    pub school: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub mana_cost: u32,
    #[serde(default)]
    pub description: String,
}

/// Reference data loaded once at boot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Templates {
    pub races: Vec<RaceTemplate>,
    pub professions: Vec<ProfessionTemplate>,
    pub items: Vec<ItemTemplate>,
    pub spells: Vec<SpellTemplate>,
}

impl Templates {
    pub fn race(&self, name: &str) -> Option<&RaceTemplate> {
        self.races.iter().find(|race| race.name == name)
    }

    pub fn profession(&self, name: &str) -> Option<&ProfessionTemplate> {
        self.professions
            .iter()
            .find(|profession| profession.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Npc {
    pub id: u32,
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    pub race: String,
    pub profession: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub position: Position,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_creation() {
        let pc = PlayerCharacter::new("test", "Joe", "Human", "Warrior", "Tutorial");
        assert_eq!(pc.account, "test");
        assert_eq!(pc.firstname, "Joe");
        assert_eq!(pc.zone(), "Tutorial");
        assert_eq!(pc.level, 1);
        assert!(pc.alive);
        assert_eq!(pc.position.x, 0.0);
        assert!(pc.guild.is_none());
    }

    #[test]
    fn test_character_name_rules() {
        assert!(valid_character_name("Joe"));
        assert!(valid_character_name("Abcdefghijklmnopqrst"));
        assert!(!valid_character_name("Jo"));
        assert!(!valid_character_name("Abcdefghijklmnopqrstu"));
        assert!(!valid_character_name("Joe1"));
        assert!(!valid_character_name("Jo e"));
        assert!(!valid_character_name("Jöe"));
    }

    #[test]
    fn test_template_lookup() {
        let templates = Templates {
            races: vec![RaceTemplate {
                name: "Human".to_string(),
                description: String::new(),
                strength_mod: 0,
                constitution_mod: 0,
                intelligence_mod: 0,
                dexterity_mod: 0,
            }],
            professions: vec![],
            items: vec![],
            spells: vec![],
        };

        assert!(templates.race("Human").is_some());
        assert!(templates.race("Orc").is_none());
        assert!(templates.profession("Warrior").is_none());
    }
}
