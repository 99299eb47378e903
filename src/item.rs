use serde::{Deserialize, Serialize};

/// One enchantment on an item: a key into the reference index plus a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enchant {
    pub key: String,
    pub level: i64,
}

/// The nested item-type descriptor as it appears on the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemKind {
    pub id: i64,
    pub name: String,
}

/// A game-item record as it arrives on the feed. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub enchants: Vec<Enchant>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub item: ItemKind,
    #[serde(default)]
    pub lives: i64,
    #[serde(rename = "maxLives", default)]
    pub max_lives: i64,
    #[serde(default)]
    pub tokens: i64,
    #[serde(default)]
    pub nonce: i64,
    pub owner: String,
    #[serde(default)]
    pub lastseen: String,
}

impl Item {
    /// Derived color class: the nonce reduced modulo 5.
    pub fn color(&self) -> i64 {
        self.nonce.rem_euclid(5)
    }
}

/// A decoded feed frame: tags describing what happened plus the item snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub tags: Vec<String>,
    pub item: Item,
}
