use crate::item::Item;
use crate::reference::ReferenceIndex;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    // Trailing numeric run with optional sign and optional comparator suffix.
    static ref NUMERIC_SUFFIX: Regex = Regex::new(r"-?[0-9]+(\+|-)?$").unwrap();
}

/// Comparator selected by the clause's trailing `+`/`-` (or its absence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    AtLeast,
    AtMost,
    Exact,
}

impl Cmp {
    fn matches(self, observed: i64, target: i64) -> bool {
        match self {
            Cmp::AtLeast => observed >= target,
            Cmp::AtMost => observed <= target,
            Cmp::Exact => observed == target,
        }
    }
}

/// Scalar item attributes addressable by a numeric-comparison clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    Tokens,
    EnchantCount,
    Lives,
    MaxLives,
    Color,
    Nonce,
}

impl NumericField {
    fn read(self, item: &Item) -> i64 {
        match self {
            NumericField::Tokens => item.tokens,
            NumericField::EnchantCount => item.enchants.len() as i64,
            NumericField::Lives => item.lives,
            NumericField::MaxLives => item.max_lives,
            NumericField::Color => item.color(),
            NumericField::Nonce => item.nonce,
        }
    }
}

/// One clause kind, resolved at compile time. Class names are expanded into
/// their enchantment-key sets here so evaluation never consults the index.
#[derive(Debug, Clone)]
pub enum ClauseKind {
    Owner(String),
    Field {
        field: NumericField,
        cmp: Cmp,
        target: i64,
    },
    ClassEnchant {
        keys: HashSet<String>,
        cmp: Cmp,
        target: i64,
    },
    Enchant {
        key: String,
        cmp: Cmp,
        target: i64,
    },
    ItemType(i64),
    Flag(String),
}

#[derive(Debug, Clone)]
pub struct Clause {
    negated: bool,
    kind: ClauseKind,
}

impl Clause {
    pub fn kind(&self) -> &ClauseKind {
        &self.kind
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    fn matches(&self, item: &Item) -> bool {
        let raw = match &self.kind {
            ClauseKind::Owner(owner) => item.owner == *owner,
            ClauseKind::Field { field, cmp, target } => cmp.matches(field.read(item), *target),
            ClauseKind::ClassEnchant { keys, cmp, target } => item
                .enchants
                .iter()
                .any(|e| keys.contains(e.key.as_str()) && cmp.matches(e.level, *target)),
            ClauseKind::Enchant { key, cmp, target } => item
                .enchants
                .iter()
                .any(|e| e.key == *key && cmp.matches(e.level, *target)),
            ClauseKind::ItemType(id) => item.item.id == *id,
            ClauseKind::Flag(flag) => item.flags.iter().any(|f| f == flag),
        };
        self.negated ^ raw
    }
}

/// A compiled filter query: the AND of its clauses. An empty query compiles
/// to no clauses and accepts every item.
#[derive(Debug, Clone, Default)]
pub struct CompiledQuery {
    clauses: Vec<Clause>,
}

impl CompiledQuery {
    pub fn matches(&self, item: &Item) -> bool {
        self.clauses.iter().all(|clause| clause.matches(item))
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

/// Fixed mapping of item-type names to numeric type identifiers.
fn item_type_id(name: &str) -> Option<i64> {
    match name {
        "bow" => Some(261),
        "sword" => Some(283),
        "pants" => Some(300),
        _ => None,
    }
}

// Overflowing literals saturate instead of failing; compile stays total.
fn parse_target(digits: &str) -> i64 {
    digits.parse().unwrap_or(if digits.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Compile a query string into a predicate over items. Pure, total, and
/// infallible: every clause classifies into exactly one kind.
pub fn compile(query: &str, index: &ReferenceIndex) -> CompiledQuery {
    let query = query.to_lowercase();
    if query.is_empty() {
        return CompiledQuery::default();
    }
    let clauses = query
        .split(',')
        .map(|clause| compile_clause(clause, index))
        .collect();
    CompiledQuery { clauses }
}

fn compile_clause(raw: &str, index: &ReferenceIndex) -> Clause {
    let (negated, body) = match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    if let Some(owner) = body.strip_prefix("uuid") {
        return Clause {
            negated,
            kind: ClauseKind::Owner(owner.to_string()),
        };
    }

    if let Some(found) = NUMERIC_SUFFIX.find(body) {
        let key = &body[..found.start()];
        let (cmp, digits) = match body.as_bytes()[body.len() - 1] {
            b'+' => (Cmp::AtLeast, &body[found.start()..body.len() - 1]),
            b'-' => (Cmp::AtMost, &body[found.start()..body.len() - 1]),
            _ => (Cmp::Exact, &body[found.start()..]),
        };
        let target = parse_target(digits);
        let kind = match key {
            "tokens" => ClauseKind::Field {
                field: NumericField::Tokens,
                cmp,
                target,
            },
            "enchants" => ClauseKind::Field {
                field: NumericField::EnchantCount,
                cmp,
                target,
            },
            "lives" => ClauseKind::Field {
                field: NumericField::Lives,
                cmp,
                target,
            },
            "maxlives" => ClauseKind::Field {
                field: NumericField::MaxLives,
                cmp,
                target,
            },
            "color" => ClauseKind::Field {
                field: NumericField::Color,
                cmp,
                target,
            },
            "nonce" => ClauseKind::Field {
                field: NumericField::Nonce,
                cmp,
                target,
            },
            _ => match index.class_enchants(key) {
                Some(keys) => ClauseKind::ClassEnchant {
                    keys: keys.clone(),
                    cmp,
                    target,
                },
                None => ClauseKind::Enchant {
                    key: key.to_string(),
                    cmp,
                    target,
                },
            },
        };
        return Clause { negated, kind };
    }

    let kind = match item_type_id(body) {
        Some(id) => ClauseKind::ItemType(id),
        None => ClauseKind::Flag(body.to_string()),
    };
    Clause { negated, kind }
}
