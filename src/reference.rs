use anyhow::Context;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// The remote reference document, reduced to the parts we consume.
#[derive(Debug, Deserialize)]
struct ReferenceDoc {
    #[serde(rename = "Pit")]
    pit: PitSection,
}

#[derive(Debug, Deserialize)]
struct PitSection {
    #[serde(rename = "Mystics")]
    mystics: HashMap<String, MysticEntry>,
}

#[derive(Debug, Deserialize)]
struct MysticEntry {
    #[serde(rename = "Classes", default)]
    classes: Vec<String>,
}

/// Lookup table built once at startup: class name -> enchantment keys in that
/// class, plus the inverse direction. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    classes: HashMap<String, HashSet<String>>,
    enchant_classes: HashMap<String, Vec<String>>,
}

impl ReferenceIndex {
    /// An index with no classes at all. Class-name clauses compiled against it
    /// fall through to the literal-enchantment branch.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from enchantment key -> class names, the orientation the
    /// reference document uses. Class names are lower-cased so they line up
    /// with the lower-cased query text.
    pub fn from_enchant_classes(map: HashMap<String, Vec<String>>) -> Self {
        let mut classes: HashMap<String, HashSet<String>> = HashMap::new();
        let mut enchant_classes: HashMap<String, Vec<String>> = HashMap::new();
        for (key, class_names) in map {
            for class in class_names {
                let class = class.to_lowercase();
                classes
                    .entry(class.clone())
                    .or_default()
                    .insert(key.clone());
                enchant_classes.entry(key.clone()).or_default().push(class);
            }
        }
        ReferenceIndex {
            classes,
            enchant_classes,
        }
    }

    /// Fetch and build the index. Any failure here is fatal to startup; there
    /// is no degraded mode without the reference data.
    pub async fn fetch(client: &reqwest::Client, url: &str) -> anyhow::Result<Self> {
        let text = client
            .get(url)
            .send()
            .await
            .context("reference data request failed")?
            .error_for_status()
            .context("reference data request rejected")?
            .text()
            .await
            .context("reference data body unreadable")?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> anyhow::Result<Self> {
        let doc: ReferenceDoc =
            serde_json::from_str(text).context("malformed reference document")?;
        let map = doc
            .pit
            .mystics
            .into_iter()
            .map(|(key, entry)| (key, entry.classes))
            .collect();
        Ok(Self::from_enchant_classes(map))
    }

    pub fn is_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Enchantment keys belonging to a class, if the class exists.
    pub fn class_enchants(&self, name: &str) -> Option<&HashSet<String>> {
        self.classes.get(name)
    }

    /// Classes an enchantment key belongs to (empty for unknown keys).
    pub fn classes_of(&self, key: &str) -> &[String] {
        self.enchant_classes
            .get(key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> ReferenceIndex {
        let mut map = HashMap::new();
        map.insert("billionaire".to_string(), vec!["Damage".to_string()]);
        map.insert(
            "lifesteal".to_string(),
            vec!["Damage".to_string(), "Defense".to_string()],
        );
        ReferenceIndex::from_enchant_classes(map)
    }

    #[test]
    fn builds_both_directions() {
        let index = sample_index();
        let damage = index.class_enchants("damage").unwrap();
        assert!(damage.contains("billionaire"));
        assert!(damage.contains("lifesteal"));
        assert_eq!(index.class_enchants("defense").unwrap().len(), 1);
        assert!(index.classes_of("lifesteal").contains(&"damage".to_string()));
        assert!(index.classes_of("unknown").is_empty());
    }

    #[test]
    fn class_names_are_lowercased() {
        let index = sample_index();
        assert!(index.is_class("damage"));
        assert!(!index.is_class("Damage"));
    }

    #[test]
    fn parses_reference_document() {
        let doc = r#"{
            "Pit": {
                "Mystics": {
                    "billionaire": {"Classes": ["Damage"], "Name": "Billionaire"},
                    "peroxide": {"Classes": ["Defense"]}
                }
            }
        }"#;
        let index = ReferenceIndex::parse(doc).unwrap();
        assert_eq!(index.class_count(), 2);
        assert!(index.class_enchants("damage").unwrap().contains("billionaire"));
    }

    #[test]
    fn rejects_malformed_document() {
        assert!(ReferenceIndex::parse("{\"Pit\": {}}").is_err());
        assert!(ReferenceIndex::parse("not json").is_err());
    }
}
