use crate::config::{FilterEntry, Settings};
use crate::item::Item;
use crate::query::{self, CompiledQuery};
use crate::reference::ReferenceIndex;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PAGE_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("filter '{0}' already exists")]
    DuplicateFilter(String),
    #[error("no filter named '{0}'")]
    FilterNotFound(String),
}

/// A named filter at runtime: the persisted entry plus its compiled predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    pub alert: Option<String>,
    pub query: CompiledQuery,
}

impl Filter {
    fn from_entry(entry: &FilterEntry, index: &ReferenceIndex) -> Self {
        Filter {
            name: entry.name.clone(),
            alert: entry.alert.clone(),
            query: query::compile(&entry.name, index),
        }
    }

    fn entry(&self) -> FilterEntry {
        FilterEntry {
            name: self.name.clone(),
            alert: self.alert.clone(),
        }
    }
}

/// Owns the ordered filter list and the settings it persists with. Every
/// mutating operation writes the full settings file before returning.
pub struct FilterRegistry {
    settings: Settings,
    store_path: PathBuf,
    filters: Vec<Filter>,
}

impl FilterRegistry {
    pub fn new(settings: Settings, store_path: &Path, index: &ReferenceIndex) -> Self {
        let filters = settings
            .filters
            .iter()
            .map(|entry| Filter::from_entry(entry, index))
            .collect();
        FilterRegistry {
            settings,
            store_path: store_path.to_path_buf(),
            filters,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Compile and append a new filter. The query text is its name; names are
    /// unique within the registry.
    pub fn add(&mut self, name: &str, index: &ReferenceIndex) -> anyhow::Result<()> {
        if self.filters.iter().any(|f| f.name == name) {
            return Err(RegistryError::DuplicateFilter(name.to_string()).into());
        }
        let entry = FilterEntry {
            name: name.to_string(),
            alert: None,
        };
        self.filters.push(Filter::from_entry(&entry, index));
        self.settings.filters.push(entry);
        self.persist()
    }

    /// Remove every filter with this exact name. Idempotent: removing an
    /// absent name is not an error.
    pub fn remove(&mut self, name: &str) -> anyhow::Result<usize> {
        let before = self.filters.len();
        self.filters.retain(|f| f.name != name);
        self.settings.filters.retain(|f| f.name != name);
        self.persist()?;
        Ok(before - self.filters.len())
    }

    pub fn set_alert(&mut self, name: &str, alert: Option<String>) -> anyhow::Result<()> {
        let filter = self
            .filters
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| RegistryError::FilterNotFound(name.to_string()))?;
        filter.alert = alert.clone();
        if let Some(entry) = self.settings.filters.iter_mut().find(|f| f.name == name) {
            entry.alert = alert;
        }
        self.persist()
    }

    pub fn set_enabled(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.settings.enabled = enabled;
        self.persist()
    }

    pub fn set_global_alert(&mut self, alert: String) -> anyhow::Result<()> {
        self.settings.alert = alert;
        self.persist()
    }

    pub fn set_webhook_url(&mut self, url: String) -> anyhow::Result<()> {
        self.settings.webhook_url = Some(url);
        self.persist()
    }

    /// Filters whose predicate accepts this item, in registry order.
    pub fn matching(&self, item: &Item) -> Vec<&Filter> {
        self.filters
            .iter()
            .filter(|f| f.query.matches(item))
            .collect()
    }

    /// 1-indexed page of up to `PAGE_SIZE` filters plus the total page count.
    pub fn page(&self, page: usize) -> (&[Filter], usize) {
        let pages = self.filters.len().div_ceil(PAGE_SIZE);
        let start = page.saturating_sub(1) * PAGE_SIZE;
        let end = (start + PAGE_SIZE).min(self.filters.len());
        let slice = if start >= self.filters.len() {
            &[]
        } else {
            &self.filters[start..end]
        };
        (slice, pages)
    }

    /// Operator-facing listing, ten filters per page.
    pub fn format_page(&self, page: usize) -> String {
        let (slice, pages) = self.page(page);
        let mut out = format!("Queries (page {}/{})", page, pages);
        for filter in slice {
            out.push_str(&format!(
                "\n - `{}` ({})",
                filter.name,
                match &filter.alert {
                    Some(alert) => format!("`{alert}`"),
                    None => "no alert".to_string(),
                }
            ));
        }
        out
    }

    fn persist(&self) -> anyhow::Result<()> {
        self.settings.save(&self.store_path)
    }
}
