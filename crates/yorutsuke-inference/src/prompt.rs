//! Extraction prompt shared by the LLM backends.
//!
//! The prompt embeds a category reference list. The list is read lazily, on
//! first use, from an optional JSON file and cached in a [`PromptCache`]
//! owned by each backend instance. [`PromptCache::reset`] drops the cached
//! prompt so the next call reloads it.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use strum::IntoEnumIterator;
use tokio::sync::RwLock;
use yorutsuke_core::types::Category;

use crate::TRACING_TARGET_CLIENT;

/// One entry of the category reference list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryReference {
    /// Category identifier the model must answer with.
    pub id: String,
    /// Short guidance for the model.
    pub description: Option<String>,
}

/// Accepted shapes of a reference file entry.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceEntry {
    Id(String),
    Detailed {
        id: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl From<ReferenceEntry> for CategoryReference {
    fn from(entry: ReferenceEntry) -> Self {
        match entry {
            ReferenceEntry::Id(id) => Self {
                id,
                description: None,
            },
            ReferenceEntry::Detailed { id, description } => Self { id, description },
        }
    }
}

/// Returns the built-in taxonomy as a reference list.
pub fn builtin_references() -> Vec<CategoryReference> {
    Category::iter()
        .map(|category| CategoryReference {
            id: category.as_str().to_owned(),
            description: Some(builtin_description(category).to_owned()),
        })
        .collect()
}

fn builtin_description(category: Category) -> &'static str {
    match category {
        Category::Food => "groceries, restaurants, cafes, convenience store meals",
        Category::Transport => "trains, buses, taxis, fuel, parking, tolls",
        Category::Supplies => "office supplies, stationery, consumables, small equipment",
        Category::Utilities => "electricity, gas, water",
        Category::Communication => "phone, internet, postage, courier",
        Category::Entertainment => "client entertainment, gifts, events",
        Category::Travel => "hotels, flights, long-distance travel",
        Category::Fees => "bank charges, commissions, subscriptions, licences",
        Category::Sales => "money received from customers (income)",
        Category::Other => "anything that fits no other category",
    }
}

/// Renders the extraction prompt for a reference list.
pub fn render_prompt(references: &[CategoryReference]) -> String {
    let mut categories = String::new();
    for reference in references {
        categories.push_str("- ");
        categories.push_str(&reference.id);
        if let Some(description) = &reference.description {
            categories.push_str(": ");
            categories.push_str(description);
        }
        categories.push('\n');
    }

    format!(
        "You read photographed receipts and answer with a single JSON object and nothing else.\n\
         \n\
         Keys:\n\
         - vendor: merchant name as printed\n\
         - total: final amount paid, as a number\n\
         - tax: tax amount, as a number, or null\n\
         - subtotal: amount before tax, as a number, or null\n\
         - currency: ISO 4217 code, or null\n\
         - date: transaction date as YYYY-MM-DD\n\
         - type: \"expense\" or \"income\"\n\
         - category: one of the category ids below\n\
         - description: short description of the purchase\n\
         - confidence: your confidence in the extraction, between 0 and 1\n\
         - line_items: array of {{description, quantity, unit_price, amount}}\n\
         \n\
         Categories:\n\
         {categories}\n\
         Use null for anything you cannot read. Do not guess amounts."
    )
}

/// Removes a surrounding Markdown code fence, if any.
///
/// Models regularly answer with ```` ```json ... ``` ```` even when asked
/// for bare JSON.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };

    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Lazily built prompt, cached per backend instance.
#[derive(Debug, Default)]
pub struct PromptCache {
    path: Option<PathBuf>,
    prompt: RwLock<Option<Arc<str>>>,
}

impl PromptCache {
    /// Creates a cache that reads its reference list from `path`, when set.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            prompt: RwLock::new(None),
        }
    }

    /// Returns the prompt, loading the reference list on first use.
    ///
    /// A missing or unreadable reference file falls back to the built-in
    /// taxonomy.
    pub async fn get(&self) -> Arc<str> {
        if let Some(prompt) = self.prompt.read().await.as_ref() {
            return Arc::clone(prompt);
        }

        let mut slot = self.prompt.write().await;
        if let Some(prompt) = slot.as_ref() {
            return Arc::clone(prompt);
        }

        let prompt: Arc<str> = render_prompt(&self.load_references().await).into();
        *slot = Some(Arc::clone(&prompt));
        prompt
    }

    /// Drops the cached prompt.
    pub async fn reset(&self) {
        *self.prompt.write().await = None;
    }

    /// Returns whether the prompt has been loaded.
    pub async fn is_loaded(&self) -> bool {
        self.prompt.read().await.is_some()
    }

    async fn load_references(&self) -> Vec<CategoryReference> {
        let Some(path) = &self.path else {
            return builtin_references();
        };

        let loaded = async {
            let content = tokio::fs::read_to_string(path).await?;
            let entries: Vec<ReferenceEntry> = serde_json::from_str(&content)?;
            Ok::<_, crate::Error>(entries.into_iter().map(CategoryReference::from).collect::<Vec<_>>())
        };

        match loaded.await {
            Ok(references) if !references.is_empty() => {
                tracing::debug!(
                    target: TRACING_TARGET_CLIENT,
                    path = %path.display(),
                    categories = references.len(),
                    "loaded category reference list"
                );
                references
            }
            Ok(_) => {
                tracing::warn!(
                    target: TRACING_TARGET_CLIENT,
                    path = %path.display(),
                    "category reference list is empty, using built-in taxonomy"
                );
                builtin_references()
            }
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_CLIENT,
                    path = %path.display(),
                    error = %err,
                    "failed to load category reference list, using built-in taxonomy"
                );
                builtin_references()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn builtin_prompt_lists_every_category() {
        let prompt = render_prompt(&builtin_references());
        for category in Category::iter() {
            assert!(prompt.contains(&format!("- {}", category.as_str())));
        }
    }

    #[tokio::test]
    async fn cache_loads_once_until_reset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["food", {{"id": "travel", "description": "trips"}}]"#).unwrap();

        let cache = PromptCache::new(Some(file.path().to_path_buf()));
        assert!(!cache.is_loaded().await);

        let first = cache.get().await;
        assert!(first.contains("- travel: trips"));
        assert!(!first.contains("- sales"));

        std::fs::write(file.path(), r#"["sales"]"#).unwrap();
        assert!(Arc::ptr_eq(&first, &cache.get().await));

        cache.reset().await;
        assert!(!cache.is_loaded().await);
        let reloaded = cache.get().await;
        assert!(reloaded.contains("- sales"));
        assert!(!reloaded.contains("- travel"));
    }

    #[tokio::test]
    async fn unreadable_file_falls_back_to_builtin() {
        let cache = PromptCache::new(Some(PathBuf::from("/nonexistent/categories.json")));
        assert!(cache.get().await.contains("- communication"));
    }
}
