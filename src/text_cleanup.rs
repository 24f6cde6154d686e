// Text cleanup module
// Strips configured regex patterns from metadata text before it is formatted

use crate::config::CleanupConfig;
use crate::metadata::Metadata;
use regex::Regex;

pub struct TextCleaner {
    patterns: Vec<Regex>,
}

impl TextCleaner {
    /// Create a new text cleaner from config
    pub fn new(config: &CleanupConfig) -> Self {
        let patterns = if config.enabled {
            config
                .patterns
                .iter()
                .filter_map(|pattern| match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        log::warn!("Invalid cleanup pattern '{}': {}", pattern, e);
                        None
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        Self { patterns }
    }

    /// Clean a text string by removing every pattern match
    pub fn clean(&self, text: &str) -> String {
        if self.patterns.is_empty() {
            return text.to_string();
        }

        let mut result = text.to_string();
        for pattern in &self.patterns {
            result = pattern.replace_all(&result, "").into_owned();
        }

        result.trim().to_string()
    }

    /// Clean every text value (and list item) of the metadata
    pub fn clean_metadata(&self, metadata: &Metadata) -> Metadata {
        if self.patterns.is_empty() {
            return metadata.clone();
        }
        metadata.map_text(|text| self.clean(text))
    }
}
