//! askAppleAI bridge page
//!
//! The askAppleAI service is a local page that talks to the Gemini or OpenAI
//! HTTP API straight from the browser. This module writes that page into the
//! bridge directory whenever the API keys change.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::data::ApiKeys;

const PLACEHOLDER_HTML: &str = include_str!("../../assets/bridge/placeholder.html");
const CHAT_HTML: &str = include_str!("../../assets/bridge/chat.html");
const STYLES_CSS: &str = include_str!("../../assets/bridge/styles.css");
const CHAT_JS: &str = include_str!("../../assets/bridge/chat.js");
const GEMINI_JS: &str = include_str!("../../assets/bridge/gemini.js");
const OPENAI_JS: &str = include_str!("../../assets/bridge/openai.js");

const INDEX_FILE: &str = "index.html";
const STYLES_FILE: &str = "styles.css";
const SCRIPT_FILE: &str = "script.js";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bridge directory is not an absolute path: {0}")]
    InvalidPath(PathBuf),
}

/// Which API the generated page talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeProvider {
    Gemini,
    OpenAi,
}

impl BridgeProvider {
    /// Gemini wins when both keys are set
    pub fn select(keys: &ApiKeys) -> Option<(Self, &str)> {
        let gemini = keys.gemini.trim();
        let chatgpt = keys.chatgpt.trim();
        if !gemini.is_empty() {
            Some((BridgeProvider::Gemini, gemini))
        } else if !chatgpt.is_empty() {
            Some((BridgeProvider::OpenAi, chatgpt))
        } else {
            None
        }
    }

    fn id(self) -> &'static str {
        match self {
            BridgeProvider::Gemini => "gemini",
            BridgeProvider::OpenAi => "openai",
        }
    }

    fn label(self) -> &'static str {
        match self {
            BridgeProvider::Gemini => "Gemini",
            BridgeProvider::OpenAi => "ChatGPT",
        }
    }

    fn request_script(self) -> &'static str {
        match self {
            BridgeProvider::Gemini => GEMINI_JS,
            BridgeProvider::OpenAi => OPENAI_JS,
        }
    }
}

/// JSON string literal that is also safe inside an inline `<script>`
fn script_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace("</", "<\\/")
}

fn chat_page(provider: BridgeProvider, key: &str) -> String {
    CHAT_HTML
        .replace("__PROVIDER_LABEL__", provider.label())
        .replace("__PROVIDER__", &script_literal(provider.id()))
        .replace("__API_KEY__", &script_literal(key))
}

fn chat_script(provider: BridgeProvider) -> String {
    format!("{}\n{}", provider.request_script(), CHAT_JS)
}

pub struct BridgeGenerator {
    dir: PathBuf,
}

impl BridgeGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// File URL the askAppleAI service loads
    pub fn index_url(&self) -> Result<Url, BridgeError> {
        let path = self.index_path();
        Url::from_file_path(&path).map_err(|_| BridgeError::InvalidPath(path))
    }

    /// Write the page for the current keys. Returns the provider in use, or
    /// `None` when the placeholder page was written.
    pub fn generate(&self, keys: &ApiKeys) -> Result<Option<BridgeProvider>, BridgeError> {
        fs::create_dir_all(&self.dir).map_err(|source| BridgeError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let selected = BridgeProvider::select(keys);
        match selected {
            Some((provider, key)) => {
                self.write(INDEX_FILE, &chat_page(provider, key))?;
                self.write(STYLES_FILE, STYLES_CSS)?;
                self.write(SCRIPT_FILE, &chat_script(provider))?;
                tracing::info!("Generated askAppleAI page for {}", provider.label());
            }
            None => {
                self.write(INDEX_FILE, PLACEHOLDER_HTML)?;
                self.write(STYLES_FILE, STYLES_CSS)?;
                self.remove_stale_script();
                tracing::info!("Generated askAppleAI placeholder page (no API key)");
            }
        }
        Ok(selected.map(|(provider, _)| provider))
    }

    fn write(&self, name: &str, content: &str) -> Result<(), BridgeError> {
        let path = self.dir.join(name);
        fs::write(&path, content).map_err(|source| BridgeError::Io { path, source })
    }

    fn remove_stale_script(&self) {
        let path = self.dir.join(SCRIPT_FILE);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys(gemini: &str, chatgpt: &str) -> ApiKeys {
        ApiKeys {
            gemini: gemini.to_string(),
            chatgpt: chatgpt.to_string(),
        }
    }

    #[test]
    fn test_no_keys_writes_placeholder() {
        let dir = TempDir::new().unwrap();
        let generator = BridgeGenerator::new(dir.path().join("GeminiChat"));

        let provider = generator.generate(&ApiKeys::default()).unwrap();
        assert_eq!(provider, None);

        let index = fs::read_to_string(generator.index_path()).unwrap();
        assert_eq!(index, PLACEHOLDER_HTML);
        assert!(generator.dir().join(STYLES_FILE).exists());
        assert!(!generator.dir().join(SCRIPT_FILE).exists());
    }

    #[test]
    fn test_gemini_wins_over_chatgpt() {
        let dir = TempDir::new().unwrap();
        let generator = BridgeGenerator::new(dir.path());

        let provider = generator.generate(&keys("g-key", "sk-key")).unwrap();
        assert_eq!(provider, Some(BridgeProvider::Gemini));

        let index = fs::read_to_string(generator.index_path()).unwrap();
        assert!(index.contains(r#"const BRIDGE_API_KEY = "g-key";"#));
        assert!(!index.contains("sk-key"));
        let script = fs::read_to_string(dir.path().join(SCRIPT_FILE)).unwrap();
        assert!(script.contains("generativelanguage.googleapis.com"));
    }

    #[test]
    fn test_chatgpt_key_alone() {
        let dir = TempDir::new().unwrap();
        let generator = BridgeGenerator::new(dir.path());

        let provider = generator.generate(&keys("  ", "sk-key")).unwrap();
        assert_eq!(provider, Some(BridgeProvider::OpenAi));
        let index = fs::read_to_string(generator.index_path()).unwrap();
        assert!(index.contains("ChatGPT"));
        assert_ne!(index, PLACEHOLDER_HTML);
        let script = fs::read_to_string(dir.path().join(SCRIPT_FILE)).unwrap();
        assert!(script.contains("api.openai.com"));
    }

    #[test]
    fn test_keys_are_escaped() {
        let dir = TempDir::new().unwrap();
        let generator = BridgeGenerator::new(dir.path());
        generator
            .generate(&keys(r#"a"b</script><x>"#, ""))
            .unwrap();

        let index = fs::read_to_string(generator.index_path()).unwrap();
        assert!(index.contains(r#""a\"b<\/script><x>""#));
        assert_eq!(index.matches("</script>").count(), 2);
    }

    #[test]
    fn test_removing_keys_drops_script() {
        let dir = TempDir::new().unwrap();
        let generator = BridgeGenerator::new(dir.path());
        generator.generate(&keys("g-key", "")).unwrap();
        assert!(dir.path().join(SCRIPT_FILE).exists());

        generator.generate(&ApiKeys::default()).unwrap();
        assert!(!dir.path().join(SCRIPT_FILE).exists());
        let index = fs::read_to_string(generator.index_path()).unwrap();
        assert!(!index.contains("g-key"));
    }

    #[test]
    fn test_index_url_is_file_url() {
        let dir = TempDir::new().unwrap();
        let generator = BridgeGenerator::new(dir.path());
        let url = generator.index_url().unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/index.html"));

        assert!(BridgeGenerator::new("relative/dir").index_url().is_err());
    }
}
