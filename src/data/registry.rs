//! AI Service Registry
//!
//! Static, ordered list of the chat services the shell can host. Descriptors
//! never change after construction; per-service visibility lives in the
//! preference store.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::data::PreferenceStore;

/// Name of the locally generated Gemini/ChatGPT bridge service
pub const BRIDGE_SERVICE_NAME: &str = "askAppleAI";

/// Stable identity of a service (lowercase slug)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// sRGB brand color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrandColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BrandColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// One hosted AI chat service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub name: String,
    pub url: Url,
    pub icon: String,
    pub color: BrandColor,
    pub default_visible: bool,
    /// Locally generated page rather than a third-party site
    pub is_custom: bool,
}

impl ServiceDescriptor {
    fn builtin(
        id: &str,
        name: &str,
        url: &str,
        icon: &str,
        color: BrandColor,
        default_visible: bool,
    ) -> Option<Self> {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Invalid built-in URL for {}: {}", name, e);
                return None;
            }
        };
        Some(Self {
            id: ServiceId::new(id),
            name: name.to_string(),
            url,
            icon: icon.to_string(),
            color,
            default_visible,
            is_custom: false,
        })
    }

    /// Host name of the service endpoint, if it has one
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

/// Immutable ordered list of service descriptors
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Build the registry from an explicit descriptor list
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self { services }
    }

    /// Built-in services; `bridge_url` is where the generated bridge page lives
    pub fn builtin(bridge_url: Url) -> Self {
        let mut services: Vec<ServiceDescriptor> = [
            ("chatgpt", "ChatGPT", "https://chat.openai.com", "AILogos/chatgpt", BrandColor::rgb(16, 163, 127), true),
            ("claude", "Claude", "https://claude.ai", "AILogos/claude", BrandColor::rgb(175, 82, 222), true),
            ("copilot", "Copilot", "https://copilot.microsoft.com", "AILogos/copilot", BrandColor::rgb(0, 122, 255), true),
            ("perplexity", "Perplexity", "https://www.perplexity.ai", "AILogos/perplexity", BrandColor::rgb(255, 149, 0), true),
            ("deepseek", "DeepSeek", "https://chat.deepseek.com", "AILogos/deepseek", BrandColor::rgb(255, 59, 48), true),
            ("grok", "Grok", "https://grok.com/?referrer=website", "AILogos/grok", BrandColor::rgb(0, 153, 230), true),
            ("mistral", "Mistral", "https://chat.mistral.ai", "AILogos/mistral", BrandColor::rgb(51, 102, 204), false),
            ("gemini", "Gemini", "https://gemini.google.com", "AILogos/gemini", BrandColor::rgb(0, 179, 179), false),
            ("pi", "Pi", "https://pi.ai", "AILogos/pi", BrandColor::rgb(204, 102, 51), false),
            ("blackbox", "Blackbox", "https://www.blackbox.ai", "AILogos/blackbox", BrandColor::rgb(38, 38, 38), true),
            ("meta", "Meta", "https://www.meta.ai", "AILogos/meta", BrandColor::rgb(0, 140, 242), true),
            ("zhipu", "Zhipu AI", "https://chat.z.ai", "AILogos/zhipu", BrandColor::rgb(64, 115, 255), true),
            ("mcpchat", "MCP Chat", "https://mcpchat.scira.ai", "AILogos/mcpchat", BrandColor::rgb(102, 77, 242), true),
        ]
        .into_iter()
        .filter_map(|(id, name, url, icon, color, visible)| {
            ServiceDescriptor::builtin(id, name, url, icon, color, visible)
        })
        .collect();

        services.push(ServiceDescriptor {
            id: ServiceId::new("askappleai"),
            name: BRIDGE_SERVICE_NAME.to_string(),
            url: bridge_url,
            icon: "AILogos/appleai".to_string(),
            color: BrandColor::rgb(77, 77, 77),
            default_visible: true,
            is_custom: true,
        });

        Self { services }
    }

    pub fn all(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn get(&self, id: &ServiceId) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| &s.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Services the user has not hidden, in registry order
    pub fn visible<'a>(&'a self, prefs: &'a PreferenceStore) -> impl Iterator<Item = &'a ServiceDescriptor> + 'a {
        self.services
            .iter()
            .filter(move |s| prefs.is_service_visible(&s.name))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::builtin(Url::parse("file:///tmp/bridge/index.html").unwrap())
    }

    #[test]
    fn builtin_ids_are_unique() {
        let registry = registry();
        let mut ids: Vec<_> = registry.all().iter().map(|s| s.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), registry.len());
    }

    #[test]
    fn bridge_service_is_last_and_custom() {
        let registry = registry();
        let last = registry.all().last().unwrap();
        assert_eq!(last.name, BRIDGE_SERVICE_NAME);
        assert!(last.is_custom);
        assert_eq!(last.url.scheme(), "file");
    }

    #[test]
    fn lookup_by_name_and_id() {
        let registry = registry();
        let copilot = registry.by_name("Copilot").unwrap();
        assert_eq!(copilot.host(), Some("copilot.microsoft.com"));
        assert_eq!(registry.get(&ServiceId::new("copilot")), Some(copilot));
        assert!(registry.by_name("Nope").is_none());
    }

    #[test]
    fn hidden_by_default() {
        let registry = registry();
        for name in ["Mistral", "Gemini", "Pi"] {
            assert!(!registry.by_name(name).unwrap().default_visible, "{name}");
        }
        assert!(registry.by_name("ChatGPT").unwrap().default_visible);
    }

    #[test]
    fn brand_color_hex() {
        assert_eq!(BrandColor::rgb(0, 122, 255).hex(), "#007aff");
    }
}
