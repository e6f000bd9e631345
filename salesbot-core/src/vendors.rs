use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;
use url::Url;

/// A merchant the bot knows about. Every matchable field is lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRecord {
    /// Original casing, only used when rendering replies.
    pub display_name: String,
    pub match_name: String,
    pub account_handle: Option<String>,
    pub store_domain: Option<String>,
    pub nicknames: Vec<String>,
}

/// Vendor entry as written in the registry file.
#[derive(Debug, Deserialize)]
struct RawVendor {
    name: Option<String>,
    reddit_username: Option<String>,
    store_url: Option<String>,
    #[serde(default)]
    nicknames: Vec<String>,
}

impl RawVendor {
    fn normalize(self, index: usize) -> Result<VendorRecord, ConfigError> {
        let display_name = self
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                field: format!("vendors[{index}].name"),
            })?;

        Ok(VendorRecord {
            match_name: display_name.to_lowercase(),
            display_name,
            account_handle: non_blank(self.reddit_username).map(|handle| handle.to_lowercase()),
            store_domain: non_blank(self.store_url)
                .map(|store| store_domain(&store, index))
                .transpose()?,
            nicknames: self
                .nicknames
                .into_iter()
                .filter_map(|nickname| non_blank(Some(nickname)))
                .map(|nickname| nickname.to_lowercase())
                .collect(),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Lowercases a store URL and reduces absolute URLs to their host.
///
/// The result must look like a domain: a bare scheme such as `https://` would
/// otherwise match every link.
fn store_domain(store: &str, index: usize) -> Result<String, ConfigError> {
    let lowered = store.to_lowercase();
    let domain = match Url::parse(&lowered) {
        Ok(url) if url.has_host() => {
            let host = url.host_str().unwrap_or_default();
            host.strip_prefix("www.").unwrap_or(host).to_string()
        }
        _ => lowered.trim_end_matches('/').to_string(),
    };

    let host = domain.split('/').next().unwrap_or_default();
    let labels: Vec<&str> = host.split('.').collect();
    if host.contains(':') || labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(ConfigError::InvalidValue {
            field: format!("vendors[{index}].store_url"),
            value: store.to_string(),
        });
    }
    Ok(domain)
}

/// Immutable, normalized set of vendors, in file order.
#[derive(Debug, Clone, Default)]
pub struct VendorRegistry {
    vendors: Vec<VendorRecord>,
}

impl VendorRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let registry = Self::from_json_str(&contents)?;
        debug!("Loaded {} vendors from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: Vec<RawVendor> =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidFormat {
                details: e.to_string(),
            })?;

        let vendors = raw
            .into_iter()
            .enumerate()
            .map(|(index, vendor)| vendor.normalize(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { vendors })
    }

    pub fn iter(&self) -> impl Iterator<Item = &VendorRecord> {
        self.vendors.iter()
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}
