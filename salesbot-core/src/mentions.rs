use crate::vendors::{VendorRecord, VendorRegistry};

/// Vendors mentioned in one piece of text, in registry order.
pub type MentionResult<'a> = Vec<&'a VendorRecord>;

/// Finds every vendor whose name, handle, store domain or nickname occurs in `text`.
///
/// Matching is plain case-insensitive substring search. Punctuation is significant:
/// "yunnan-sourcing" does not mention "Yunnan Sourcing".
pub fn find_mentions<'a>(text: &str, registry: &'a VendorRegistry) -> MentionResult<'a> {
    let text = text.to_lowercase();
    registry
        .iter()
        .filter(|vendor| is_mentioned(&text, vendor))
        .collect()
}

// `text` must already be lowercase.
fn is_mentioned(text: &str, vendor: &VendorRecord) -> bool {
    text.contains(vendor.match_name.as_str())
        || vendor
            .account_handle
            .as_deref()
            .is_some_and(|handle| text.contains(handle))
        || vendor
            .store_domain
            .as_deref()
            .is_some_and(|domain| text.contains(domain))
        || vendor
            .nicknames
            .iter()
            .any(|nickname| text.contains(nickname.as_str()))
}

pub fn display_names(mentions: &[&VendorRecord]) -> Vec<String> {
    mentions.iter().map(|v| v.display_name.clone()).collect()
}
