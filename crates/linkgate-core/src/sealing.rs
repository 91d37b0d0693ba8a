//! ============================================================================
//! Link Sealing - Write-path encoding of link destinations
//! ============================================================================
//! A stored link's `url` is ciphertext exactly when the link is gated:
//! - gated + URL: encrypted (an existing record under this secret is kept)
//! - ungated + URL: plaintext (a previously sealed record is opened)
//! - blank URL: no URL
//! ============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amount::parse_amount;
use crate::cipher::UrlCipher;
use crate::types::{GateError, Link};

/// A link as submitted by the page owner, URL in plaintext
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDraft {
    pub id: String,
    pub preset_id: String,
    pub url: Option<String>,
    pub token_gated: bool,
    pub required_tokens: Vec<String>,
    pub position: u32,
}

/// Encode a draft for storage.
///
/// Thresholds are validated here so a bad amount is rejected when the owner
/// saves the link rather than when a visitor clicks it.
pub fn seal_link(draft: LinkDraft, cipher: &UrlCipher) -> Result<Link, GateError> {
    if draft.id.trim().is_empty() {
        return Err(GateError::Store("link id is empty".into()));
    }

    let required_tokens: Vec<String> = draft
        .required_tokens
        .iter()
        .map(|t| t.trim().to_string())
        .collect();
    for amount in required_tokens.iter().filter(|t| !t.is_empty()) {
        parse_amount(amount)?;
    }

    let url = match draft.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        None => None,
        Some(url) if draft.token_gated => {
            if cipher.is_encrypted(url) {
                Some(url.to_string())
            } else {
                Some(cipher.encrypt(url)?)
            }
        }
        Some(url) => {
            if cipher.is_encrypted(url) {
                debug!("Opening sealed URL of now-ungated link {}", draft.id);
                Some(cipher.decrypt(url)?)
            } else {
                Some(url.to_string())
            }
        }
    };

    Ok(Link {
        id: draft.id.trim().to_string(),
        preset_id: draft.preset_id,
        url,
        token_gated: draft.token_gated,
        required_tokens,
        position: draft.position,
    })
}

/// Undo sealing for editing: the link's URL in plaintext
pub fn unseal_url(link: &Link, cipher: &UrlCipher) -> Result<Option<String>, GateError> {
    match link.url.as_deref().filter(|u| !u.is_empty()) {
        None => Ok(None),
        Some(url) if cipher.is_encrypted(url) => cipher.decrypt(url).map(Some),
        Some(url) => Ok(Some(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::looks_encrypted;
    use crate::config::Secret;

    fn cipher() -> UrlCipher {
        UrlCipher::with_iterations(Secret::new("seal-secret"), 1_000).unwrap()
    }

    fn draft(url: Option<&str>, gated: bool) -> LinkDraft {
        LinkDraft {
            id: "l1".into(),
            preset_id: "website".into(),
            url: url.map(String::from),
            token_gated: gated,
            required_tokens: vec!["50".into()],
            position: 2,
        }
    }

    #[test]
    fn test_gated_url_is_encrypted() {
        let c = cipher();
        let link = seal_link(draft(Some("https://example.com/vip"), true), &c).unwrap();
        let stored = link.url.as_deref().unwrap();
        assert!(looks_encrypted(stored));
        assert_eq!(c.decrypt(stored).unwrap(), "https://example.com/vip");
        assert_eq!(link.position, 2);
    }

    #[test]
    fn test_sealing_twice_keeps_record() {
        let c = cipher();
        let first = seal_link(draft(Some("https://example.com/vip"), true), &c).unwrap();
        let again = seal_link(
            LinkDraft {
                url: first.url.clone(),
                ..draft(None, true)
            },
            &c,
        )
        .unwrap();
        assert_eq!(again.url, first.url);
    }

    #[test]
    fn test_ungating_opens_record() {
        let c = cipher();
        let sealed = seal_link(draft(Some("https://example.com/vip"), true), &c).unwrap();
        let opened = seal_link(
            LinkDraft {
                url: sealed.url.clone(),
                ..draft(None, false)
            },
            &c,
        )
        .unwrap();
        assert_eq!(opened.url.as_deref(), Some("https://example.com/vip"));
        assert_eq!(unseal_url(&sealed, &c).unwrap(), opened.url);
    }

    #[test]
    fn test_ungated_url_stays_plain() {
        let link = seal_link(draft(Some(" https://example.com:8080/x "), false), &cipher()).unwrap();
        assert_eq!(link.url.as_deref(), Some("https://example.com:8080/x"));
    }

    #[test]
    fn test_blank_url_is_none() {
        let link = seal_link(draft(Some("   "), true), &cipher()).unwrap();
        assert_eq!(link.url, None);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut bad = draft(Some("https://example.com"), true);
        bad.required_tokens = vec!["fifty".into()];
        assert!(matches!(
            seal_link(bad, &cipher()),
            Err(GateError::InvalidAmount(_))
        ));
    }
}
