//! ============================================================================
//! Link Session - One visitor's progress through a gated link
//! ============================================================================
//! Unauthenticated -> (sign in) -> Checking -> Granted | Denied | CheckFailed
//!
//! Granted may be re-checked and stays Granted while the balance holds.
//! Denied and CheckFailed go back to Checking on "check again". The page
//! and link are loaded once when the session opens and reused by every
//! re-check.
//! ============================================================================

use serde::{Deserialize, Serialize};

use super::Resolution;
use crate::types::{GateError, Link, Page, WalletAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Unauthenticated,
    Checking,
    Granted,
    Denied,
    CheckFailed,
}

#[derive(Debug, Clone)]
pub struct LinkSession {
    page: Page,
    link: Link,
    visitor: Option<WalletAddress>,
    state: GateState,
    last: Option<Resolution>,
}

impl LinkSession {
    pub(crate) fn new(page: Page, link: Link, visitor: Option<WalletAddress>) -> Self {
        let state = if visitor.is_some() {
            GateState::Checking
        } else {
            GateState::Unauthenticated
        };
        Self {
            page,
            link,
            visitor,
            state,
            last: None,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn visitor(&self) -> Option<&WalletAddress> {
        self.visitor.as_ref()
    }

    /// The visitor's wallet, required before a balance check
    pub fn wallet(&self) -> Result<&WalletAddress, GateError> {
        self.visitor.as_ref().ok_or(GateError::Unauthenticated)
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Most recent resolution, if the session has been advanced
    pub fn last_resolution(&self) -> Option<&Resolution> {
        self.last.as_ref()
    }

    /// Attach the wallet verified by the login provider.
    ///
    /// Signing in again with another wallet restarts the check for that
    /// wallet.
    pub fn sign_in(&mut self, wallet: WalletAddress) {
        if self.visitor.as_ref() != Some(&wallet) {
            self.last = None;
        }
        self.visitor = Some(wallet);
        self.state = GateState::Checking;
    }

    pub fn sign_out(&mut self) {
        self.visitor = None;
        self.last = None;
        self.state = GateState::Unauthenticated;
    }

    /// Enter Checking for an explicit re-check; anonymous sessions stay put
    pub(crate) fn begin_check(&mut self) {
        if self.visitor.is_some() {
            self.state = GateState::Checking;
        }
    }

    pub(crate) fn finish(&mut self, resolution: Resolution) -> Resolution {
        self.state = resolution.state();
        self.last = Some(resolution.clone());
        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(visitor: Option<WalletAddress>) -> LinkSession {
        let page = Page {
            slug: "p".into(),
            owner_wallet: "11111111111111111111111111111111".into(),
            connected_token: Some("TOKEN123".into()),
            created_at: 0,
            updated_at: 0,
        };
        let link = Link {
            id: "l".into(),
            preset_id: "website".into(),
            url: None,
            token_gated: true,
            required_tokens: vec!["50".into()],
            position: 0,
        };
        LinkSession::new(page, link, visitor)
    }

    fn wallet(s: &str) -> WalletAddress {
        WalletAddress::parse(s).unwrap()
    }

    #[test]
    fn test_initial_state_follows_visitor() {
        assert_eq!(session(None).state(), GateState::Unauthenticated);
        let signed = session(Some(wallet("8i51XNNpGaKaj4G4nDdmQh95v4FKAxw8mhtaRoKd9tE8")));
        assert_eq!(signed.state(), GateState::Checking);
    }

    #[test]
    fn test_sign_in_and_out() {
        let mut s = session(None);
        s.begin_check();
        assert_eq!(s.state(), GateState::Unauthenticated);
        assert!(matches!(s.wallet(), Err(GateError::Unauthenticated)));

        s.sign_in(wallet("8i51XNNpGaKaj4G4nDdmQh95v4FKAxw8mhtaRoKd9tE8"));
        assert_eq!(s.state(), GateState::Checking);
        assert_eq!(
            s.wallet().unwrap().as_str(),
            "8i51XNNpGaKaj4G4nDdmQh95v4FKAxw8mhtaRoKd9tE8"
        );

        s.finish(Resolution::Denied {
            balance: "10".into(),
            required: "50".into(),
            token: "TOKEN123".into(),
            acquire_url: "https://jup.ag/swap/SOL-TOKEN123".into(),
        });
        assert_eq!(s.state(), GateState::Denied);
        assert!(s.last_resolution().is_some());

        s.sign_out();
        assert_eq!(s.state(), GateState::Unauthenticated);
        assert!(s.last_resolution().is_none());
    }
}
