use crate::catalog::Quality;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a catalog or token operation was refused. All variants are recovered
/// at the handler boundary into a user-visible message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("movie or token not found")]
    NotFound,
    #[error("requesting user does not match the token")]
    Unauthorized,
    #[error("token already redeemed")]
    AlreadyUsed,
    #[error("no file recorded for this part/quality")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenState {
    Issued,
    Redeemed,
    Expired,
}

/// What a redeemed token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub movie_code: String,
    pub part: u32,
    pub quality: Quality,
}

/// One single-use access token: ISSUED -> REDEEMED, or ISSUED -> EXPIRED.
/// Both end states are terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user_id: u64,
    pub movie_code: String,
    pub part: u32,
    pub quality: Quality,
    pub state: TokenState,
    /// Unix seconds at issue time.
    pub issued_at: u64,
}

impl TokenRecord {
    pub fn issue(user_id: u64, movie_code: String, part: u32, quality: Quality, now: u64) -> Self {
        Self {
            user_id,
            movie_code,
            part,
            quality,
            state: TokenState::Issued,
            issued_at: now,
        }
    }

    /// Check-and-invalidate. Must be called under the store's write lock so
    /// two concurrent redemptions cannot both pass the `Issued` check.
    ///
    /// A user mismatch leaves the token `Issued`; the right user can still
    /// redeem it later.
    pub fn redeem(
        &mut self,
        requesting_user: u64,
        now: u64,
        ttl: Option<Duration>,
    ) -> Result<TokenBinding, GateError> {
        match self.state {
            TokenState::Redeemed => return Err(GateError::AlreadyUsed),
            TokenState::Expired => return Err(GateError::NotFound),
            TokenState::Issued => {}
        }
        if let Some(ttl) = ttl {
            if now.saturating_sub(self.issued_at) > ttl.as_secs() {
                self.state = TokenState::Expired;
                return Err(GateError::NotFound);
            }
        }
        if requesting_user != self.user_id {
            return Err(GateError::Unauthorized);
        }
        self.state = TokenState::Redeemed;
        Ok(TokenBinding {
            movie_code: self.movie_code.clone(),
            part: self.part,
            quality: self.quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued() -> TokenRecord {
        TokenRecord::issue(42, "dune_2021".into(), 1, Quality::Q720, 1_000)
    }

    #[test]
    fn redeems_exactly_once() {
        let mut t = issued();
        let binding = t.redeem(42, 1_010, None).unwrap();
        assert_eq!(binding.movie_code, "dune_2021");
        assert_eq!(binding.part, 1);
        assert_eq!(binding.quality, Quality::Q720);
        assert_eq!(t.redeem(42, 1_020, None), Err(GateError::AlreadyUsed));
    }

    #[test]
    fn wrong_user_does_not_consume() {
        let mut t = issued();
        assert_eq!(t.redeem(7, 1_010, None), Err(GateError::Unauthorized));
        assert_eq!(t.state, TokenState::Issued);
        assert!(t.redeem(42, 1_020, None).is_ok());
    }

    #[test]
    fn expires_after_ttl() {
        let mut t = issued();
        let ttl = Some(Duration::from_secs(60));
        assert_eq!(t.redeem(42, 1_061, ttl), Err(GateError::NotFound));
        assert_eq!(t.state, TokenState::Expired);
        // terminal: still refused with no TTL applied
        assert_eq!(t.redeem(42, 1_062, None), Err(GateError::NotFound));
    }

    #[test]
    fn redeem_within_ttl_succeeds() {
        let mut t = issued();
        assert!(t.redeem(42, 1_060, Some(Duration::from_secs(60))).is_ok());
    }
}
