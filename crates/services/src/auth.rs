use std::sync::Arc;

use amigo_core::model::UserId;
use storage::repository::AuthTokenRepository;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Clock;
use crate::error::AuthError;

/// Who is making a call. Built once per request from the caller's token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    user: Option<UserId>,
}

impl RequestContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    #[must_use]
    pub fn authenticated(user: UserId) -> Self {
        Self { user: Some(user) }
    }

    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// The gate every mutation passes before touching storage.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` for anonymous callers.
    pub fn require_user(&self) -> Result<UserId, AuthError> {
        self.user.ok_or_else(|| {
            warn!("rejected unauthenticated call");
            AuthError::Unauthorized
        })
    }
}

/// Issues and resolves opaque login tokens.
#[derive(Clone)]
pub struct AuthService {
    clock: Clock,
    tokens: Arc<dyn AuthTokenRepository>,
}

impl AuthService {
    #[must_use]
    pub fn new(clock: Clock, tokens: Arc<dyn AuthTokenRepository>) -> Self {
        Self { clock, tokens }
    }

    /// Start a login for `user` and return its token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the token cannot be stored.
    pub async fn login(&self, user: UserId) -> Result<String, AuthError> {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens
            .insert_token(&token, user, self.clock.now())
            .await?;
        info!(user = %user, "issued login token");
        Ok(token)
    }

    /// Revoke a token. Returns false when it was unknown.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` on storage failures.
    pub async fn logout(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self.tokens.revoke_token(token).await?)
    }

    /// Resolve an optional token into a request context.
    ///
    /// Missing and unknown tokens both yield an anonymous context; the
    /// gate rejects such callers when they attempt a mutation.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` on storage failures.
    pub async fn context(&self, token: Option<&str>) -> Result<RequestContext, AuthError> {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(RequestContext::anonymous());
        };
        let user = self.tokens.user_for_token(token).await?;
        Ok(RequestContext { user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amigo_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    fn service() -> AuthService {
        AuthService::new(fixed_clock(), Arc::new(InMemoryRepository::new()))
    }

    #[test]
    fn anonymous_context_is_rejected() {
        let err = RequestContext::anonymous().require_user().unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
        assert_eq!(
            RequestContext::authenticated(UserId::new(3))
                .require_user()
                .unwrap(),
            UserId::new(3)
        );
    }

    #[tokio::test]
    async fn login_token_resolves_until_logout() {
        let auth = service();
        let token = auth.login(UserId::new(9)).await.unwrap();

        let ctx = auth.context(Some(&token)).await.unwrap();
        assert_eq!(ctx.user(), Some(UserId::new(9)));

        assert!(auth.logout(&token).await.unwrap());
        let ctx = auth.context(Some(&token)).await.unwrap();
        assert!(!ctx.is_authenticated());
    }

    #[tokio::test]
    async fn missing_or_blank_token_is_anonymous() {
        let auth = service();
        assert!(!auth.context(None).await.unwrap().is_authenticated());
        assert!(!auth.context(Some("  ")).await.unwrap().is_authenticated());
        assert!(!auth.context(Some("nope")).await.unwrap().is_authenticated());
    }
}
