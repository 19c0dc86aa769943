use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use tracing::{instrument, trace};

use crate::{
    AppState,
    auth::Identity,
    errors::{Error, Result},
};

/// The authenticated caller of the current request.
///
/// Extraction fails with [`Error::Unauthenticated`] when no configured authenticator vouches
/// for the caller. Use `Option<CurrentIdentity>` where anonymous access is fine.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match state.authenticator.authenticate(parts).await {
            Ok(Some(identity)) => Ok(CurrentIdentity(identity)),
            Ok(None) => {
                trace!("No authentication credentials found in request");
                Err(Error::Unauthenticated { message: None })
            }
            // Internal failures (misconfiguration) stay 500s, everything else is a 401
            Err(e @ (Error::Internal { .. } | Error::Other(_))) => Err(e),
            Err(e) => {
                trace!("Authentication rejected: {:?}", e);
                Err(Error::Unauthenticated { message: None })
            }
        }
    }
}

impl OptionalFromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>> {
        match state.authenticator.authenticate(parts).await {
            Ok(identity) => Ok(identity.map(CurrentIdentity)),
            Err(e @ (Error::Internal { .. } | Error::Other(_))) => Err(e),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::issue_session_token;
    use crate::test_utils::{create_test_state, test_identity};
    use axum::http::header;

    fn parts(cookie: Option<String>) -> Parts {
        let mut builder = axum::http::Request::builder().uri("http://localhost/test");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_extracts_session_identity() {
        let state = create_test_state();
        let token = issue_session_token(&test_identity(), &state.config).unwrap();
        let mut parts = parts(Some(format!("{}={}", state.config.auth.session.cookie_name, token)));

        let CurrentIdentity(identity) = <CurrentIdentity as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(identity.account_id, test_identity().account_id);
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let state = create_test_state();
        let mut parts = parts(None);

        let result = <CurrentIdentity as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[tokio::test]
    async fn test_invalid_token_is_unauthenticated() {
        let state = create_test_state();
        let mut parts = parts(Some(format!("{}=forged", state.config.auth.session.cookie_name)));

        let result = <CurrentIdentity as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));

        let optional = <CurrentIdentity as OptionalFromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(optional.is_none());
    }
}
