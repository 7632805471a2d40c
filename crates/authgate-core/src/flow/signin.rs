use crate::error::Result;
use crate::flow::Gateway;
use crate::state::StateGuard;

/// Where to send the browser, and the state bound to this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigninRedirect {
    pub location: String,
    pub state: String,
}

/// Start a signin: resolve the provider and build its authorization URL
/// with a fresh state value. No other side effects.
pub fn handle(gateway: &Gateway, provider_id: &str) -> Result<SigninRedirect> {
    let provider = gateway.providers.get(provider_id)?;
    let state = StateGuard::generate();
    let location = provider.build_authorization_url(&state);

    tracing::debug!(provider = %provider_id, "signin redirect issued");
    Ok(SigninRedirect { location, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::flow::testing;

    #[test]
    fn signin_redirects_to_provider() {
        let (gateway, _) = testing::gateway("http://127.0.0.1:9", "rotate");
        let redirect = handle(&gateway, "custom-google").unwrap();

        let expected_prefix = "https://accounts.google.com/o/oauth2/v2/auth?client_id=cg-mock-id\
            &redirect_uri=https://api-id.execute-api.eu-west-1.amazonaws.com/dev/authentication/callback/custom-google\
            &response_type=code&scope=profile email&state=";
        assert!(redirect.location.starts_with(expected_prefix));
        assert_eq!(&redirect.location[expected_prefix.len()..], redirect.state);
        assert!(StateGuard::validate(&redirect.state).is_ok());
        assert!(!redirect.location.contains("cg-mock-secret"));
        assert!(!redirect.location.contains(testing::TOKEN_SECRET));
    }

    #[test]
    fn signin_state_is_never_reused() {
        let (gateway, _) = testing::gateway("http://127.0.0.1:9", "rotate");
        let a = handle(&gateway, "custom-google").unwrap();
        let b = handle(&gateway, "custom-google").unwrap();
        assert_ne!(a.state, b.state);
        assert_ne!(a.location, b.location);
    }

    #[test]
    fn unknown_provider_rejected() {
        let (gateway, _) = testing::gateway("http://127.0.0.1:9", "rotate");
        assert!(matches!(
            handle(&gateway, "myspace"),
            Err(Error::UnknownProvider(_))
        ));
    }
}
