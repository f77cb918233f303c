use axum::http::HeaderValue;
use std::collections::{BTreeMap, HashMap};

/// Maps bearer tokens to user ids.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    tokens: HashMap<String, String>,
}

impl Authenticator {
    pub fn new(tokens: &BTreeMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|(token, user)| (token.clone(), user.clone()))
                .collect(),
        }
    }

    /// Resolves an `Authorization: Bearer <token>` header to a user id.
    pub fn authenticate(&self, header: Option<&HeaderValue>) -> Option<String> {
        let value = header?.to_str().ok()?;
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        self.tokens.get(token.trim()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> Authenticator {
        let mut tokens = BTreeMap::new();
        tokens.insert("secret".to_owned(), "alice".to_owned());
        Authenticator::new(&tokens)
    }

    #[test]
    fn bearer_token_resolves_user() {
        let header = HeaderValue::from_static("Bearer secret");
        assert_eq!(auth().authenticate(Some(&header)).as_deref(), Some("alice"));
        let lower = HeaderValue::from_static("bearer secret");
        assert_eq!(auth().authenticate(Some(&lower)).as_deref(), Some("alice"));
    }

    #[test]
    fn missing_or_unknown_token_is_rejected() {
        assert_eq!(auth().authenticate(None), None);
        let wrong = HeaderValue::from_static("Bearer nope");
        assert_eq!(auth().authenticate(Some(&wrong)), None);
        let basic = HeaderValue::from_static("Basic secret");
        assert_eq!(auth().authenticate(Some(&basic)), None);
    }
}
