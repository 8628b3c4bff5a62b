use std::collections::HashSet;

use crate::config::AuthConfig;
use crate::engine::EntityDefinition;

/// Identity presented by whoever is making a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    token: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Build from an `Authorization` header value; only bearer tokens are read
    pub fn from_authorization(header: Option<&str>) -> Self {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        match token {
            Some(token) => Self::with_token(token),
            None => Self::anonymous(),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// Authorization decisions for entity access
pub trait AccessControl: Send + Sync {
    fn is_admin(&self, caller: &Caller) -> bool;

    /// Admin-only entities are reserved to admins; everything else is open
    fn is_allowed(&self, caller: &Caller, entity: &EntityDefinition) -> bool {
        !entity.admin_only || self.is_admin(caller)
    }
}

/// Grants admin rights to callers presenting a configured bearer token
#[derive(Debug, Clone, Default)]
pub struct TokenAccessControl {
    admin_tokens: HashSet<String>,
}

impl TokenAccessControl {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admin_tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.admin_tokens.iter().cloned())
    }
}

impl AccessControl for TokenAccessControl {
    fn is_admin(&self, caller: &Caller) -> bool {
        caller
            .token()
            .map(|token| self.admin_tokens.contains(token))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EntityKind;
    use std::path::PathBuf;

    fn entity(admin_only: bool) -> EntityDefinition {
        EntityDefinition {
            id: "sales".to_string(),
            path: PathBuf::from("sales.sh"),
            kind: EntityKind::Transformation,
            runtime: "bash".to_string(),
            runtime_args: vec![],
            parameters: vec![],
            admin_only,
            execute_at_start: false,
            exec_cwd: None,
            exec_timeout: None,
        }
    }

    #[test]
    fn test_caller_from_authorization() {
        assert_eq!(Caller::from_authorization(Some("Bearer abc")).token(), Some("abc"));
        assert_eq!(Caller::from_authorization(Some("Basic abc")).token(), None);
        assert_eq!(Caller::from_authorization(Some("Bearer ")).token(), None);
        assert_eq!(Caller::from_authorization(None), Caller::anonymous());
    }

    #[test]
    fn test_admin_only_requires_token() {
        let access = TokenAccessControl::new(["secret"]);

        assert!(access.is_allowed(&Caller::anonymous(), &entity(false)));
        assert!(!access.is_allowed(&Caller::anonymous(), &entity(true)));
        assert!(!access.is_allowed(&Caller::with_token("wrong"), &entity(true)));
        assert!(access.is_allowed(&Caller::with_token("secret"), &entity(true)));
    }

    #[test]
    fn test_empty_tokens_are_ignored() {
        let access = TokenAccessControl::new([""]);
        assert!(!access.is_admin(&Caller::with_token("")));
    }
}
