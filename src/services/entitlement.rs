use std::sync::Arc;

use crate::services::orchestrator::ChatError;

/// Who is sending. `None` means signed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_email(email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            user_id: Some(email.clone()),
            email: Some(email),
        }
    }
}

pub trait EntitlementProvider: Send + Sync {
    /// Entitled identities bypass model restriction lists.
    fn is_entitled(&self, identity: &Identity) -> bool;
}

/// Fixed allow-list of identities and email domains. Comparison is
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct AllowListEntitlements {
    identities: Vec<String>,
    domains: Vec<String>,
}

impl AllowListEntitlements {
    pub fn new(identities: &[String], domains: &[String]) -> Self {
        Self {
            identities: identities.iter().map(|s| s.to_lowercase()).collect(),
            domains: domains
                .iter()
                .map(|s| s.trim_start_matches('@').to_lowercase())
                .collect(),
        }
    }
}

impl EntitlementProvider for AllowListEntitlements {
    fn is_entitled(&self, identity: &Identity) -> bool {
        let listed = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| self.identities.contains(&v.to_lowercase()))
                .unwrap_or(false)
        };
        if listed(&identity.user_id) || listed(&identity.email) {
            return true;
        }
        identity
            .email
            .as_deref()
            .and_then(|email| email.rsplit_once('@'))
            .map(|(_, domain)| self.domains.contains(&domain.to_lowercase()))
            .unwrap_or(false)
    }
}

/// Pre-flight check applied before any text or media request is sent.
pub struct ModelGate {
    restricted: Vec<String>,
    entitlements: Arc<dyn EntitlementProvider>,
}

impl ModelGate {
    pub fn new(restricted: Vec<String>, entitlements: Arc<dyn EntitlementProvider>) -> Self {
        Self {
            restricted,
            entitlements,
        }
    }

    pub fn is_restricted(&self, model: &str) -> bool {
        self.restricted.iter().any(|m| m == model)
    }

    pub fn ensure_allowed(&self, model: &str, identity: &Identity) -> Result<(), ChatError> {
        if self.is_restricted(model) && !self.entitlements.is_entitled(identity) {
            return Err(ChatError::RestrictedModel(model.to_string()));
        }
        Ok(())
    }

    /// Models to offer in a picker for this identity.
    pub fn available_models<'a>(&self, models: &'a [String], identity: &Identity) -> Vec<&'a str> {
        let entitled = self.entitlements.is_entitled(identity);
        models
            .iter()
            .filter(|m| entitled || !self.is_restricted(m))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ModelGate {
        let entitlements = AllowListEntitlements::new(
            &["Owner@Example.org".to_string()],
            &["@staff.example".to_string()],
        );
        ModelGate::new(vec!["big".to_string()], Arc::new(entitlements))
    }

    #[test]
    fn test_allow_list_by_identity_and_domain() {
        let gate = gate();
        assert!(gate
            .ensure_allowed("big", &Identity::with_email("owner@example.org"))
            .is_ok());
        assert!(gate
            .ensure_allowed("big", &Identity::with_email("someone@STAFF.example"))
            .is_ok());
        assert!(matches!(
            gate.ensure_allowed("big", &Identity::with_email("x@other.example")),
            Err(ChatError::RestrictedModel(_))
        ));
        assert!(gate.ensure_allowed("small", &Identity::anonymous()).is_ok());
    }

    #[test]
    fn test_available_models_filtered() {
        let gate = gate();
        let models = vec!["small".to_string(), "big".to_string()];
        assert_eq!(
            gate.available_models(&models, &Identity::anonymous()),
            vec!["small"]
        );
        assert_eq!(
            gate.available_models(&models, &Identity::with_email("a@staff.example"))
                .len(),
            2
        );
    }
}
