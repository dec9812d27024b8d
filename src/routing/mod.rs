use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("recipient address is malformed")]
    MalformedAddress,
    #[error("recipient domain is not serviced by this gateway")]
    DomainNotServiced,
    #[error("no shield address matches this recipient")]
    UnknownShield,
    #[error("the owning user is inactive")]
    InactiveUser,
}

/// Read-only projection of the external user-management component. Only the
/// three attributes the core actually consumes are exposed.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub real_delivery_address: String,
    pub active: bool,
}

/// Read-only projection of a `(prefix, domain) -> user_id` mapping. Creation
/// and revocation belong to the external user-management component; the
/// core never writes to this model.
#[derive(Debug, Clone)]
pub struct ShieldAddress {
    pub prefix: String,
    pub domain: String,
    pub user_id: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct RoutingContext {
    pub user_id: String,
    pub real_delivery_address: String,
    pub shield_prefix: String,
}

/// The read-model the core looks up through. The lookup implementation is
/// opaque to the core; whatever backs it must answer within the bounded
/// time assumed by the orchestrator (the router itself does not enforce a
/// deadline, the caller does, the same way the analyzer's deadline is
/// enforced by its caller rather than the analyzer).
#[async_trait]
pub trait ShieldDirectory: Send + Sync {
    async fn find_shield(&self, prefix: &str, domain: &str) -> Option<ShieldAddress>;
    async fn find_user(&self, user_id: &str) -> Option<User>;
}

/// Maps `<prefix>@<service-domain>` recipient addresses to the owning user.
pub struct ShieldRouter<D: ShieldDirectory> {
    directory: D,
    service_domains: Vec<String>,
}

impl<D: ShieldDirectory> ShieldRouter<D> {
    pub fn new(directory: D, service_domains: Vec<String>) -> Self {
        Self {
            directory,
            service_domains: service_domains.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    pub async fn resolve(&self, recipient_address: &str) -> Result<RoutingContext, RoutingError> {
        let normalized = recipient_address.trim().to_lowercase();

        let mut parts = normalized.splitn(2, '@');
        let (local_part, domain) = match (parts.next(), parts.next()) {
            (Some(local), Some(domain)) if !domain.contains('@') && !local.is_empty() && !domain.is_empty() => {
                (local, domain)
            }
            _ => return Err(RoutingError::MalformedAddress),
        };

        if !self.service_domains.iter().any(|d| d == domain) {
            return Err(RoutingError::DomainNotServiced);
        }

        let shield = self
            .directory
            .find_shield(local_part, domain)
            .await
            .ok_or(RoutingError::UnknownShield)?;
        if !shield.active {
            return Err(RoutingError::UnknownShield);
        }

        let user = self
            .directory
            .find_user(&shield.user_id)
            .await
            .ok_or(RoutingError::UnknownShield)?;
        if !user.active {
            return Err(RoutingError::InactiveUser);
        }

        Ok(RoutingContext {
            user_id: user.user_id,
            real_delivery_address: user.real_delivery_address,
            shield_prefix: shield.prefix,
        })
    }
}

/// In-memory directory used by tests and as the default read-model backing
/// for deployments that haven't wired up an external user-management
/// collaborator yet.
#[derive(Default)]
pub struct InMemoryShieldDirectory {
    shields: HashMap<(String, String), ShieldAddress>,
    users: HashMap<String, User>,
}

impl InMemoryShieldDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shield(mut self, shield: ShieldAddress, user: User) -> Self {
        self.shields
            .insert((shield.prefix.clone(), shield.domain.clone()), shield);
        self.users.insert(user.user_id.clone(), user);
        self
    }
}

#[async_trait]
impl ShieldDirectory for InMemoryShieldDirectory {
    async fn find_shield(&self, prefix: &str, domain: &str) -> Option<ShieldAddress> {
        self.shields
            .get(&(prefix.to_owned(), domain.to_owned()))
            .cloned()
    }

    async fn find_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> InMemoryShieldDirectory {
        InMemoryShieldDirectory::new()
            .with_shield(
                ShieldAddress {
                    prefix: "bob1234".to_owned(),
                    domain: "shield.tld".to_owned(),
                    user_id: "u1".to_owned(),
                    active: true,
                },
                User {
                    user_id: "u1".to_owned(),
                    real_delivery_address: "bob@real-inbox.example".to_owned(),
                    active: true,
                },
            )
            .with_shield(
                ShieldAddress {
                    prefix: "inactive".to_owned(),
                    domain: "shield.tld".to_owned(),
                    user_id: "u2".to_owned(),
                    active: true,
                },
                User {
                    user_id: "u2".to_owned(),
                    real_delivery_address: "x@real-inbox.example".to_owned(),
                    active: false,
                },
            )
    }

    #[tokio::test]
    async fn resolves_case_insensitively() {
        let router = ShieldRouter::new(directory(), vec!["shield.tld".to_owned()]);
        let ctx = router.resolve("  Bob1234@Shield.TLD ").await.unwrap();
        assert_eq!(ctx.real_delivery_address, "bob@real-inbox.example");
    }

    #[tokio::test]
    async fn rejects_malformed() {
        let router = ShieldRouter::new(directory(), vec!["shield.tld".to_owned()]);
        assert_eq!(
            router.resolve("not-an-address").await,
            Err(RoutingError::MalformedAddress)
        );
    }

    #[tokio::test]
    async fn rejects_unserviced_domain() {
        let router = ShieldRouter::new(directory(), vec!["shield.tld".to_owned()]);
        assert_eq!(
            router.resolve("bob1234@other.tld").await,
            Err(RoutingError::DomainNotServiced)
        );
    }

    #[tokio::test]
    async fn rejects_unknown_shield() {
        let router = ShieldRouter::new(directory(), vec!["shield.tld".to_owned()]);
        assert_eq!(
            router.resolve("nobody@shield.tld").await,
            Err(RoutingError::UnknownShield)
        );
    }

    #[tokio::test]
    async fn rejects_inactive_user() {
        let router = ShieldRouter::new(directory(), vec!["shield.tld".to_owned()]);
        assert_eq!(
            router.resolve("inactive@shield.tld").await,
            Err(RoutingError::InactiveUser)
        );
    }
}
