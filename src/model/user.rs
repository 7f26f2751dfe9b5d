use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Bioinformatician,
    Technician,
    Client,
}

impl UserRole {
    /// Facility staff; everybody except external clients
    pub fn is_insider(&self) -> bool {
        !matches!(self, UserRole::Client)
    }
}

/// Authenticated caller identity injected into handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl User {
    pub fn new(id: EntityId, email: impl Into<String>, name: impl Into<String>, role: UserRole) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            role,
        }
    }

    pub fn is_insider(&self) -> bool {
        self.role.is_insider()
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Bearer token for the json-api routes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub owner_id: EntityId,
    pub created_at: DateTime<Utc>,
    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiToken {
    pub fn new(token: impl Into<String>, owner_id: EntityId, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            owner_id,
            created_at: Utc::now(),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Sequencing library as far as the reindex workflow needs it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: EntityId,
    pub name: String,
    pub seq_request_id: Option<EntityId>,
    pub index_kit: Option<String>,
    pub index_well: Option<String>,
    pub sequence_i7: Option<String>,
    pub sequence_i5: Option<String>,
}

impl Library {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            seq_request_id: None,
            index_kit: None,
            index_well: None,
            sequence_i7: None,
            sequence_i5: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_insider_roles() {
        assert!(UserRole::Admin.is_insider());
        assert!(UserRole::Bioinformatician.is_insider());
        assert!(UserRole::Technician.is_insider());
        assert!(!UserRole::Client.is_insider());

        let user = User::new(1, "a@lab.org", "A", UserRole::Admin);
        assert!(user.is_admin());
        assert!(user.is_insider());
    }

    #[test]
    fn test_api_token_expiry() {
        let now = Utc::now();
        let token = ApiToken::new("t", 1, Some(now - Duration::seconds(1)));
        assert!(token.is_expired_at(now));

        let token = ApiToken::new("t", 1, Some(now + Duration::hours(1)));
        assert!(!token.is_expired_at(now));

        let token = ApiToken::new("t", 1, None);
        assert!(!token.is_expired());
    }
}
