//! User directory trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::CustomerId;
use parking_lot::RwLock;
use resilience::ServiceError;
use serde::{Deserialize, Serialize};

use crate::fault::FaultInjector;

/// A customer as known by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub customer_id: CustomerId,
    pub name: String,
    pub email: String,
    pub active: bool,
}

/// Read-only lookups against the user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetches a customer profile.
    async fn get_user(&self, customer_id: CustomerId) -> Result<UserProfile, ServiceError>;
}

/// In-memory user directory for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<CustomerId, UserProfile>>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fault injector for scripting failures.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Adds or replaces a profile.
    pub fn add_user(&self, profile: UserProfile) {
        self.users.write().insert(profile.customer_id, profile);
    }

    /// Registers an active customer and returns its ID.
    pub fn add_active(&self, name: &str, email: &str) -> CustomerId {
        let customer_id = CustomerId::new();
        self.add_user(UserProfile {
            customer_id,
            name: name.to_string(),
            email: email.to_string(),
            active: true,
        });
        customer_id
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, customer_id: CustomerId) -> Result<UserProfile, ServiceError> {
        self.faults.enter("get_user").await?;
        self.users
            .read()
            .get(&customer_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("customer {customer_id}")))
    }
}
