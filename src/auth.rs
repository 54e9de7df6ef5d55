use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::errors::ServiceError;
use crate::types::{Principal, Role, UserId};

/// External identity collaborator: turns a bearer credential into an
/// authenticated principal. HTTP and the realtime channel share this
/// contract, so both transports refuse the same credentials.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Result<Principal, ServiceError>;
}

/// In-process resolver backed by a token table. Stands in for the real
/// identity service in the binary and in tests.
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: Mutex<BTreeMap<String, Principal>>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, user_id: UserId, role: Role) {
        let mut tokens = self.tokens.lock().expect("token lock");
        tokens.insert(token.into(), Principal { user_id, role });
    }
}

impl PrincipalResolver for StaticTokenResolver {
    fn resolve(&self, token: &str) -> Result<Principal, ServiceError> {
        let tokens = self.tokens.lock().expect("token lock");
        tokens.get(token).copied().ok_or(ServiceError::Unauthorized)
    }
}
