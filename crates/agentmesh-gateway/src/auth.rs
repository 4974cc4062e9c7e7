//! Authentication handling
//!
//! The gateway accepts a bearer token compared in constant time. Token
//! issuance (JWT) lives in an external identity service; the caller's
//! identity arrives asserted in the `x-user-id` header once the bearer
//! check passes.

use agentmesh_core::{Caller, Error, Result};
use uuid::Uuid;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Debug)]
pub struct ResolvedAuth {
    /// None disables authentication (development only).
    pub token: Option<String>,
    pub admin_users: Vec<Uuid>,
}

impl ResolvedAuth {
    pub fn new(token: Option<String>, admin_users: Vec<Uuid>) -> Self {
        Self { token, admin_users }
    }

    pub fn verify_token(&self, provided: Option<&str>) -> Result<()> {
        match &self.token {
            None => Ok(()),
            Some(expected) => {
                let provided =
                    provided.ok_or_else(|| Error::forbidden("bearer token required"))?;
                if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
                    return Err(Error::forbidden("invalid token"));
                }
                Ok(())
            }
        }
    }

    /// Resolve the caller once the bearer check has passed.
    pub fn caller_from_header(&self, user_header: Option<&str>) -> Result<Caller> {
        let user_id = user_header
            .ok_or_else(|| Error::forbidden("x-user-id header required"))?
            .parse::<Uuid>()
            .map_err(|_| Error::bad_input("x-user-id must be a uuid"))?;
        Ok(Caller {
            user_id,
            admin: self.admin_users.contains(&user_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_auth() {
        let auth = ResolvedAuth::new(Some("test-token-123".into()), vec![]);
        assert!(auth.verify_token(Some("test-token-123")).is_ok());
        assert!(auth.verify_token(Some("wrong-token")).is_err());
        assert!(auth.verify_token(None).is_err());
    }

    #[test]
    fn no_auth_mode() {
        let auth = ResolvedAuth::new(None, vec![]);
        assert!(auth.verify_token(None).is_ok());
        assert!(auth.verify_token(Some("anything")).is_ok());
    }

    #[test]
    fn caller_resolution() {
        let admin = Uuid::new_v4();
        let auth = ResolvedAuth::new(None, vec![admin]);

        let caller = auth
            .caller_from_header(Some(&admin.to_string()))
            .unwrap();
        assert!(caller.admin);

        let user = auth
            .caller_from_header(Some(&Uuid::new_v4().to_string()))
            .unwrap();
        assert!(!user.admin);

        assert!(auth.caller_from_header(None).is_err());
        assert!(auth.caller_from_header(Some("not-a-uuid")).is_err());
    }
}
