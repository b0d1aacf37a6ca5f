use thiserror::Error;

use cyclekit_core::{DomainError, EnterpriseId};

use crate::Principal;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: user {user} does not manage enterprise {enterprise}")]
    NotManager {
        user: String,
        enterprise: EnterpriseId,
    },
}

impl From<AuthzError> for DomainError {
    fn from(err: AuthzError) -> Self {
        DomainError::unauthorized(err.to_string())
    }
}

/// Check that `principal` may manage order cycles coordinated by `coordinator_id`.
///
/// Admins always may; everyone else must manage the coordinator. No IO.
pub fn authorize_manage(principal: &Principal, coordinator_id: EnterpriseId) -> Result<(), AuthzError> {
    if principal.enterprise_scope().contains(coordinator_id) {
        return Ok(());
    }

    tracing::debug!(
        user_id = %principal.user_id,
        coordinator_id = %coordinator_id,
        "manage denied"
    );
    Err(AuthzError::NotManager {
        user: principal.user_id.to_string(),
        enterprise: coordinator_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyclekit_core::UserId;

    #[test]
    fn admin_may_manage_any_coordinator() {
        let admin = Principal::admin(UserId::new());
        assert!(authorize_manage(&admin, EnterpriseId::new()).is_ok());
    }

    #[test]
    fn manager_may_manage_own_coordinator_only() {
        let own = EnterpriseId::new();
        let other = EnterpriseId::new();
        let manager = Principal::manager(UserId::new(), [own]);

        assert!(authorize_manage(&manager, own).is_ok());
        let err = authorize_manage(&manager, other).unwrap_err();
        assert_eq!(
            err,
            AuthzError::NotManager {
                user: manager.user_id.to_string(),
                enterprise: other,
            }
        );
    }

    #[test]
    fn authz_error_maps_to_unauthorized_domain_error() {
        let manager = Principal::manager(UserId::new(), []);
        let err: DomainError = authorize_manage(&manager, EnterpriseId::new()).unwrap_err().into();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }
}
