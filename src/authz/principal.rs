use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::Role;

/// The authenticated caller as the permission graph sees it: identity, role,
/// and department membership.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub department_id: Uuid,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role, department_id: Uuid) -> Self {
        Self {
            user_id,
            role,
            department_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Guard for admin-only operations (user management, permission matrix,
    /// shift configuration, audit queries).
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("admin role required"))
        }
    }
}
