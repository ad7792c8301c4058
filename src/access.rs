//! Ownership and role checks shared by every resource.

use crate::auth::AuthUser;
use crate::error::AppError;

/// Passes only when the stored owner of a record is the caller.
pub fn assert_owner(owner_id: i32, auth: &AuthUser, denied: &str) -> Result<(), AppError> {
    if owner_id == auth.id {
        Ok(())
    } else {
        Err(AppError::forbidden(denied))
    }
}

pub fn require_poster(auth: &AuthUser) -> Result<(), AppError> {
    if auth.role.can_post() {
        Ok(())
    } else {
        Err(AppError::forbidden("Only alumni and faculty can post opportunities"))
    }
}

pub fn require_student(auth: &AuthUser) -> Result<(), AppError> {
    if auth.role.can_apply() {
        Ok(())
    } else {
        Err(AppError::forbidden("Only students can apply to opportunities"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn caller(id: i32, role: Role) -> AuthUser {
        AuthUser {
            id,
            email: format!("u{}@campus.edu", id),
            role,
            full_name: format!("User {}", id),
        }
    }

    #[test]
    fn owner_passes_and_others_are_forbidden() {
        let me = caller(3, Role::Alumni);
        assert!(assert_owner(3, &me, "Not authorized").is_ok());
        match assert_owner(4, &me, "Not authorized") {
            Err(AppError::Forbidden(msg)) => assert_eq!(msg, "Not authorized"),
            other => panic!("expected forbidden, got {:?}", other),
        }
    }

    #[test]
    fn role_guards() {
        assert!(require_poster(&caller(1, Role::Faculty)).is_ok());
        assert!(require_poster(&caller(1, Role::Student)).is_err());
        assert!(require_student(&caller(1, Role::Student)).is_ok());
        assert!(require_student(&caller(1, Role::Alumni)).is_err());
    }
}
