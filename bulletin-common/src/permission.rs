use crate::model::{
    Id,
    user::{UserMarker, UserRole},
};
use thiserror::Error;

pub const SELECTION_OWNER_MESSAGE: &str = " У вас нет доступа к этой информации";
pub const AD_AUTHOR_OR_STAFF_MESSAGE: &str = " У вас нет доступа к этому объявлению";
pub const ACCOUNT_HOLDER_OR_ADMIN_MESSAGE: &str = " У вас нет доступа к этому пользователю";
pub const ROLE_ASSIGNMENT_MESSAGE: &str = " У вас нет прав назначать эту роль";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    PartialUpdate,
    Destroy,
    UploadImage,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Resource {
    Ad,
    Selection,
    User,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Permission {
    AllowAny,
    IsAuthenticated,
    /// Requester wrote the ad, or is an admin or moderator.
    IsAdAuthorOrStaff,
    IsSelectionOwner,
    /// Requester is the account itself, or an admin.
    IsAccountHolderOrAdmin,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Requester {
    pub id: Id<UserMarker>,
    pub role: UserRole,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum PermissionError {
    #[error("Authentication credentials were not provided")]
    NotAuthenticated,
    #[error("{0}")]
    Denied(&'static str),
}

impl Resource {
    #[must_use]
    pub fn permissions(self, action: Action) -> &'static [Permission] {
        use Action::{Create, Destroy, PartialUpdate, Retrieve, Update, UploadImage};
        use Permission::{
            AllowAny, IsAccountHolderOrAdmin, IsAdAuthorOrStaff, IsAuthenticated,
            IsSelectionOwner,
        };

        match (self, action) {
            (Resource::Ad, Retrieve) | (Resource::Selection, Retrieve | Create) => {
                &[IsAuthenticated]
            }
            (Resource::Ad, Update | PartialUpdate | Destroy | UploadImage) => {
                &[IsAuthenticated, IsAdAuthorOrStaff]
            }
            (Resource::Selection, Update | PartialUpdate | Destroy) => {
                &[IsAuthenticated, IsSelectionOwner]
            }
            (Resource::User, Update | PartialUpdate | Destroy) => {
                &[IsAuthenticated, IsAccountHolderOrAdmin]
            }
            _ => &[AllowAny],
        }
    }

    /// Runs before the target object is loaded.
    pub fn authorize(
        self,
        action: Action,
        requester: Option<Requester>,
    ) -> Result<(), PermissionError> {
        self.permissions(action)
            .iter()
            .try_for_each(|permission| permission.has_permission(requester))
    }

    pub fn authorize_object(
        self,
        action: Action,
        requester: Option<Requester>,
        owner: Id<UserMarker>,
    ) -> Result<(), PermissionError> {
        self.permissions(action)
            .iter()
            .try_for_each(|permission| permission.has_object_permission(requester, owner))
    }
}

impl Permission {
    pub fn has_permission(self, requester: Option<Requester>) -> Result<(), PermissionError> {
        match (self, requester) {
            (Permission::IsAuthenticated, None) => Err(PermissionError::NotAuthenticated),
            _ => Ok(()),
        }
    }

    pub fn has_object_permission(
        self,
        requester: Option<Requester>,
        owner: Id<UserMarker>,
    ) -> Result<(), PermissionError> {
        let Some(requester) = requester else {
            return match self {
                Permission::AllowAny => Ok(()),
                _ => Err(PermissionError::NotAuthenticated),
            };
        };

        let (allowed, message) = match self {
            Permission::AllowAny | Permission::IsAuthenticated => return Ok(()),
            Permission::IsAdAuthorOrStaff => (
                requester.id == owner || requester.role.is_elevated(),
                AD_AUTHOR_OR_STAFF_MESSAGE,
            ),
            Permission::IsSelectionOwner => (requester.id == owner, SELECTION_OWNER_MESSAGE),
            Permission::IsAccountHolderOrAdmin => (
                requester.id == owner || requester.role == UserRole::Admin,
                ACCOUNT_HOLDER_OR_ADMIN_MESSAGE,
            ),
        };

        if allowed {
            Ok(())
        } else {
            Err(PermissionError::Denied(message))
        }
    }
}

/// Only admins may hand out a role other than [`UserRole::Member`].
pub fn authorize_role_assignment(
    requester: Option<Requester>,
    role: UserRole,
) -> Result<(), PermissionError> {
    match (role, requester) {
        (UserRole::Member, _) => Ok(()),
        (
            _,
            Some(Requester {
                role: UserRole::Admin,
                ..
            }),
        ) => Ok(()),
        _ => Err(PermissionError::Denied(ROLE_ASSIGNMENT_MESSAGE)),
    }
}
