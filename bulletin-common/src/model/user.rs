use crate::model::{Id, auth::Password, location::LocationName, name::BoundedName};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

pub const USERNAME_MAX_LEN: usize = 150;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

pub type Username = BoundedName<USERNAME_MAX_LEN>;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Member,
    Admin,
    Moderator,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown user role: {0:?}")]
pub struct UnknownRoleError(pub String);

impl UserRole {
    /// Admins and moderators act on ads as if they were the author.
    #[must_use]
    pub fn is_elevated(self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Moderator)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Member => "member",
            UserRole::Admin => "admin",
            UserRole::Moderator => "moderator",
        }
    }
}

impl Display for UserRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = UnknownRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(UserRole::Member),
            "admin" => Ok(UserRole::Admin),
            "moderator" => Ok(UserRole::Moderator),
            other => Err(UnknownRoleError(other.to_owned())),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub username: Username,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub age: Option<i32>,
    pub locations: Vec<LocationName>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct UserListEntry {
    #[serde(flatten)]
    pub user: User,
    /// Number of published ads authored by the user.
    pub total_ads: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUser {
    pub username: Username,
    pub password: Password,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub locations: Vec<LocationName>,
}

/// Partial update of an account. `locations` are added to the existing ones.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUser {
    pub username: Option<Username>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
    pub age: Option<i32>,
    #[serde(default)]
    pub locations: Vec<LocationName>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct Credentials {
    pub username: Username,
    pub password: Password,
}
