pub mod ad;
pub mod auth;
pub mod category;
pub mod location;
pub mod name;
pub mod selection;
pub mod user;

use crate::model::{
    ad::NegativePriceError,
    auth::{InvalidAuthTokenHashError, NonPositiveLifetimeError},
    name::InvalidNameError,
    user::UnknownRoleError,
};
use derive_where::derive_where;
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Name(#[from] InvalidNameError),
    #[error(transparent)]
    Price(#[from] NegativePriceError),
    #[error(transparent)]
    Role(#[from] UnknownRoleError),
    #[error(transparent)]
    TokenLifetime(#[from] NonPositiveLifetimeError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
}

/// Database-assigned row id, tagged with the kind of row it points at.
#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<Marker>(i64, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id, PhantomData)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<i64> for Id<Marker> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for i64 {
    fn from(value: Id<Marker>) -> Self {
        value.get()
    }
}

/// Lets a patch tell "field absent" (`None`) apart from "field set to null" (`Some(None)`).
pub(crate) fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}
