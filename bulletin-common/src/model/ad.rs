use crate::model::{
    Id,
    category::{Category, CategoryMarker, CategoryName},
    deserialize_some,
    name::BoundedName,
    user::{User, UserMarker, Username},
};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;

pub const AD_NAME_MAX_LEN: usize = 150;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AdMarker;

pub type AdName = BoundedName<AD_NAME_MAX_LEN>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct Price(i32);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Price must not be negative: {0}")]
pub struct NegativePriceError(pub i32);

impl Price {
    pub fn new(price: i32) -> Result<Self, NegativePriceError> {
        if price >= 0 {
            Ok(Self(price))
        } else {
            Err(NegativePriceError(price))
        }
    }

    #[must_use]
    pub fn get(self) -> i32 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = i32::deserialize(deserializer)?;
        Price::new(inner).map_err(|err| {
            Error::invalid_value(Unexpected::Signed(err.0.into()), &"a non-negative price")
        })
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Ad {
    pub id: Id<AdMarker>,
    pub name: AdName,
    pub author_id: Id<UserMarker>,
    pub price: Price,
    pub description: Option<String>,
    pub category_id: Option<Id<CategoryMarker>>,
    pub is_published: bool,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct AdListEntry {
    pub id: Id<AdMarker>,
    pub name: AdName,
    pub author: Username,
    pub price: Price,
    pub category: Option<CategoryName>,
    pub is_published: bool,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct AdDetail {
    pub id: Id<AdMarker>,
    pub name: AdName,
    pub author: User,
    pub price: Price,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub is_published: bool,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdContent {
    pub name: AdName,
    pub author_id: Id<UserMarker>,
    pub price: Price,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<Id<CategoryMarker>>,
    #[serde(default)]
    pub is_published: bool,
}

/// Partial update. Absent fields keep their value; `null` clears a nullable field.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdPatch {
    pub name: Option<AdName>,
    pub author_id: Option<Id<UserMarker>>,
    pub price: Option<Price>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub category_id: Option<Option<Id<CategoryMarker>>>,
    pub is_published: Option<bool>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct AdImage {
    pub id: Id<AdMarker>,
    pub name: AdName,
    pub image: Option<String>,
}

/// Narrowing applied to the ad list. Every set field must match.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct AdFilter {
    pub categories: Vec<Id<CategoryMarker>>,
    pub text: Option<String>,
    /// Case-insensitive substring of any of the author's locations.
    pub location: Option<String>,
    pub price_from: Option<i32>,
    pub price_to: Option<i32>,
}

impl Ad {
    #[must_use]
    pub fn into_content(self) -> AdContent {
        AdContent {
            name: self.name,
            author_id: self.author_id,
            price: self.price,
            description: self.description,
            category_id: self.category_id,
            is_published: self.is_published,
        }
    }
}

impl AdPatch {
    #[must_use]
    pub fn apply(self, current: AdContent) -> AdContent {
        AdContent {
            name: self.name.unwrap_or(current.name),
            author_id: self.author_id.unwrap_or(current.author_id),
            price: self.price.unwrap_or(current.price),
            description: self.description.unwrap_or(current.description),
            category_id: self.category_id.unwrap_or(current.category_id),
            is_published: self.is_published.unwrap_or(current.is_published),
        }
    }
}

impl AdFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
            && self.text.is_none()
            && self.location.is_none()
            && self.price_from.is_none()
            && self.price_to.is_none()
    }
}
