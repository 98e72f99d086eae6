use bulletin_common::model::{
    ModelValidationError,
    ad::{Ad, AdImage, AdListEntry, AdName, Price},
    auth::{Authentication, TokenLifetime},
    category::{Category, CategoryName},
    location::{Location, LocationName},
    selection::{Selection, SelectionListEntry, SelectionName},
    user::{User, UserListEntry, UserRole, Username},
};
use sqlx::FromRow;
use time::{Duration, PrimitiveDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub age: Option<i32>,
    pub locations: Vec<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserListRecord {
    #[sqlx(flatten)]
    pub user: UserRecord,
    pub total_ads: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct CredentialsRecord {
    pub user_id: i64,
    pub password_hash: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_id: i64,
    pub role: String,
    pub token_hash: Vec<u8>,
    pub created_at: PrimitiveDateTime,
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct CategoryRecord {
    pub category_id: i64,
    pub name: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct LocationRecord {
    pub location_id: i64,
    pub name: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct AdRecord {
    pub ad_id: i64,
    pub name: String,
    pub author_id: i64,
    pub price: i32,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub is_published: bool,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct AdListRecord {
    pub ad_id: i64,
    pub name: String,
    pub username: String,
    pub price: i32,
    pub category: Option<String>,
    pub is_published: bool,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct AdImageRecord {
    pub ad_id: i64,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct SelectionRecord {
    pub selection_id: i64,
    pub name: String,
    pub owner_id: i64,
    pub items: Vec<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct SelectionListRecord {
    pub selection_id: i64,
    pub name: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct SelectionOwnerRecord {
    pub selection_id: i64,
    pub name: String,
    pub username: String,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.user_id.into(),
            username: Username::new(value.username)?,
            first_name: value.first_name,
            last_name: value.last_name,
            role: value.role.parse()?,
            age: value.age,
            locations: value
                .locations
                .into_iter()
                .map(LocationName::new)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<UserListRecord> for UserListEntry {
    type Error = ModelValidationError;

    fn try_from(value: UserListRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user.try_into()?,
            total_ads: value.total_ads,
        })
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user_id.into(),
            role: value.role.parse::<UserRole>()?,
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at.as_utc(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| TokenLifetime::new(Duration::seconds(seconds)))
                .transpose()?,
        })
    }
}

impl TryFrom<CategoryRecord> for Category {
    type Error = ModelValidationError;

    fn try_from(value: CategoryRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.category_id.into(),
            name: CategoryName::new(value.name)?,
        })
    }
}

impl TryFrom<LocationRecord> for Location {
    type Error = ModelValidationError;

    fn try_from(value: LocationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.location_id.into(),
            name: LocationName::new(value.name)?,
        })
    }
}

impl TryFrom<AdRecord> for Ad {
    type Error = ModelValidationError;

    fn try_from(value: AdRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.ad_id.into(),
            name: AdName::new(value.name)?,
            author_id: value.author_id.into(),
            price: Price::new(value.price)?,
            description: value.description,
            category_id: value.category_id.map(Into::into),
            is_published: value.is_published,
            image: value.image,
        })
    }
}

impl TryFrom<AdListRecord> for AdListEntry {
    type Error = ModelValidationError;

    fn try_from(value: AdListRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.ad_id.into(),
            name: AdName::new(value.name)?,
            author: Username::new(value.username)?,
            price: Price::new(value.price)?,
            category: value.category.map(CategoryName::new).transpose()?,
            is_published: value.is_published,
            image: value.image,
        })
    }
}

impl TryFrom<AdImageRecord> for AdImage {
    type Error = ModelValidationError;

    fn try_from(value: AdImageRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.ad_id.into(),
            name: AdName::new(value.name)?,
            image: value.image,
        })
    }
}

impl TryFrom<SelectionRecord> for Selection {
    type Error = ModelValidationError;

    fn try_from(value: SelectionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.selection_id.into(),
            name: SelectionName::new(value.name)?,
            owner_id: value.owner_id.into(),
            items: value.items.into_iter().map(Into::into).collect(),
        })
    }
}

impl TryFrom<SelectionListRecord> for SelectionListEntry {
    type Error = ModelValidationError;

    fn try_from(value: SelectionListRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.selection_id.into(),
            name: SelectionName::new(value.name)?,
        })
    }
}
