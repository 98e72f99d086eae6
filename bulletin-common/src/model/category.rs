use crate::model::{Id, name::BoundedName};
use serde::{Deserialize, Serialize};

pub const CATEGORY_NAME_MAX_LEN: usize = 100;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CategoryMarker;

pub type CategoryName = BoundedName<CATEGORY_NAME_MAX_LEN>;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Category {
    pub id: Id<CategoryMarker>,
    pub name: CategoryName,
}

/// Request body for creating or renaming a category.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryContent {
    pub name: CategoryName,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct DeletedCategory {
    pub id: Id<CategoryMarker>,
}
