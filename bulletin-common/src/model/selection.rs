use crate::model::{
    Id,
    ad::{Ad, AdMarker},
    name::BoundedName,
    user::{UserMarker, Username},
};
use serde::{Deserialize, Serialize};

pub const SELECTION_NAME_MAX_LEN: usize = 150;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SelectionMarker;

pub type SelectionName = BoundedName<SELECTION_NAME_MAX_LEN>;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Selection {
    pub id: Id<SelectionMarker>,
    pub name: SelectionName,
    pub owner_id: Id<UserMarker>,
    pub items: Vec<Id<AdMarker>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct SelectionListEntry {
    pub id: Id<SelectionMarker>,
    pub name: SelectionName,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct SelectionDetail {
    pub id: Id<SelectionMarker>,
    pub name: SelectionName,
    pub owner: Username,
    pub items: Vec<Ad>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionContent {
    pub name: SelectionName,
    #[serde(default)]
    pub items: Vec<Id<AdMarker>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionPatch {
    pub name: Option<SelectionName>,
    pub items: Option<Vec<Id<AdMarker>>>,
}

impl Selection {
    #[must_use]
    pub fn into_content(self) -> SelectionContent {
        SelectionContent {
            name: self.name,
            items: self.items,
        }
    }
}

impl SelectionContent {
    /// Item ids sorted and without repeats, as stored.
    #[must_use]
    pub fn unique_items(&self) -> Vec<i64> {
        let mut items: Vec<i64> = self.items.iter().map(|id| id.get()).collect();
        items.sort_unstable();
        items.dedup();
        items
    }
}

impl SelectionPatch {
    #[must_use]
    pub fn apply(self, current: SelectionContent) -> SelectionContent {
        SelectionContent {
            name: self.name.unwrap_or(current.name),
            items: self.items.unwrap_or(current.items),
        }
    }
}
