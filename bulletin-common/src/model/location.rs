use crate::model::{Id, deserialize_some, name::BoundedName};
use serde::{Deserialize, Serialize};

pub const LOCATION_NAME_MAX_LEN: usize = 100;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct LocationMarker;

pub type LocationName = BoundedName<LOCATION_NAME_MAX_LEN>;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Location {
    pub id: Id<LocationMarker>,
    pub name: LocationName,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LocationContent {
    pub name: LocationName,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationPatch {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub name: Option<LocationName>,
}

impl LocationPatch {
    #[must_use]
    pub fn apply(self, location: Location) -> LocationContent {
        LocationContent {
            name: self.name.unwrap_or(location.name),
        }
    }
}

/// Sorted, duplicate-free view of the names, ready for a single upsert.
#[must_use]
pub fn unique_names(locations: &[LocationName]) -> Vec<&str> {
    let mut names: Vec<&str> = locations.iter().map(LocationName::get).collect();
    names.sort_unstable();
    names.dedup();
    names
}
