use crate::server::ServerError;
use axum::extract::FromRequestParts;
use axum_extra::extract::Query as ExtraQuery;
use serde::{Deserialize, Deserializer, de::Error};
use std::{fmt::Display, str::FromStr};

/// Query string extractor that accepts repeated keys (`?cat=1&cat=2`).
#[derive(FromRequestParts, Debug, Clone, Copy, Default)]
#[from_request(via(ExtraQuery), rejection(ServerError))]
pub struct Query<T>(pub T);

/// Parses a query value, treating an empty one like an absent one.
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) if !value.is_empty() => value.parse().map(Some).map_err(D::Error::custom),
        _ => Ok(None),
    }
}

/// Parses every non-empty value of a repeated query key.
pub fn non_empty_values<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    Vec::<String>::deserialize(deserializer)?
        .into_iter()
        .filter(|value| !value.is_empty())
        .map(|value| value.parse().map_err(D::Error::custom))
        .collect()
}
