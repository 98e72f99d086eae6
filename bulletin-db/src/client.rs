use crate::record::{
    AdImageRecord, AdListRecord, AdRecord, AuthenticationRecord, CategoryRecord,
    CredentialsRecord, LocationRecord, SelectionListRecord, SelectionOwnerRecord, SelectionRecord,
    UserListRecord, UserRecord,
};
use bulletin_common::model::{
    Id, ModelValidationError,
    ad::{Ad, AdContent, AdDetail, AdFilter, AdImage, AdListEntry, AdMarker},
    auth::{AuthTokenHash, Authentication, HashedPassword, TokenLifetime},
    category::{Category, CategoryContent, CategoryMarker},
    location::{Location, LocationContent, LocationMarker, LocationName, unique_names},
    selection::{
        Selection, SelectionContent, SelectionDetail, SelectionListEntry, SelectionMarker,
        SelectionName,
    },
    user::{CreateUser, UpdateUser, User, UserListEntry, UserMarker, UserRole, Username},
};
use sqlx::{
    PgConnection, PgPool, Postgres, QueryBuilder,
    error::ErrorKind,
    migrate::MigrateError,
    postgres::PgPoolOptions,
    query, query_as, query_scalar,
};
use thiserror::Error;
use tracing::debug;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("A referenced row does not exist ({constraint})")]
    UnknownReference { constraint: String },
    #[error("The row conflicts with an existing one ({constraint})")]
    Conflict { constraint: String },
    #[error("The {0} row disappeared while it was being read")]
    Vanished(&'static str),
    #[error("Applying migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let Some(db_err) = err.as_database_error() else {
            return DbError::Sqlx(err);
        };
        let kind = db_err.kind();
        let constraint = db_err.constraint().unwrap_or("unnamed").to_owned();

        match kind {
            ErrorKind::ForeignKeyViolation => DbError::UnknownReference { constraint },
            ErrorKind::UniqueViolation => DbError::Conflict { constraint },
            _ => DbError::Sqlx(err),
        }
    }
}

const USER_COLUMNS: &str = "
    users.user_id,
    users.username,
    users.first_name,
    users.last_name,
    users.role,
    users.age,
    COALESCE(
        ARRAY_AGG(locations.name::TEXT ORDER BY locations.name)
            FILTER (WHERE locations.name IS NOT NULL),
        '{}'
    ) AS locations
";

const USER_SOURCE: &str = "
    users.users
    LEFT JOIN users.user_locations ON user_locations.user_id = users.user_id
    LEFT JOIN users.locations ON locations.location_id = user_locations.location_id
";

const AD_COLUMNS: &str = "
    ads.ad_id,
    ads.name,
    ads.author_id,
    ads.price,
    ads.description,
    ads.category_id,
    ads.is_published,
    ads.image
";

const AD_LIST_SELECT: &str = "
    SELECT
        ads.ad_id,
        ads.name,
        users.username,
        ads.price,
        categories.name AS category,
        ads.is_published,
        ads.image
    FROM
        ads.ads
        JOIN users.users ON users.user_id = ads.author_id
        LEFT JOIN ads.categories ON categories.category_id = ads.category_id
    WHERE
        TRUE";

#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool))
    }

    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().connect_lazy(database_url)?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;

        Ok(())
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM {USER_SOURCE} WHERE users.user_id = $1 GROUP BY users.user_id"
        );
        let record = query_as::<_, UserRecord>(&sql)
            .bind(user_id.get())
            .fetch_optional(&self.pool)
            .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<UserListEntry>> {
        let sql = format!(
            "
            SELECT
                {USER_COLUMNS},
                (
                    SELECT COUNT(*)
                    FROM ads.ads
                    WHERE ads.author_id = users.user_id AND ads.is_published
                ) AS total_ads
            FROM {USER_SOURCE}
            GROUP BY users.user_id
            ORDER BY users.user_id
            "
        );
        let records = query_as::<_, UserListRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let users = records
            .into_iter()
            .map(UserListEntry::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    pub async fn create_user(
        &self,
        user: &CreateUser,
        password_hash: &HashedPassword,
    ) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let user_id: Id<UserMarker> = query_scalar::<_, i64>(
            "
            INSERT INTO users.users (username, password_hash, first_name, last_name, role, age)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING users.user_id
            ",
        )
        .bind(user.username.get())
        .bind(password_hash.get())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.age)
        .fetch_one(&mut *tx)
        .await?
        .into();

        Self::attach_locations(&mut tx, user_id, &user.locations).await?;
        tx.commit().await?;

        debug!(%user_id, username = %user.username, "Created user");

        self.fetch_user(user_id)
            .await?
            .ok_or(DbError::Vanished("user"))
    }

    /// Applies the set fields of `update`. Returns `None` if the user does not exist.
    pub async fn update_user(
        &self,
        user_id: Id<UserMarker>,
        update: &UpdateUser,
    ) -> Result<Option<User>> {
        let mut tx = self.pool.begin().await?;

        let updated = query_scalar::<_, i64>(
            "
            UPDATE users.users
            SET
                username = COALESCE($2, username),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                role = COALESCE($5, role),
                age = COALESCE($6, age)
            WHERE users.user_id = $1
            RETURNING users.user_id
            ",
        )
        .bind(user_id.get())
        .bind(update.username.as_ref().map(Username::get))
        .bind(update.first_name.as_deref())
        .bind(update.last_name.as_deref())
        .bind(update.role.map(UserRole::as_str))
        .bind(update.age)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            return Ok(None);
        }

        Self::attach_locations(&mut tx, user_id, &update.locations).await?;
        tx.commit().await?;

        self.fetch_user(user_id).await
    }

    pub async fn delete_user(&self, user_id: Id<UserMarker>) -> Result<bool> {
        let result = query("DELETE FROM users.users WHERE users.user_id = $1")
            .bind(user_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Associates the named locations with the user, creating missing ones.
    async fn attach_locations(
        conn: &mut PgConnection,
        user_id: Id<UserMarker>,
        locations: &[LocationName],
    ) -> Result<()> {
        let names = unique_names(locations);
        if names.is_empty() {
            return Ok(());
        }

        let result = query(
            "
            WITH upserted AS (
                INSERT INTO users.locations (name)
                SELECT UNNEST($1::TEXT[])
                ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                RETURNING locations.location_id
            )
            INSERT INTO users.user_locations (user_id, location_id)
            SELECT $2, upserted.location_id FROM upserted
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(&names)
        .bind(user_id.get())
        .execute(conn)
        .await?;

        debug!(%user_id, ?names, added = result.rows_affected(), "Attached locations");
        Ok(())
    }

    pub async fn fetch_credentials(
        &self,
        username: &Username,
    ) -> Result<Option<(Id<UserMarker>, HashedPassword)>> {
        let record = query_as::<_, CredentialsRecord>(
            "
            SELECT
                users.user_id,
                users.password_hash
            FROM
                users.users
            WHERE
                users.username = $1
            ",
        )
        .bind(username.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|record| {
            (
                record.user_id.into(),
                HashedPassword::from_phc(record.password_hash),
            )
        }))
    }

    pub async fn create_auth(
        &self,
        user_id: Id<UserMarker>,
        token_hash: &AuthTokenHash,
        expires_after: Option<TokenLifetime>,
    ) -> Result<()> {
        query(
            "
            INSERT INTO users.auth_tokens (token_hash, user_id, expires_after_seconds)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(&token_hash.0[..])
        .bind(user_id.get())
        .bind(expires_after.map(TokenLifetime::whole_seconds))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                auth_tokens.user_id,
                users.role,
                auth_tokens.token_hash,
                auth_tokens.created_at,
                auth_tokens.expires_after_seconds
            FROM
                users.auth_tokens NATURAL JOIN users.users
            WHERE
                auth_tokens.token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }

    pub async fn list_locations(&self) -> Result<Vec<Location>> {
        let records = query_as::<_, LocationRecord>(
            "
            SELECT
                locations.location_id,
                locations.name
            FROM
                users.locations
            ORDER BY
                locations.name
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let locations = records
            .into_iter()
            .map(Location::try_from)
            .collect::<Result<_, _>>()?;
        Ok(locations)
    }

    pub async fn fetch_location(
        &self,
        location_id: Id<LocationMarker>,
    ) -> Result<Option<Location>> {
        let record = query_as::<_, LocationRecord>(
            "
            SELECT
                locations.location_id,
                locations.name
            FROM
                users.locations
            WHERE
                locations.location_id = $1
            ",
        )
        .bind(location_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let location = record.map(Location::try_from).transpose()?;
        Ok(location)
    }

    /// Returns the location with this name, creating it if it does not exist yet.
    pub async fn create_location(&self, location: &LocationContent) -> Result<Location> {
        let record = query_as::<_, LocationRecord>(
            "
            INSERT INTO users.locations (name)
            VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING locations.location_id, locations.name
            ",
        )
        .bind(location.name.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.try_into()?)
    }

    pub async fn update_location(
        &self,
        location_id: Id<LocationMarker>,
        location: &LocationContent,
    ) -> Result<Option<Location>> {
        let record = query_as::<_, LocationRecord>(
            "
            UPDATE users.locations
            SET name = $2
            WHERE locations.location_id = $1
            RETURNING locations.location_id, locations.name
            ",
        )
        .bind(location_id.get())
        .bind(location.name.get())
        .fetch_optional(&self.pool)
        .await?;

        let location = record.map(Location::try_from).transpose()?;
        Ok(location)
    }

    pub async fn delete_location(&self, location_id: Id<LocationMarker>) -> Result<bool> {
        let result = query("DELETE FROM users.locations WHERE locations.location_id = $1")
            .bind(location_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let records = query_as::<_, CategoryRecord>(
            "
            SELECT
                categories.category_id,
                categories.name
            FROM
                ads.categories
            ORDER BY
                categories.name, categories.category_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let categories = records
            .into_iter()
            .map(Category::try_from)
            .collect::<Result<_, _>>()?;
        Ok(categories)
    }

    pub async fn fetch_category(
        &self,
        category_id: Id<CategoryMarker>,
    ) -> Result<Option<Category>> {
        let record = query_as::<_, CategoryRecord>(
            "
            SELECT
                categories.category_id,
                categories.name
            FROM
                ads.categories
            WHERE
                categories.category_id = $1
            ",
        )
        .bind(category_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let category = record.map(Category::try_from).transpose()?;
        Ok(category)
    }

    pub async fn create_category(&self, category: &CategoryContent) -> Result<Category> {
        let record = query_as::<_, CategoryRecord>(
            "
            INSERT INTO ads.categories (name)
            VALUES ($1)
            RETURNING categories.category_id, categories.name
            ",
        )
        .bind(category.name.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.try_into()?)
    }

    pub async fn update_category(
        &self,
        category_id: Id<CategoryMarker>,
        category: &CategoryContent,
    ) -> Result<Option<Category>> {
        let record = query_as::<_, CategoryRecord>(
            "
            UPDATE ads.categories
            SET name = $2
            WHERE categories.category_id = $1
            RETURNING categories.category_id, categories.name
            ",
        )
        .bind(category_id.get())
        .bind(category.name.get())
        .fetch_optional(&self.pool)
        .await?;

        let category = record.map(Category::try_from).transpose()?;
        Ok(category)
    }

    pub async fn delete_category(&self, category_id: Id<CategoryMarker>) -> Result<bool> {
        let result = query("DELETE FROM ads.categories WHERE categories.category_id = $1")
            .bind(category_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_ads(&self, filter: &AdFilter) -> Result<Vec<AdListEntry>> {
        let mut builder = ad_list_query(filter);
        let records = builder
            .build_query_as::<AdListRecord>()
            .fetch_all(&self.pool)
            .await?;

        debug!(?filter, count = records.len(), "Listed ads");

        let ads = records
            .into_iter()
            .map(AdListEntry::try_from)
            .collect::<Result<_, _>>()?;
        Ok(ads)
    }

    pub async fn fetch_ad(&self, ad_id: Id<AdMarker>) -> Result<Option<Ad>> {
        let sql = format!("SELECT {AD_COLUMNS} FROM ads.ads WHERE ads.ad_id = $1");
        let record = query_as::<_, AdRecord>(&sql)
            .bind(ad_id.get())
            .fetch_optional(&self.pool)
            .await?;

        let ad = record.map(Ad::try_from).transpose()?;
        Ok(ad)
    }

    pub async fn fetch_ad_detail(&self, ad_id: Id<AdMarker>) -> Result<Option<AdDetail>> {
        let Some(ad) = self.fetch_ad(ad_id).await? else {
            return Ok(None);
        };

        let author = self
            .fetch_user(ad.author_id)
            .await?
            .ok_or(DbError::Vanished("author"))?;
        let category = match ad.category_id {
            Some(category_id) => self.fetch_category(category_id).await?,
            None => None,
        };

        Ok(Some(AdDetail {
            id: ad.id,
            name: ad.name,
            author,
            price: ad.price,
            description: ad.description,
            category,
            is_published: ad.is_published,
            image: ad.image,
        }))
    }

    pub async fn create_ad(&self, ad: &AdContent) -> Result<Ad> {
        let sql = format!(
            "
            INSERT INTO ads.ads (name, author_id, price, description, category_id, is_published)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {AD_COLUMNS}
            "
        );
        let record = query_as::<_, AdRecord>(&sql)
            .bind(ad.name.get())
            .bind(ad.author_id.get())
            .bind(ad.price.get())
            .bind(ad.description.as_deref())
            .bind(ad.category_id.map(Id::get))
            .bind(ad.is_published)
            .fetch_one(&self.pool)
            .await?;

        Ok(record.try_into()?)
    }

    pub async fn update_ad(&self, ad_id: Id<AdMarker>, ad: &AdContent) -> Result<Option<Ad>> {
        let sql = format!(
            "
            UPDATE ads.ads
            SET
                name = $2,
                author_id = $3,
                price = $4,
                description = $5,
                category_id = $6,
                is_published = $7
            WHERE ads.ad_id = $1
            RETURNING {AD_COLUMNS}
            "
        );
        let record = query_as::<_, AdRecord>(&sql)
            .bind(ad_id.get())
            .bind(ad.name.get())
            .bind(ad.author_id.get())
            .bind(ad.price.get())
            .bind(ad.description.as_deref())
            .bind(ad.category_id.map(Id::get))
            .bind(ad.is_published)
            .fetch_optional(&self.pool)
            .await?;

        let ad = record.map(Ad::try_from).transpose()?;
        Ok(ad)
    }

    pub async fn set_ad_image(
        &self,
        ad_id: Id<AdMarker>,
        image: Option<&str>,
    ) -> Result<Option<AdImage>> {
        let record = query_as::<_, AdImageRecord>(
            "
            UPDATE ads.ads
            SET image = $2
            WHERE ads.ad_id = $1
            RETURNING ads.ad_id, ads.name, ads.image
            ",
        )
        .bind(ad_id.get())
        .bind(image)
        .fetch_optional(&self.pool)
        .await?;

        let image = record.map(AdImage::try_from).transpose()?;
        Ok(image)
    }

    pub async fn delete_ad(&self, ad_id: Id<AdMarker>) -> Result<bool> {
        let result = query("DELETE FROM ads.ads WHERE ads.ad_id = $1")
            .bind(ad_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_selections(&self) -> Result<Vec<SelectionListEntry>> {
        let records = query_as::<_, SelectionListRecord>(
            "
            SELECT
                selections.selection_id,
                selections.name
            FROM
                ads.selections
            ORDER BY
                selections.selection_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let selections = records
            .into_iter()
            .map(SelectionListEntry::try_from)
            .collect::<Result<_, _>>()?;
        Ok(selections)
    }

    pub async fn fetch_selection(
        &self,
        selection_id: Id<SelectionMarker>,
    ) -> Result<Option<Selection>> {
        let record = query_as::<_, SelectionRecord>(
            "
            SELECT
                selections.selection_id,
                selections.name,
                selections.owner_id,
                COALESCE(
                    ARRAY_AGG(selection_items.ad_id ORDER BY selection_items.ad_id)
                        FILTER (WHERE selection_items.ad_id IS NOT NULL),
                    '{}'
                ) AS items
            FROM
                ads.selections
                LEFT JOIN ads.selection_items
                    ON selection_items.selection_id = selections.selection_id
            WHERE
                selections.selection_id = $1
            GROUP BY
                selections.selection_id
            ",
        )
        .bind(selection_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let selection = record.map(Selection::try_from).transpose()?;
        Ok(selection)
    }

    /// The selection with its owner's username and the full ads it contains.
    pub async fn fetch_selection_detail(
        &self,
        selection_id: Id<SelectionMarker>,
    ) -> Result<Option<SelectionDetail>> {
        let Some(owner_record) = query_as::<_, SelectionOwnerRecord>(
            "
            SELECT
                selections.selection_id,
                selections.name,
                users.username
            FROM
                ads.selections
                JOIN users.users ON users.user_id = selections.owner_id
            WHERE
                selections.selection_id = $1
            ",
        )
        .bind(selection_id.get())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let sql = format!(
            "
            SELECT {AD_COLUMNS}
            FROM
                ads.ads
                JOIN ads.selection_items ON selection_items.ad_id = ads.ad_id
            WHERE
                selection_items.selection_id = $1
            ORDER BY
                ads.ad_id
            "
        );
        let item_records = query_as::<_, AdRecord>(&sql)
            .bind(selection_id.get())
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(SelectionDetail {
            id: owner_record.selection_id.into(),
            name: SelectionName::new(owner_record.name).map_err(ModelValidationError::from)?,
            owner: Username::new(owner_record.username).map_err(ModelValidationError::from)?,
            items: item_records
                .into_iter()
                .map(Ad::try_from)
                .collect::<Result<_, _>>()?,
        }))
    }

    pub async fn create_selection(
        &self,
        owner_id: Id<UserMarker>,
        selection: &SelectionContent,
    ) -> Result<Selection> {
        let mut tx = self.pool.begin().await?;

        let selection_id: Id<SelectionMarker> = query_scalar::<_, i64>(
            "
            INSERT INTO ads.selections (name, owner_id)
            VALUES ($1, $2)
            RETURNING selections.selection_id
            ",
        )
        .bind(selection.name.get())
        .bind(owner_id.get())
        .fetch_one(&mut *tx)
        .await?
        .into();

        Self::replace_selection_items(&mut tx, selection_id, &selection.unique_items()).await?;
        tx.commit().await?;

        self.fetch_selection(selection_id)
            .await?
            .ok_or(DbError::Vanished("selection"))
    }

    pub async fn update_selection(
        &self,
        selection_id: Id<SelectionMarker>,
        selection: &SelectionContent,
    ) -> Result<Option<Selection>> {
        let mut tx = self.pool.begin().await?;

        let result = query(
            "
            UPDATE ads.selections
            SET name = $2
            WHERE selections.selection_id = $1
            ",
        )
        .bind(selection_id.get())
        .bind(selection.name.get())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Self::replace_selection_items(&mut tx, selection_id, &selection.unique_items()).await?;
        tx.commit().await?;

        self.fetch_selection(selection_id).await
    }

    async fn replace_selection_items(
        conn: &mut PgConnection,
        selection_id: Id<SelectionMarker>,
        items: &[i64],
    ) -> Result<()> {
        query("DELETE FROM ads.selection_items WHERE selection_items.selection_id = $1")
            .bind(selection_id.get())
            .execute(&mut *conn)
            .await?;

        if items.is_empty() {
            return Ok(());
        }

        query(
            "
            INSERT INTO ads.selection_items (selection_id, ad_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ",
        )
        .bind(selection_id.get())
        .bind(items)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn delete_selection(&self, selection_id: Id<SelectionMarker>) -> Result<bool> {
        let result = query("DELETE FROM ads.selections WHERE selections.selection_id = $1")
            .bind(selection_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn ad_list_query(filter: &AdFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(AD_LIST_SELECT);

    if !filter.categories.is_empty() {
        let categories: Vec<i64> = filter.categories.iter().map(|id| id.get()).collect();
        builder
            .push(" AND ads.category_id = ANY(")
            .push_bind(categories)
            .push(")");
    }

    if let Some(text) = &filter.text {
        builder
            .push(" AND ads.name ILIKE ")
            .push_bind(contains_pattern(text));
    }

    if let Some(location) = &filter.location {
        builder
            .push(
                " AND EXISTS (\
                    SELECT 1 \
                    FROM users.user_locations \
                        JOIN users.locations \
                            ON locations.location_id = user_locations.location_id \
                    WHERE user_locations.user_id = ads.author_id AND locations.name ILIKE ",
            )
            .push_bind(contains_pattern(location))
            .push(")");
    }

    if let Some(price_from) = filter.price_from {
        builder.push(" AND ads.price >= ").push_bind(price_from);
    }

    if let Some(price_to) = filter.price_to {
        builder.push(" AND ads.price <= ").push_bind(price_to);
    }

    builder.push(" ORDER BY ads.price DESC, ads.ad_id");
    builder
}

/// `ILIKE` pattern matching any string that contains `needle` literally.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use crate::client::{DbClient, DbError, ad_list_query, contains_pattern};
    use bulletin_common::model::{
        Id,
        ad::{Ad, AdContent, AdFilter, AdMarker},
        auth::HashedPassword,
        category::{CategoryContent, CategoryMarker, CategoryName},
        location::{LocationContent, LocationName},
        selection::SelectionContent,
        user::{CreateUser, UpdateUser, User, UserMarker},
    };
    use serde_json::json;
    use sqlx::query_scalar;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    /// Migrated client for `DATABASE_URL`, or `None` when no database is configured.
    async fn database() -> Option<DbClient> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL is not set, skipping database test");
            return None;
        };

        let db = DbClient::connect(&database_url, 4).await.unwrap();
        db.migrate().await.unwrap();
        Some(db)
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}-{:08x}", rand::random::<u32>())
    }

    fn location(name: &str) -> LocationName {
        LocationName::new(name.to_owned()).unwrap()
    }

    fn category(name: &str) -> CategoryContent {
        CategoryContent {
            name: CategoryName::new(name.to_owned()).unwrap(),
        }
    }

    async fn create_user(db: &DbClient, locations: &[&str]) -> User {
        let new_user: CreateUser = serde_json::from_value(json!({
            "username": unique("user"),
            "password": "unused",
            "locations": locations,
        }))
        .unwrap();

        db.create_user(&new_user, &HashedPassword::from_phc("unused".to_owned()))
            .await
            .unwrap()
    }

    async fn create_ad(
        db: &DbClient,
        author_id: Id<UserMarker>,
        price: i32,
        category_id: Option<Id<CategoryMarker>>,
        is_published: bool,
    ) -> Ad {
        let content: AdContent = serde_json::from_value(json!({
            "name": unique("ad"),
            "author_id": author_id,
            "price": price,
            "category_id": category_id,
            "is_published": is_published,
        }))
        .unwrap();

        db.create_ad(&content).await.unwrap()
    }

    async fn location_rows(db: &DbClient, names: &[&str]) -> i64 {
        query_scalar::<_, i64>("SELECT COUNT(*) FROM users.locations WHERE name = ANY($1)")
            .bind(names.to_vec())
            .fetch_one(&db.pool)
            .await
            .unwrap()
    }

    async fn listed_ids(db: &DbClient, filter: &AdFilter) -> Vec<Id<AdMarker>> {
        db.list_ads(filter)
            .await
            .unwrap()
            .into_iter()
            .map(|ad| ad.id)
            .collect()
    }

    #[test]
    fn pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("bike"), "%bike%");
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn unfiltered_list_is_ordered_by_price() {
        let builder = ad_list_query(&AdFilter::default());
        let sql = builder.sql();

        assert!(!sql.contains('$'));
        assert!(sql.trim_end().ends_with("ORDER BY ads.price DESC, ads.ad_id"));
    }

    #[test]
    fn every_filter_adds_a_conjunct() {
        let filter = AdFilter {
            categories: vec![Id::new(1), Id::new(2)],
            text: Some("bike".to_owned()),
            location: Some("mos".to_owned()),
            price_from: Some(100),
            price_to: Some(200),
        };
        let builder = ad_list_query(&filter);
        let sql = builder.sql();

        assert!(sql.contains("ads.category_id = ANY($1)"));
        assert!(sql.contains("ads.name ILIKE $2"));
        assert!(sql.contains("locations.name ILIKE $3"));
        assert!(sql.contains("ads.price >= $4"));
        assert!(sql.contains("ads.price <= $5"));
        assert!(!sql.contains(" OR "));
        assert_eq!(sql.matches(" AND ads.").count(), 4);
    }

    #[test]
    fn price_bounds_alone() {
        let filter = AdFilter {
            price_to: Some(200),
            ..AdFilter::default()
        };
        let builder = ad_list_query(&filter);
        let sql = builder.sql();

        assert!(sql.contains("ads.price <= $1"));
        assert!(!sql.contains("ILIKE"));
        assert!(!sql.contains("ANY("));
    }

    #[tokio::test]
    async fn locations_are_shared_between_users() {
        let Some(db) = database().await else { return };
        let moscow = unique("Moscow");
        let omsk = unique("Omsk");

        let anna = create_user(&db, &[moscow.as_str(), omsk.as_str(), moscow.as_str()]).await;
        let boris = create_user(&db, &[moscow.as_str()]).await;

        assert_eq!(anna.locations, [location(&moscow), location(&omsk)]);
        assert_eq!(boris.locations, [location(&moscow)]);
        assert_eq!(location_rows(&db, &[moscow.as_str(), omsk.as_str()]).await, 2);

        let update = UpdateUser {
            locations: vec![location(&omsk)],
            ..UpdateUser::default()
        };
        let boris = db.update_user(boris.id, &update).await.unwrap().unwrap();

        assert_eq!(boris.locations, [location(&moscow), location(&omsk)]);
        assert_eq!(location_rows(&db, &[moscow.as_str(), omsk.as_str()]).await, 2);

        let untouched = db
            .update_user(boris.id, &UpdateUser::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched, boris);
    }

    #[tokio::test]
    async fn concurrent_signups_share_new_locations() {
        let Some(db) = database().await else { return };
        let db = Arc::new(db);
        let tver = unique("Tver");
        let kazan = unique("Kazan");

        let mut signups = JoinSet::new();
        for _ in 0..10 {
            let db = Arc::clone(&db);
            let (tver, kazan) = (tver.clone(), kazan.clone());
            signups.spawn(async move { create_user(&db, &[tver.as_str(), kazan.as_str()]).await });
        }
        while let Some(user) = signups.join_next().await {
            assert_eq!(user.unwrap().locations.len(), 2);
        }

        assert_eq!(location_rows(&db, &[tver.as_str(), kazan.as_str()]).await, 2);
    }

    #[tokio::test]
    async fn total_ads_counts_published_only() {
        let Some(db) = database().await else { return };
        let author = create_user(&db, &[]).await;
        let idle = create_user(&db, &[]).await;

        create_ad(&db, author.id, 10, None, true).await;
        create_ad(&db, author.id, 20, None, true).await;
        create_ad(&db, author.id, 30, None, false).await;

        let users = db.list_users().await.unwrap();
        let total_ads = |id| {
            users
                .iter()
                .find(|entry| entry.user.id == id)
                .map(|entry| entry.total_ads)
        };

        assert_eq!(total_ads(author.id), Some(2));
        assert_eq!(total_ads(idle.id), Some(0));
    }

    #[tokio::test]
    async fn category_lifecycle() {
        let Some(db) = database().await else { return };
        let name = unique("Books");
        let comics = unique("Comics");

        let created = db.create_category(&category(&name)).await.unwrap();
        assert_eq!(created.name.get(), name);
        assert_eq!(db.fetch_category(created.id).await.unwrap(), Some(created.clone()));
        assert_eq!(
            serde_json::to_value(&created).unwrap(),
            json!({"id": created.id, "name": name})
        );

        let renamed = db
            .update_category(created.id, &category(&comics))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.id, created.id);
        assert_eq!(renamed.name.get(), comics);

        assert!(db.delete_category(created.id).await.unwrap());
        assert_eq!(db.fetch_category(created.id).await.unwrap(), None);
        assert!(!db.delete_category(created.id).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_category_keeps_its_ads() {
        let Some(db) = database().await else { return };
        let author = create_user(&db, &[]).await;
        let books = db.create_category(&category(&unique("Books"))).await.unwrap();
        let ad = create_ad(&db, author.id, 10, Some(books.id), true).await;

        assert!(db.delete_category(books.id).await.unwrap());

        let ad = db.fetch_ad(ad.id).await.unwrap().unwrap();
        assert_eq!(ad.category_id, None);
    }

    #[tokio::test]
    async fn combined_filters_intersect() {
        let Some(db) = database().await else { return };
        let author = create_user(&db, &[]).await;
        let books = db.create_category(&category(&unique("Books"))).await.unwrap();
        let games = db.create_category(&category(&unique("Games"))).await.unwrap();

        let cheap = create_ad(&db, author.id, 50, Some(books.id), true).await;
        let low = create_ad(&db, author.id, 100, Some(books.id), true).await;
        let high = create_ad(&db, author.id, 200, Some(books.id), true).await;
        let pricey = create_ad(&db, author.id, 250, Some(books.id), true).await;
        let other = create_ad(&db, author.id, 150, Some(games.id), true).await;

        let by_category = listed_ids(
            &db,
            &AdFilter {
                categories: vec![books.id],
                ..AdFilter::default()
            },
        )
        .await;
        let by_price = listed_ids(
            &db,
            &AdFilter {
                price_from: Some(100),
                price_to: Some(200),
                ..AdFilter::default()
            },
        )
        .await;
        let combined = listed_ids(
            &db,
            &AdFilter {
                categories: vec![books.id],
                price_from: Some(100),
                price_to: Some(200),
                ..AdFilter::default()
            },
        )
        .await;

        assert_eq!(by_category, [pricey.id, high.id, low.id, cheap.id]);
        assert!(by_price.contains(&other.id));
        let intersection: Vec<_> = by_category
            .iter()
            .filter(|id| by_price.contains(id))
            .copied()
            .collect();
        assert_eq!(combined, intersection);
        assert_eq!(combined, [high.id, low.id]);

        let both_categories = listed_ids(
            &db,
            &AdFilter {
                categories: vec![books.id, games.id],
                price_from: Some(150),
                price_to: Some(150),
                ..AdFilter::default()
            },
        )
        .await;
        assert_eq!(both_categories, [other.id]);
    }

    #[tokio::test]
    async fn text_and_location_filters() {
        let Some(db) = database().await else { return };
        let city = unique("Samara");
        let local = create_user(&db, &[city.as_str()]).await;
        let remote = create_user(&db, &[]).await;
        let near = create_ad(&db, local.id, 10, None, true).await;
        let far = create_ad(&db, remote.id, 10, None, true).await;

        let by_location = listed_ids(
            &db,
            &AdFilter {
                location: Some(city.to_uppercase()),
                ..AdFilter::default()
            },
        )
        .await;
        assert_eq!(by_location, [near.id]);

        let by_text = listed_ids(
            &db,
            &AdFilter {
                text: Some(far.name.get().to_uppercase()),
                ..AdFilter::default()
            },
        )
        .await;
        assert_eq!(by_text, [far.id]);

        let wildcard = listed_ids(
            &db,
            &AdFilter {
                text: Some(format!("{}%", near.name.get())),
                ..AdFilter::default()
            },
        )
        .await;
        assert!(wildcard.is_empty());
    }

    #[tokio::test]
    async fn broken_references_and_duplicates() {
        let Some(db) = database().await else { return };
        let author = create_user(&db, &[]).await;

        let orphan: AdContent = serde_json::from_value(json!({
            "name": "Lamp",
            "author_id": author.id,
            "price": 10,
            "category_id": i64::MAX,
        }))
        .unwrap();
        assert!(matches!(
            db.create_ad(&orphan).await,
            Err(DbError::UnknownReference { .. })
        ));

        let duplicate: CreateUser = serde_json::from_value(json!({
            "username": author.username,
            "password": "unused",
        }))
        .unwrap();
        assert!(matches!(
            db.create_user(&duplicate, &HashedPassword::from_phc("unused".to_owned()))
                .await,
            Err(DbError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn location_create_is_get_or_create() {
        let Some(db) = database().await else { return };
        let name = unique("Perm");
        let content = LocationContent {
            name: location(&name),
        };

        let first = db.create_location(&content).await.unwrap();
        let second = db.create_location(&content).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(location_rows(&db, &[name.as_str()]).await, 1);
        assert!(db.list_locations().await.unwrap().contains(&first));

        let user = create_user(&db, &[name.as_str()]).await;
        assert_eq!(user.locations, [location(&name)]);
        assert_eq!(location_rows(&db, &[name.as_str()]).await, 1);

        let taken = db
            .create_location(&LocationContent {
                name: location(&unique("Ufa")),
            })
            .await
            .unwrap();
        assert!(matches!(
            db.update_location(taken.id, &content).await,
            Err(DbError::Conflict { .. })
        ));

        assert!(db.delete_location(first.id).await.unwrap());
        assert_eq!(db.fetch_location(first.id).await.unwrap(), None);
        let user = db.fetch_user(user.id).await.unwrap().unwrap();
        assert!(user.locations.is_empty());
    }

    #[tokio::test]
    async fn selection_items_are_replaced() {
        let Some(db) = database().await else { return };
        let owner = create_user(&db, &[]).await;
        let lamp = create_ad(&db, owner.id, 10, None, true).await;
        let chair = create_ad(&db, owner.id, 20, None, true).await;

        let content: SelectionContent = serde_json::from_value(json!({
            "name": "Favourites",
            "items": [chair.id, lamp.id, chair.id],
        }))
        .unwrap();
        let selection = db.create_selection(owner.id, &content).await.unwrap();
        assert_eq!(selection.owner_id, owner.id);
        assert_eq!(selection.items, [lamp.id, chair.id]);

        let content: SelectionContent =
            serde_json::from_value(json!({"name": "Lamps", "items": [lamp.id]})).unwrap();
        let selection = db
            .update_selection(selection.id, &content)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selection.items, [lamp.id]);

        let detail = db
            .fetch_selection_detail(selection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(detail.owner, owner.username);
        assert_eq!(detail.items, [lamp]);

        assert!(db.delete_ad(chair.id).await.unwrap());
        assert!(db.delete_selection(selection.id).await.unwrap());
        assert_eq!(db.fetch_selection(selection.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn image_of_missing_ad_is_not_set() {
        let Some(db) = database().await else { return };
        let author = create_user(&db, &[]).await;
        let ad = create_ad(&db, author.id, 10, None, true).await;

        let image = db
            .set_ad_image(ad.id, Some("/media/ad_images/x.png"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.image.as_deref(), Some("/media/ad_images/x.png"));

        assert!(db.delete_ad(ad.id).await.unwrap());
        assert_eq!(db.set_ad_image(ad.id, None).await.unwrap(), None);
        assert!(!db.delete_ad(ad.id).await.unwrap());
    }
}
