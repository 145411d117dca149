use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{
        AttributeUsage, CatalogRepo, CatalogWriteRepo, ImportSummary, PreparedOffer, RepoError,
    },
    domain::entities::{
        AttributeRecord, CatalogStats, ProductRecord, ValueCount, ValueMembership, ValueStats,
    },
    domain::filters::{ActiveFilters, canonical_value},
    domain::types::{ProductId, ProductSort},
};

use super::{
    PostgresRepositories,
    util::{convert_count, map_sqlx_error},
};

#[derive(sqlx::FromRow)]
struct AttributeRow {
    id: i64,
    name: String,
    slug: String,
    is_filterable: bool,
    sort_order: i32,
}

impl From<AttributeRow> for AttributeRecord {
    fn from(row: AttributeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            is_filterable: row.is_filterable,
            sort_order: row.sort_order,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    price: Decimal,
    description: Option<String>,
}

impl From<ProductRow> for ProductRecord {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            description: row.description,
        }
    }
}

/// One stored spelling of an attribute value with its linked products.
#[derive(sqlx::FromRow)]
struct ValueRow {
    slug: String,
    name: String,
    value: String,
    product_ids: Vec<i64>,
    min_price: Decimal,
    max_price: Decimal,
}

#[derive(sqlx::FromRow)]
struct ValueIdRow {
    id: i64,
    slug: String,
    value: String,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    count: i64,
    min_price: Option<Decimal>,
    max_price: Option<Decimal>,
}

/// Stored spellings merged under one canonical value.
///
/// Postgres never computes canonical values: its `LOWER` follows the
/// database collation while matching everywhere else goes through
/// [`canonical_value`], so grouping happens here.
#[derive(Debug)]
struct ValueGroup {
    name: String,
    display: String,
    product_ids: BTreeSet<ProductId>,
    min_price: Decimal,
    max_price: Decimal,
}

type ValueGroups = BTreeMap<(String, String), ValueGroup>;

fn group_values(rows: Vec<ValueRow>) -> ValueGroups {
    let mut groups = ValueGroups::new();
    for row in rows {
        let display = row.value.trim().to_string();
        let key = (row.slug, canonical_value(&row.value));
        match groups.get_mut(&key) {
            Some(group) => {
                if display < group.display {
                    group.display = display;
                }
                group.product_ids.extend(row.product_ids);
                group.min_price = group.min_price.min(row.min_price);
                group.max_price = group.max_price.max(row.max_price);
            }
            None => {
                groups.insert(
                    key,
                    ValueGroup {
                        name: row.name,
                        display,
                        product_ids: row.product_ids.into_iter().collect(),
                        min_price: row.min_price,
                        max_price: row.max_price,
                    },
                );
            }
        }
    }
    groups
}

impl PostgresRepositories {
    fn push_sort(qb: &mut QueryBuilder<'_, Postgres>, sort: ProductSort) {
        qb.push(match sort {
            ProductSort::IdAsc => " ORDER BY id ASC",
            ProductSort::PriceAsc => " ORDER BY price ASC, id ASC",
            ProductSort::PriceDesc => " ORDER BY price DESC, id DESC",
        });
    }

    /// Linked values grouped by (slug, canonical value), optionally limited
    /// to the given attributes.
    async fn value_groups(&self, slugs: Option<&[String]>) -> Result<ValueGroups, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT \
                p.slug, \
                p.name, \
                pv.value, \
                ARRAY_AGG(DISTINCT pp.product_id ORDER BY pp.product_id) AS product_ids, \
                MIN(pr.price) AS min_price, \
                MAX(pr.price) AS max_price \
             FROM parameters p \
             INNER JOIN parameter_values pv ON pv.parameter_id = p.id \
             INNER JOIN product_parameters pp ON pp.parameter_value_id = pv.id \
             INNER JOIN products pr ON pr.id = pp.product_id",
        );
        if let Some(slugs) = slugs {
            qb.push(" WHERE p.slug = ANY(");
            qb.push_bind(slugs.to_vec());
            qb.push(")");
        }
        qb.push(" GROUP BY p.slug, p.name, pv.id, pv.value");

        let rows = qb
            .build_query_as::<ValueRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(group_values(rows))
    }
}

#[async_trait]
impl CatalogRepo for PostgresRepositories {
    async fn list_attributes(&self) -> Result<Vec<AttributeRecord>, RepoError> {
        let rows = sqlx::query_as::<_, AttributeRow>(
            r#"
            SELECT id, name, slug, is_filterable, sort_order
            FROM parameters
            WHERE is_filterable
            ORDER BY sort_order ASC, name ASC, slug ASC
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(AttributeRecord::from).collect())
    }

    async fn all_product_ids(&self) -> Result<Vec<ProductId>, RepoError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM products ORDER BY id")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn count_products(&self) -> Result<u64, RepoError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        convert_count(count)
    }

    async fn resolve_filters(&self, filters: &ActiveFilters) -> Result<Vec<ProductId>, RepoError> {
        let wanted: Vec<(String, BTreeSet<String>)> = filters
            .iter()
            .map(|(slug, _)| (slug.to_string(), filters.canonical_values(slug)))
            .filter(|(_, values)| !values.is_empty())
            .collect();
        if wanted.is_empty() {
            return self.all_product_ids().await;
        }

        let slugs: Vec<String> = wanted.iter().map(|(slug, _)| slug.clone()).collect();
        let stored = sqlx::query_as::<_, ValueIdRow>(
            r#"
            SELECT pv.id, p.slug, pv.value
            FROM parameters p
            INNER JOIN parameter_values pv ON pv.parameter_id = p.id
            WHERE p.slug = ANY($1)
            "#,
        )
        .bind(&slugs)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut value_ids: HashMap<&str, Vec<i64>> = HashMap::new();
        for row in &stored {
            let matches = wanted.iter().any(|(slug, values)| {
                *slug == row.slug && values.contains(&canonical_value(&row.value))
            });
            if matches {
                value_ids.entry(row.slug.as_str()).or_default().push(row.id);
            }
        }

        let mut qb = QueryBuilder::<Postgres>::new("");
        for (position, (slug, _)) in wanted.iter().enumerate() {
            let Some(ids) = value_ids.get(slug.as_str()) else {
                return Ok(Vec::new());
            };
            if position > 0 {
                qb.push(" INTERSECT ");
            }
            qb.push("SELECT product_id FROM product_parameters WHERE parameter_value_id = ANY(");
            qb.push_bind(ids.clone());
            qb.push(")");
        }

        qb.build_query_scalar::<i64>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn value_counts(
        &self,
        slugs: &[String],
        scope: Option<&[ProductId]>,
    ) -> Result<Vec<ValueCount>, RepoError> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }

        let scope: Option<HashSet<ProductId>> = scope.map(|ids| ids.iter().copied().collect());
        let groups = self.value_groups(Some(slugs)).await?;

        Ok(groups
            .into_iter()
            .map(|((slug, canonical), group)| {
                let count = match scope.as_ref() {
                    None => group.product_ids.len(),
                    Some(scope) => group
                        .product_ids
                        .iter()
                        .filter(|id| scope.contains(*id))
                        .count(),
                };
                ValueCount {
                    slug,
                    canonical,
                    display: group.display,
                    count: count as u64,
                }
            })
            .collect())
    }

    async fn list_products(
        &self,
        scope: Option<&[ProductId]>,
        sort: ProductSort,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ProductRecord>, RepoError> {
        let limit = i64::try_from(limit)
            .map_err(|_| RepoError::from_persistence("limit exceeds supported range"))?;
        let offset = i64::try_from(offset)
            .map_err(|_| RepoError::from_persistence("offset exceeds supported range"))?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, name, price, description FROM products",
        );
        if let Some(ids) = scope {
            qb.push(" WHERE id = ANY(");
            qb.push_bind(ids.to_vec());
            qb.push(")");
        }
        Self::push_sort(&mut qb, sort);
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb
            .build_query_as::<ProductRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ProductRecord::from).collect())
    }

    async fn value_memberships(&self) -> Result<Vec<ValueMembership>, RepoError> {
        let groups = self.value_groups(None).await?;

        Ok(groups
            .into_iter()
            .map(|((slug, canonical), group)| ValueMembership {
                slug,
                canonical,
                display: group.display,
                product_ids: group.product_ids.into_iter().collect(),
                min_price: group.min_price,
                max_price: group.max_price,
            })
            .collect())
    }

    async fn catalog_stats(&self) -> Result<CatalogStats, RepoError> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT COUNT(*) AS count, MIN(price) AS min_price, MAX(price) AS max_price FROM products",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(CatalogStats {
            total_products: convert_count(row.count)?,
            min_price: row.min_price,
            max_price: row.max_price,
        })
    }

    async fn value_stats(&self, slug: &str, value: &str) -> Result<ValueStats, RepoError> {
        let slugs = [slug.to_string()];
        let group = self
            .value_groups(Some(&slugs))
            .await?
            .remove(&(slug.to_string(), canonical_value(value)));

        Ok(match group {
            Some(group) => ValueStats {
                count: group.product_ids.len() as u64,
                min_price: Some(group.min_price),
                max_price: Some(group.max_price),
            },
            None => ValueStats {
                count: 0,
                min_price: None,
                max_price: None,
            },
        })
    }

    async fn known_values(&self, slug: &str) -> Result<Vec<String>, RepoError> {
        let slugs = [slug.to_string()];
        let mut values: Vec<String> = self
            .value_groups(Some(&slugs))
            .await?
            .into_values()
            .map(|group| group.display)
            .collect();
        values.sort();
        Ok(values)
    }

    async fn attribute_usage(&self, limit: u32) -> Result<Vec<AttributeUsage>, RepoError> {
        let mut usage: BTreeMap<String, (String, BTreeSet<ProductId>, u64)> = BTreeMap::new();
        for ((slug, _), group) in self.value_groups(None).await? {
            let entry = usage
                .entry(slug)
                .or_insert_with(|| (group.name.clone(), BTreeSet::new(), 0));
            entry.1.extend(group.product_ids);
            entry.2 += 1;
        }

        let mut rows: Vec<AttributeUsage> = usage
            .into_iter()
            .map(|(slug, (name, products, values))| AttributeUsage {
                slug,
                name,
                products: products.len() as u64,
                values,
            })
            .collect();
        rows.sort_by(|a, b| b.products.cmp(&a.products).then_with(|| a.slug.cmp(&b.slug)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.ping().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl CatalogWriteRepo for PostgresRepositories {
    async fn import_offers(&self, offers: &[PreparedOffer]) -> Result<ImportSummary, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let mut parameter_ids: HashMap<String, i64> = HashMap::new();
        let mut value_ids: HashMap<(i64, String), i64> = HashMap::new();
        let mut links = 0u64;

        for offer in offers {
            sqlx::query(
                r#"
                INSERT INTO products (id, name, price, description)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    price = EXCLUDED.price,
                    description = EXCLUDED.description,
                    updated_at = now()
                "#,
            )
            .bind(offer.id)
            .bind(&offer.name)
            .bind(offer.price)
            .bind(offer.description.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            sqlx::query("DELETE FROM product_parameters WHERE product_id = $1")
                .bind(offer.id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

            for parameter in &offer.parameters {
                let parameter_id = match parameter_ids.get(&parameter.slug) {
                    Some(id) => *id,
                    None => {
                        let id = sqlx::query_scalar::<_, i64>(
                            r#"
                            INSERT INTO parameters (name, slug)
                            VALUES ($1, $2)
                            ON CONFLICT (slug) DO UPDATE SET updated_at = now()
                            RETURNING id
                            "#,
                        )
                        .bind(&parameter.name)
                        .bind(&parameter.slug)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                        parameter_ids.insert(parameter.slug.clone(), id);
                        id
                    }
                };

                let value_key = (parameter_id, parameter.value.clone());
                let value_id = match value_ids.get(&value_key) {
                    Some(id) => *id,
                    None => {
                        let id = sqlx::query_scalar::<_, i64>(
                            r#"
                            INSERT INTO parameter_values (parameter_id, value)
                            VALUES ($1, $2)
                            ON CONFLICT (parameter_id, value) DO UPDATE SET updated_at = now()
                            RETURNING id
                            "#,
                        )
                        .bind(parameter_id)
                        .bind(&parameter.value)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                        value_ids.insert(value_key, id);
                        id
                    }
                };

                let inserted = sqlx::query(
                    r#"
                    INSERT INTO product_parameters (product_id, parameter_value_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(offer.id)
                .bind(value_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                links += inserted.rows_affected();
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(ImportSummary {
            products: offers.len() as u64,
            parameters: parameter_ids.len() as u64,
            values: value_ids.len() as u64,
            links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(slug: &str, value: &str, ids: &[i64], min: i64, max: i64) -> ValueRow {
        ValueRow {
            slug: slug.to_string(),
            name: slug.to_uppercase(),
            value: value.to_string(),
            product_ids: ids.to_vec(),
            min_price: Decimal::new(min, 0),
            max_price: Decimal::new(max, 0),
        }
    }

    #[test]
    fn spellings_merge_under_the_rust_canonical_value() {
        // Σ lowercases to ς at the end of a word, unlike a plain LOWER().
        let groups = group_values(vec![
            row("street", "ΟΔΟΣ", &[2], 40, 40),
            row("street", " οδος ", &[1, 3], 10, 90),
            row("color", "Red", &[1], 10, 10),
        ]);

        assert_eq!(groups.len(), 2);
        let street = groups
            .get(&("street".to_string(), canonical_value("Οδος")))
            .expect("street group");
        assert_eq!(street.display, "ΟΔΟΣ");
        assert_eq!(street.product_ids, BTreeSet::from([1, 2, 3]));
        assert_eq!(street.min_price, Decimal::new(10, 0));
        assert_eq!(street.max_price, Decimal::new(90, 0));
        assert!(groups.contains_key(&("color".to_string(), "red".to_string())));
    }
}
