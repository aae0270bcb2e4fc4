//! Record producers.
//!
//! Turn provider payloads into flat records: one field name to one value,
//! with nested documents already resolved. Fields the payload does not
//! carry are left out of the record so they are never diffed. This holds
//! for collections too: an absent list is left out, an empty one is an
//! empty set.

use std::collections::BTreeSet;
use std::str::FromStr;

use catalog_types::{FieldValue, Record, Scalar};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// Minor units per major unit in provider price strings (`"999 USD"`).
const PRICE_SCALE: u32 = 2;

/// Errors raised while reading a payload.
#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    /// A required value is absent.
    #[error("payload has no {0}")]
    MissingField(&'static str),

    /// A price string is not `"<minor units> <currency>"`.
    #[error("malformed amount: {0}")]
    BadAmount(String),

    /// A timestamp is not RFC 3339.
    #[error("malformed timestamp: {0}")]
    BadTimestamp(String),
}

/// Records produced from one product details payload.
///
/// Reference edges are split off so every product of a pass can be
/// stored before any edge between them is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecords {
    /// Product id.
    pub id: i64,
    /// Scalar and collection fields.
    pub node: Record,
    /// `id` plus whichever of the edge fields the payload carries.
    pub edges: Record,
}

/// Reference-collection fields of a product.
const EDGE_FIELDS: [&str; 2] = ["requires_products", "includes_products"];

impl ProductRecords {
    /// Every product id named by an edge field.
    pub fn edge_targets(&self) -> BTreeSet<i64> {
        EDGE_FIELDS
            .iter()
            .filter_map(|field| self.edges.get(field))
            .filter_map(FieldValue::as_set)
            .flatten()
            .filter_map(member_id)
            .collect()
    }

    /// Edges ready to write once every product in `stored` exists.
    ///
    /// An edge field naming a product outside `stored` is left out
    /// whole. Writing it would dangle, and trimming it would record a
    /// removal the payload never made.
    pub fn edges_for(&self, stored: &BTreeSet<i64>) -> Record {
        let mut edges = self.edges.clone();
        for field in EDGE_FIELDS {
            let complete = edges
                .get(field)
                .and_then(FieldValue::as_set)
                .is_none_or(|members| {
                    members
                        .iter()
                        .all(|m| member_id(m).is_some_and(|id| stored.contains(&id)))
                });
            if !complete {
                edges.remove(field);
            }
        }
        edges
    }
}

fn member_id(member: &FieldValue) -> Option<i64> {
    member.as_scalar().and_then(Scalar::as_int)
}

/// Product record from a details payload.
///
/// # Errors
///
/// Fails if the payload carries no product id or has a malformed
/// timestamp or rating.
pub fn product_records(payload: &Value) -> Result<ProductRecords, ProduceError> {
    let product = payload
        .pointer("/_embedded/product")
        .ok_or(ProduceError::MissingField("_embedded.product"))?;
    let id = product
        .get("id")
        .and_then(Value::as_i64)
        .ok_or(ProduceError::MissingField("_embedded.product.id"))?;

    let mut node = Record::new().with("id", id);
    if let Some(title) = product.get("title").and_then(Value::as_str) {
        node.set("title", title.trim());
    }
    if let Some(kind) = payload.pointer("/_embedded/productType").and_then(Value::as_str) {
        node.set("product_type", kind);
    }
    for (field, key) in [
        ("is_available_for_sale", "isAvailableForSale"),
        ("is_visible_in_catalog", "isVisibleInCatalog"),
        ("is_preorder", "isPreorder"),
        ("is_secret", "isSecret"),
        ("is_installable", "isInstallable"),
    ] {
        if let Some(flag) = product.get(key).and_then(Value::as_bool) {
            node.set(field, flag);
        }
    }
    if let Some(active) = payload.pointer("/inDevelopment/active").and_then(Value::as_bool) {
        node.set("in_development", active);
    }
    if let Some(date) = product.get("globalReleaseDate").and_then(Value::as_str) {
        node.set("global_release_date", parse_timestamp(date)?);
    }
    if let Some(rating) = payload.get("averageRating").filter(|v| v.is_number()) {
        let text = rating.to_string();
        let rating =
            Decimal::from_str(&text).map_err(|e| ProduceError::BadAmount(format!("{text}: {e}")))?;
        node.set("average_rating", rating);
    }
    if let Some(link) = payload.pointer("/_links/store/href").and_then(Value::as_str) {
        node.set("store_link", link);
    }

    let embedded = payload.get("_embedded");
    for (field, key, pointer) in [
        ("developers", "developers", "/name"),
        ("publishers", "publisher", "/name"),
        ("supported_os", "supportedOperatingSystems", "/operatingSystem/name"),
        ("features", "features", "/name"),
        ("tags", "tags", "/name"),
        ("localizations", "localizations", "/_embedded/language/code"),
    ] {
        if let Some(values) = names(embedded, key, pointer) {
            node.set(field, values);
        }
    }

    let mut edges = Record::new().with("id", id);
    for (field, link) in [
        ("requires_products", "requiresGames"),
        ("includes_products", "includesGames"),
    ] {
        if let Some(ids) = linked_ids(payload, link) {
            edges.set(field, ids);
        }
    }

    Ok(ProductRecords { id, node, edges })
}

/// Price records from one country's batched prices payload.
///
/// Each item's first price is the country's canonical currency and gets
/// priority 0; the others follow in payload order.
///
/// # Errors
///
/// Fails on an item without a product link or with a malformed amount.
pub fn price_records(country: &str, payload: &Value) -> Result<Vec<Record>, ProduceError> {
    let Some(items) = payload.pointer("/_embedded/items").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for item in items {
        let product = item
            .pointer("/_links/self/href")
            .and_then(Value::as_str)
            .and_then(id_from_href)
            .ok_or(ProduceError::MissingField("_links.self.href"))?;
        let prices = item
            .pointer("/_embedded/prices")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice);

        for (priority, price) in (0_i64..).zip(prices) {
            let currency = price
                .pointer("/currency/code")
                .and_then(Value::as_str)
                .ok_or(ProduceError::MissingField("currency.code"))?;
            let base = price
                .get("basePrice")
                .and_then(Value::as_str)
                .ok_or(ProduceError::MissingField("basePrice"))?;
            let mut record = Record::new()
                .with("product", product)
                .with("country", country)
                .with("priority", priority)
                .with("currency", currency)
                .with("base_price", parse_amount(base)?);
            if let Some(fin) = price.get("finalPrice").and_then(Value::as_str) {
                record.set("final_price", parse_amount(fin)?);
            }
            records.push(record);
        }
    }
    Ok(records)
}

/// Parse a provider amount such as `"999 USD"` (minor units, then the
/// currency code) into `9.99`.
///
/// # Errors
///
/// Returns [`ProduceError::BadAmount`] if the leading token is not an
/// integer.
pub fn parse_amount(text: &str) -> Result<Decimal, ProduceError> {
    let minor = text
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<i64>().ok())
        .ok_or_else(|| ProduceError::BadAmount(text.to_owned()))?;
    Ok(Decimal::new(minor, PRICE_SCALE))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, ProduceError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ProduceError::BadTimestamp(format!("{text}: {e}")))
}

/// Trimmed strings found at `pointer` inside each element of
/// `embedded[key]`, repeats kept. A single object counts as a
/// one-element list. `None` when the payload has no such key.
fn names(embedded: Option<&Value>, key: &str, pointer: &str) -> Option<FieldValue> {
    let items: Vec<&Value> = match embedded?.get(key)? {
        Value::Array(items) => items.iter().collect(),
        single @ Value::Object(_) => vec![single],
        Value::Null => return None,
        _ => Vec::new(),
    };
    let names = items
        .into_iter()
        .filter_map(|item| item.pointer(pointer).and_then(Value::as_str))
        .map(|name| FieldValue::from(name.trim()))
        .collect();
    Some(FieldValue::Set(names))
}

/// Product ids linked under `_links[link]`. `None` when the link is absent.
fn linked_ids(payload: &Value, link: &str) -> Option<FieldValue> {
    let links = payload.get("_links")?.get(link)?.as_array()?;
    let ids = links
        .iter()
        .filter_map(|l| l.get("href").and_then(Value::as_str))
        .filter_map(id_from_href)
        .map(FieldValue::from)
        .collect();
    Some(FieldValue::Set(ids))
}

/// Last numeric path segment of a provider URL.
fn id_from_href(href: &str) -> Option<i64> {
    href.split(['?', '#'])
        .next()?
        .rsplit('/')
        .find_map(|segment| segment.parse::<i64>().ok())
}
