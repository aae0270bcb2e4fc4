//! Provider endpoint wrappers.
//!
//! Thin helpers that turn catalog questions ("details for these ids",
//! "prices in these countries") into [`FetchTarget`]s. Payloads come back
//! as raw JSON; turning them into records is the producer's job.

use serde_json::Value;

use crate::client::{FetchClient, FetchTarget, Fetched, Params};
use crate::error::FetchError;
use crate::transport::{HttpTransport, Transport};

/// Products per listing page.
const LISTING_PAGE_SIZE: u32 = 50;

/// Base URLs of the provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiHosts {
    /// Product details and paginated listing.
    pub details: String,
    /// Extended product details (downloads).
    pub extended: String,
    /// Batched multi-product prices.
    pub prices: String,
    /// Average ratings.
    pub ratings: String,
    /// Content-system builds.
    pub builds: String,
}

impl Default for ApiHosts {
    fn default() -> Self {
        Self {
            details: "https://api.gog.com/v2/games".to_owned(),
            extended: "https://api.gog.com/products".to_owned(),
            prices: "https://api.gog.com/products/prices".to_owned(),
            ratings: "https://reviews.gog.com/v1/products".to_owned(),
            builds: "https://content-system.gog.com/products".to_owned(),
        }
    }
}

/// Typed access to the provider's catalog endpoints.
#[derive(Debug, Clone)]
pub struct CatalogApi<T = HttpTransport> {
    client: FetchClient<T>,
    hosts: ApiHosts,
    locale: String,
}

impl<T: Transport> CatalogApi<T> {
    /// Wrap a fetch client.
    pub fn new(client: FetchClient<T>, hosts: ApiHosts, locale: &str) -> Self {
        Self {
            client,
            hosts,
            locale: locale.to_owned(),
        }
    }

    /// The underlying fetch client.
    pub const fn client(&self) -> &FetchClient<T> {
        &self.client
    }

    /// Details of one product.
    ///
    /// # Errors
    ///
    /// [`FetchError::EntityNotFound`] if the provider does not know `id`,
    /// otherwise any classified fetch error.
    pub async fn product(&self, id: i64) -> Result<Value, FetchError> {
        let target = FetchTarget::One {
            url: format!("{}/{id}", self.hosts.details),
            params: self.locale_params(),
        };
        self.one(target).await.map_err(|e| e.for_entity(id))
    }

    /// Details of several products, paired with their ids in input order.
    pub async fn products(&self, ids: &[i64]) -> Vec<(i64, Result<Value, FetchError>)> {
        let target = FetchTarget::Urls {
            urls: ids
                .iter()
                .map(|id| format!("{}/{id}", self.hosts.details))
                .collect(),
            params: self.locale_params(),
        };
        pair_with_ids(ids, self.many(target).await)
    }

    /// Extended details (downloads, installers) of several products.
    pub async fn extended_details(&self, ids: &[i64]) -> Vec<(i64, Result<Value, FetchError>)> {
        let mut params = self.locale_params();
        params.push(("expand".to_owned(), "downloads".to_owned()));
        let target = FetchTarget::Urls {
            urls: ids
                .iter()
                .map(|id| format!("{}/{id}", self.hosts.extended))
                .collect(),
            params,
        };
        pair_with_ids(ids, self.many(target).await)
    }

    /// Verified-owner average ratings of several products.
    pub async fn ratings(&self, ids: &[i64]) -> Vec<(i64, Result<Value, FetchError>)> {
        let target = FetchTarget::Urls {
            urls: ids
                .iter()
                .map(|id| format!("{}/{id}/averageRating", self.hosts.ratings))
                .collect(),
            params: vec![("reviewer".to_owned(), "verified_owner".to_owned())],
        };
        pair_with_ids(ids, self.many(target).await)
    }

    /// Prices of `ids` in every country, one batched query per country.
    ///
    /// Results are paired with their country code in input order.
    pub async fn prices(
        &self,
        ids: &[i64],
        countries: &[String],
    ) -> Vec<(String, Result<Value, FetchError>)> {
        let joined = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let param_sets = countries
            .iter()
            .map(|country| {
                vec![
                    ("ids".to_owned(), joined.clone()),
                    ("countryCode".to_owned(), country.clone()),
                ]
            })
            .collect();
        let target = FetchTarget::Batched {
            url: self.hosts.prices.clone(),
            param_sets,
        };
        countries
            .iter()
            .cloned()
            .zip(self.many(target).await)
            .collect()
    }

    /// Builds of one product on one operating system.
    ///
    /// # Errors
    ///
    /// [`FetchError::EntityNotFound`] if the product has no builds
    /// endpoint, otherwise any classified fetch error.
    pub async fn builds(&self, product_id: i64, os: &str) -> Result<Value, FetchError> {
        let target = FetchTarget::One {
            url: format!("{}/{product_id}/os/{os}/builds", self.hosts.builds),
            params: vec![("generation".to_owned(), "2".to_owned())],
        };
        self.one(target).await.map_err(|e| e.for_entity(product_id))
    }

    /// Number of pages in the product listing.
    ///
    /// # Errors
    ///
    /// Any classified fetch error, or [`FetchError::Unknown`] if the
    /// listing carries no page count.
    pub async fn catalog_page_count(&self) -> Result<u32, FetchError> {
        let target = FetchTarget::One {
            url: self.hosts.details.clone(),
            params: self.listing_params(1),
        };
        let listing = self.one(target).await?;
        listing
            .get("pages")
            .and_then(Value::as_u64)
            .and_then(|pages| u32::try_from(pages).ok())
            .ok_or_else(|| FetchError::Unknown("product listing has no page count".to_owned()))
    }

    /// Every product id in the listing, walking all pages.
    ///
    /// # Errors
    ///
    /// Fails with the first page's error if any page cannot be fetched;
    /// a partial listing is never returned.
    pub async fn product_ids(&self) -> Result<Vec<i64>, FetchError> {
        let pages = self.catalog_page_count().await?;
        let target = FetchTarget::Batched {
            url: self.hosts.details.clone(),
            param_sets: (1..=pages).map(|page| self.listing_params(page)).collect(),
        };
        let mut ids = Vec::new();
        for page in self.many(target).await {
            ids.extend(listing_ids(&page?));
        }
        Ok(ids)
    }

    fn locale_params(&self) -> Params {
        vec![("locale".to_owned(), self.locale.clone())]
    }

    fn listing_params(&self, page: u32) -> Params {
        let mut params = self.locale_params();
        params.push(("limit".to_owned(), LISTING_PAGE_SIZE.to_string()));
        params.push(("page".to_owned(), page.to_string()));
        params
    }

    async fn one(&self, target: FetchTarget) -> Result<Value, FetchError> {
        match self.client.fetch_json(target).await? {
            Fetched::One(value) => Ok(value),
            Fetched::Many(_) => Err(FetchError::Unknown(
                "expected a single response body".to_owned(),
            )),
        }
    }

    async fn many(&self, target: FetchTarget) -> Vec<Result<Value, FetchError>> {
        match self.client.fetch_json(target).await {
            Ok(fetched) => fetched.into_many(),
            Err(err) => vec![Err(err)],
        }
    }
}

/// Pair per-URL outcomes with the ids they were requested for.
fn pair_with_ids(
    ids: &[i64],
    outcomes: Vec<Result<Value, FetchError>>,
) -> Vec<(i64, Result<Value, FetchError>)> {
    ids.iter()
        .copied()
        .zip(outcomes)
        .map(|(id, outcome)| (id, outcome.map_err(|e| e.for_entity(id))))
        .collect()
}

/// Product ids on one listing page.
fn listing_ids(page: &Value) -> Vec<i64> {
    page.pointer("/_embedded/items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.get("id")
                        .or_else(|| item.pointer("/_embedded/product/id"))
                        .and_then(Value::as_i64)
                })
                .collect()
        })
        .unwrap_or_default()
}
