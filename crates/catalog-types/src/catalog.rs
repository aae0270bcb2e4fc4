//! Descriptor table for every entity kind.
//!
//! Built once, as statics. [`validate_all`] is run at start-up and by the
//! tests below so a malformed table never reaches the store.

use crate::audit::templates;
use crate::descriptor::{
    AuditScope, DescriptorError, EntityDescriptor, FieldDescriptor as F, FieldKind, MemberKind,
};
use crate::kind::EntityKind;
use crate::value::ScalarType;

const BOOL: FieldKind = FieldKind::Scalar(ScalarType::Bool);
const INT: FieldKind = FieldKind::Scalar(ScalarType::Int);
const DECIMAL: FieldKind = FieldKind::Scalar(ScalarType::Decimal);
const TEXT: FieldKind = FieldKind::Scalar(ScalarType::Text);
const TIMESTAMP: FieldKind = FieldKind::Scalar(ScalarType::Timestamp);
const TEXT_SET: FieldKind = FieldKind::Collection(MemberKind::Scalar(ScalarType::Text));
const PRODUCT: FieldKind = FieldKind::Reference(EntityKind::Product);
const BUILD: FieldKind = FieldKind::Reference(EntityKind::Build);
const PRODUCT_SET: FieldKind = FieldKind::Collection(MemberKind::Reference(EntityKind::Product));

static PRODUCT_FIELDS: [F; 25] = [
    F::key("id", INT),
    F::optional("title", TEXT),
    F::optional("slug", TEXT),
    F::optional("product_type", TEXT),
    F::optional("is_available_for_sale", BOOL),
    F::required("is_visible_in_catalog", BOOL).flag(true, templates::PRODUCT_INVISIBLE),
    F::optional("is_preorder", BOOL),
    F::optional("is_secret", BOOL),
    F::optional("in_development", BOOL),
    F::optional("is_installable", BOOL),
    F::required("initialized", BOOL).flag(false, templates::PRODUCT_INIT),
    F::optional("global_release_date", TIMESTAMP),
    F::optional("average_rating", DECIMAL),
    F::optional("review_count", INT),
    F::optional("developers", TEXT_SET),
    F::optional("publishers", TEXT_SET),
    F::optional("supported_os", TEXT_SET),
    F::optional("features", TEXT_SET),
    F::optional("tags", TEXT_SET),
    F::optional("localizations", TEXT_SET),
    F::optional("requires_products", PRODUCT_SET),
    F::optional("includes_products", PRODUCT_SET),
    F::optional("store_link", TEXT),
    F::optional("checked_at", TIMESTAMP).unaudited(),
    F::optional("artifacts_checked_at", TIMESTAMP).unaudited(),
];

/// Catalog products.
pub static PRODUCT_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Product,
    table: "products",
    fields: &PRODUCT_FIELDS,
    audit: AuditScope::Root,
};

static PRICE_FIELDS: [F; 6] = [
    F::key("product", PRODUCT),
    F::key("country", TEXT),
    // 0 is the country's canonical currency.
    F::key("priority", INT),
    F::required("currency", TEXT),
    F::required("base_price", DECIMAL),
    F::optional("final_price", DECIMAL),
];

/// Per-country prices, audited under their product.
pub static PRICE_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Price,
    table: "prices",
    fields: &PRICE_FIELDS,
    audit: AuditScope::Child {
        root_field: "product",
    },
};

static PRICE_HISTORY_FIELDS: [F; 6] = [
    F::key("product", PRODUCT),
    F::key("country", TEXT),
    F::key("recorded_at", TIMESTAMP),
    F::required("currency", TEXT),
    F::required("base_price", DECIMAL),
    F::optional("final_price", DECIMAL),
];

/// Canonical price snapshots.
pub static PRICE_HISTORY_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::PriceHistory,
    table: "price_history",
    fields: &PRICE_HISTORY_FIELDS,
    audit: AuditScope::None,
};

static BUILD_FIELDS: [F; 13] = [
    F::key("id", INT),
    F::required("product", PRODUCT),
    F::required("os", TEXT),
    F::optional("branch", TEXT),
    F::optional("version", TEXT),
    F::optional("tags", TEXT_SET),
    F::optional("public", BOOL),
    F::optional("date_published", TIMESTAMP),
    F::optional("generation", INT),
    F::optional("legacy_build_id", INT),
    F::optional("is_default", BOOL),
    F::optional("client_id", TEXT),
    F::optional("client_secret", TEXT),
];

/// Published builds.
pub static BUILD_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Build,
    table: "builds",
    fields: &BUILD_FIELDS,
    audit: AuditScope::None,
};

static PATCH_FIELDS: [F; 5] = [
    F::key("id", INT),
    F::required("product", PRODUCT),
    F::optional("from_build", BUILD),
    F::required("to_build", BUILD),
    F::optional("size", INT),
];

/// Binary patches between builds.
pub static PATCH_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Patch,
    table: "patches",
    fields: &PATCH_FIELDS,
    audit: AuditScope::None,
};

static INSTALLER_FIELDS: [F; 7] = [
    F::key("id", TEXT),
    F::required("product", PRODUCT),
    F::required("os", TEXT),
    F::optional("language", TEXT),
    F::optional("version", TEXT),
    F::optional("total_size", INT),
    F::optional("files", TEXT_SET),
];

/// Downloadable installers.
pub static INSTALLER_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Installer,
    table: "installers",
    fields: &INSTALLER_FIELDS,
    audit: AuditScope::None,
};

static DEFAULT_ACCESS_INFO_FIELDS: [F; 5] = [
    F::key("product", PRODUCT),
    F::key("platform", TEXT),
    F::required("client_id", TEXT),
    F::required("client_secret", TEXT),
    F::required("build", BUILD),
];

/// Credentials of a product's default build, per platform.
pub static DEFAULT_ACCESS_INFO_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::DefaultAccessInfo,
    table: "default_access_info",
    fields: &DEFAULT_ACCESS_INFO_FIELDS,
    audit: AuditScope::None,
};

impl EntityKind {
    /// The static descriptor of this kind.
    pub const fn descriptor(self) -> &'static EntityDescriptor {
        match self {
            Self::Product => &PRODUCT_DESCRIPTOR,
            Self::Price => &PRICE_DESCRIPTOR,
            Self::PriceHistory => &PRICE_HISTORY_DESCRIPTOR,
            Self::Build => &BUILD_DESCRIPTOR,
            Self::Patch => &PATCH_DESCRIPTOR,
            Self::Installer => &INSTALLER_DESCRIPTOR,
            Self::DefaultAccessInfo => &DEFAULT_ACCESS_INFO_DESCRIPTOR,
        }
    }
}

/// Validate every descriptor, including cross-kind reference rules.
pub fn validate_all() -> Result<(), DescriptorError> {
    for kind in EntityKind::ALL {
        let descriptor = kind.descriptor();
        descriptor.validate()?;
        for field in descriptor.fields {
            let Some(target) = field.kind.reference_target() else {
                continue;
            };
            if target.descriptor().key_fields().count() != 1 {
                return Err(DescriptorError::CompositeReference {
                    kind,
                    field: field.name,
                    target,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldValue, Record};

    #[test]
    fn built_in_descriptors_are_valid() {
        assert_eq!(validate_all(), Ok(()));
    }

    #[test]
    fn descriptors_match_their_kind() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.descriptor().kind, kind);
        }
    }

    #[test]
    fn key_fields_come_first() {
        for kind in EntityKind::ALL {
            let fields = kind.descriptor().fields;
            let keys = kind.descriptor().key_fields().count();
            assert!(fields.iter().take(keys).all(|f| f.primary_key), "{kind}");
        }
    }

    #[test]
    fn price_audits_under_its_product() {
        let record = Record::new()
            .with("product", 7_i64)
            .with("country", "US")
            .with("priority", 0_i64);
        let handle = PRICE_DESCRIPTOR.handle_of(&record);
        let root = handle
            .as_ref()
            .and_then(|h| PRICE_DESCRIPTOR.audit_root(h, &record))
            .map(|h| h.key_string());
        assert_eq!(root.as_deref(), Some("7"));
    }

    #[test]
    fn product_flags_have_defaults() {
        let visible = PRODUCT_DESCRIPTOR.field("is_visible_in_catalog");
        assert_eq!(
            visible.and_then(|f| f.insert_default()),
            Some(FieldValue::from(true))
        );
        assert!(PRODUCT_DESCRIPTOR.field("checked_at").is_some_and(|f| !f.audited));
    }
}
