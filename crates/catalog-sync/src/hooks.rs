//! Per-kind hook dispatch.
//!
//! Hooks never touch the store. Each one is a pure function of the
//! entity's current state, the values an update replaced, and the time of
//! the pass, and returns the [`Cascade`]s the engine should apply inside
//! the same transaction.
//!
//! | Kind | insert | update | checkout |
//! |---|---|---|---|
//! | Product | touch `checked_at` | touch `checked_at` | touch `checked_at` |
//! | Price | history snapshot if canonical | snapshot + `baseprice_change` | -- |
//! | Build | touch product, default access | touch product, default access | touch product |
//! | Patch, Installer | touch product | touch product | touch product |

use catalog_audit::EventDraft;
use catalog_types::audit::templates;
use catalog_types::{EntityHandle, EntityKind, FieldValue, PreviousValues, Record, Scalar};
use chrono::{DateTime, Utc};

/// Follow-up work produced by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cascade {
    /// Record extra events under `root`.
    Audit {
        /// Root entity of the batch.
        root: EntityHandle,
        /// Events in recording order.
        drafts: Vec<EventDraft>,
    },
    /// Save-or-update another entity.
    Upsert {
        /// Kind of the entity.
        kind: EntityKind,
        /// Desired state.
        record: Record,
    },
    /// Set a timestamp field of an existing entity to the pass time,
    /// without diffing, auditing or running its hooks.
    Touch {
        /// Entity to touch.
        target: EntityHandle,
        /// Timestamp field.
        field: &'static str,
    },
}

/// What a hook sees.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Entity the outcome is about.
    pub handle: &'a EntityHandle,
    /// Its state after the write, or its stored state on checkout.
    pub current: &'a Record,
    /// Time of the synchronization pass.
    pub now: DateTime<Utc>,
}

impl HookContext<'_> {
    fn reference(&self, field: &str) -> Option<EntityHandle> {
        self.current.get(field)?.as_ref_handle().cloned()
    }

    fn scalar(&self, field: &str) -> Option<&Scalar> {
        self.current.get(field)?.as_scalar()
    }

    fn value(&self, field: &str) -> FieldValue {
        self.current.get(field).cloned().unwrap_or(FieldValue::Null)
    }
}

/// Reactions of one entity kind to synchronization outcomes.
///
/// Every method defaults to doing nothing.
pub trait EntityHooks: Send + Sync {
    /// The entity was inserted.
    fn on_insert(&self, _ctx: &HookContext<'_>) -> Vec<Cascade> {
        Vec::new()
    }

    /// The entity was found identical to the record.
    fn on_checkout(&self, _ctx: &HookContext<'_>) -> Vec<Cascade> {
        Vec::new()
    }

    /// The entity was updated; `previous` holds the replaced values of
    /// exactly the changed fields.
    fn on_update(&self, _ctx: &HookContext<'_>, _previous: &PreviousValues) -> Vec<Cascade> {
        Vec::new()
    }
}

/// Hooks registered for `kind`.
pub fn hooks_for(kind: EntityKind) -> &'static dyn EntityHooks {
    match kind {
        EntityKind::Product => &ProductHooks,
        EntityKind::Price => &PriceHooks,
        EntityKind::Build => &BuildHooks,
        EntityKind::Patch | EntityKind::Installer => &ArtifactHooks,
        EntityKind::PriceHistory | EntityKind::DefaultAccessInfo => &NoHooks,
    }
}

/// Kinds without reactions.
#[derive(Debug, Clone, Copy)]
pub struct NoHooks;

impl EntityHooks for NoHooks {}

/// Marks a product as seen on every pass.
#[derive(Debug, Clone, Copy)]
pub struct ProductHooks;

impl ProductHooks {
    fn touch(ctx: &HookContext<'_>) -> Vec<Cascade> {
        vec![Cascade::Touch {
            target: ctx.handle.clone(),
            field: "checked_at",
        }]
    }
}

impl EntityHooks for ProductHooks {
    fn on_insert(&self, ctx: &HookContext<'_>) -> Vec<Cascade> {
        Self::touch(ctx)
    }

    fn on_checkout(&self, ctx: &HookContext<'_>) -> Vec<Cascade> {
        Self::touch(ctx)
    }

    fn on_update(&self, ctx: &HookContext<'_>, _previous: &PreviousValues) -> Vec<Cascade> {
        Self::touch(ctx)
    }
}

/// Price history and base-price audit.
#[derive(Debug, Clone, Copy)]
pub struct PriceHooks;

/// Priority of a country's canonical currency.
const CANONICAL_PRIORITY: i64 = 0;

impl PriceHooks {
    fn is_canonical(ctx: &HookContext<'_>) -> bool {
        ctx.scalar("priority").and_then(Scalar::as_int) == Some(CANONICAL_PRIORITY)
    }

    fn snapshot(ctx: &HookContext<'_>) -> Cascade {
        let record = Record::new()
            .with("product", ctx.value("product"))
            .with("country", ctx.value("country"))
            .with("recorded_at", ctx.now)
            .with("currency", ctx.value("currency"))
            .with("base_price", ctx.value("base_price"))
            .with("final_price", ctx.value("final_price"));
        Cascade::Upsert {
            kind: EntityKind::PriceHistory,
            record,
        }
    }
}

impl EntityHooks for PriceHooks {
    fn on_insert(&self, ctx: &HookContext<'_>) -> Vec<Cascade> {
        if Self::is_canonical(ctx) {
            vec![Self::snapshot(ctx)]
        } else {
            Vec::new()
        }
    }

    fn on_update(&self, ctx: &HookContext<'_>, previous: &PreviousValues) -> Vec<Cascade> {
        let mut cascades = Vec::new();
        let amount_changed = previous.contains("base_price") || previous.contains("final_price");
        if amount_changed && Self::is_canonical(ctx) {
            cascades.push(Self::snapshot(ctx));
        }

        if let (Some(old), Some(product)) = (previous.get("base_price"), ctx.reference("product")) {
            cascades.push(Cascade::Audit {
                drafts: vec![EventDraft::new(templates::BASEPRICE_CHANGE, vec![
                    FieldValue::from(product.key_string()),
                    FieldValue::from("base_price"),
                    ctx.value("country"),
                    old.clone(),
                    ctx.value("base_price"),
                    ctx.value("currency"),
                ])],
                root: product,
            });
        }
        cascades
    }
}

/// Refreshes the parent product's artifact timestamp.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactHooks;

impl ArtifactHooks {
    fn touch(ctx: &HookContext<'_>) -> Vec<Cascade> {
        ctx.reference("product")
            .map(|product| Cascade::Touch {
                target: product,
                field: "artifacts_checked_at",
            })
            .into_iter()
            .collect()
    }
}

impl EntityHooks for ArtifactHooks {
    fn on_insert(&self, ctx: &HookContext<'_>) -> Vec<Cascade> {
        Self::touch(ctx)
    }

    fn on_checkout(&self, ctx: &HookContext<'_>) -> Vec<Cascade> {
        Self::touch(ctx)
    }

    fn on_update(&self, ctx: &HookContext<'_>, _previous: &PreviousValues) -> Vec<Cascade> {
        Self::touch(ctx)
    }
}

/// Artifact touch plus the default access record of default builds.
#[derive(Debug, Clone, Copy)]
pub struct BuildHooks;

impl BuildHooks {
    fn default_access(ctx: &HookContext<'_>) -> Option<Cascade> {
        let is_default = ctx.scalar("is_default").and_then(Scalar::as_bool) == Some(true);
        let non_empty = |field: &str| {
            ctx.scalar(field)
                .and_then(Scalar::as_text)
                .is_some_and(|s| !s.is_empty())
        };
        if !is_default || !non_empty("client_id") || !non_empty("client_secret") {
            return None;
        }
        let record = Record::new()
            .with("product", ctx.reference("product")?)
            .with("platform", ctx.value("os"))
            .with("client_id", ctx.value("client_id"))
            .with("client_secret", ctx.value("client_secret"))
            .with("build", ctx.handle.clone());
        Some(Cascade::Upsert {
            kind: EntityKind::DefaultAccessInfo,
            record,
        })
    }

    fn cascades(ctx: &HookContext<'_>) -> Vec<Cascade> {
        let mut cascades = ArtifactHooks::touch(ctx);
        cascades.extend(Self::default_access(ctx));
        cascades
    }
}

impl EntityHooks for BuildHooks {
    fn on_insert(&self, ctx: &HookContext<'_>) -> Vec<Cascade> {
        Self::cascades(ctx)
    }

    fn on_checkout(&self, ctx: &HookContext<'_>) -> Vec<Cascade> {
        ArtifactHooks::touch(ctx)
    }

    fn on_update(&self, ctx: &HookContext<'_>, _previous: &PreviousValues) -> Vec<Cascade> {
        Self::cascades(ctx)
    }
}
