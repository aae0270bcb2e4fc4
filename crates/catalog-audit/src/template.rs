//! Templates and the template registry.
//!
//! A template names an operation class, an ordered list of argument
//! slots, and a format string with positional `{n}` placeholders. The
//! format is checked against the slots when the template is registered;
//! rendering never fails on a registered template.

use std::collections::BTreeMap;

use catalog_types::audit::templates;
use catalog_types::{ChangeEvent, Operation};
use regex::{Captures, Regex};

use crate::error::AuditError;

/// Matches `{0}`, `{12}`, ...
const PLACEHOLDER_PATTERN: &str = r"\{(\d+)\}";

/// Separator used when an event without a template is rendered.
const PLAIN_SEPARATOR: &str = ", ";

/// A validated rendering template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    operation: Operation,
    slots: Vec<String>,
    format: String,
}

impl Template {
    /// Template name, as stored on events.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation class.
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Semantic names of the argument slots, in order.
    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    /// Raw format string.
    pub fn format(&self) -> &str {
        &self.format
    }
}

/// All known templates, by name.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    placeholder: Regex,
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Pattern`] if the placeholder pattern fails to
    /// compile.
    pub fn new() -> Result<Self, AuditError> {
        Ok(Self {
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
            templates: BTreeMap::new(),
        })
    }

    /// Registry holding the built-in catalog templates.
    ///
    /// # Errors
    ///
    /// Returns an error if any built-in template is malformed.
    pub fn builtin() -> Result<Self, AuditError> {
        let mut registry = Self::new()?;
        registry.register(
            templates::PRODUCT_ADD,
            Operation::Added,
            &["product_id"],
            "Added Product ID {0}",
        )?;
        registry.register(
            templates::PRODUCT_INIT,
            Operation::Changed,
            &["product_id"],
            "Product {0} initialized",
        )?;
        registry.register(
            templates::PRODUCT_INVISIBLE,
            Operation::Removed,
            &["product_id"],
            "Set Product {0} invisible",
        )?;
        registry.register(
            templates::DETAIL_CHANGE,
            Operation::Changed,
            &["product_id", "attr_name", "old_str", "new_str"],
            "Changed {1} – {2} › {3}",
        )?;
        registry.register(
            templates::SET_ADD,
            Operation::Added,
            &["product_id", "attr_name", "value"],
            "Changed {1} – added {2}",
        )?;
        registry.register(
            templates::SET_REMOVE,
            Operation::Removed,
            &["product_id", "attr_name", "value"],
            "Changed {1} – removed {2}",
        )?;
        registry.register(
            templates::BASEPRICE_CHANGE,
            Operation::Changed,
            &["product_id", "attr_name", "country", "old_num", "new_num", "currency"],
            "Changed {1} in {2} – {3} › {4} {5}",
        )?;
        Ok(registry)
    }

    /// Validate and add a template.
    ///
    /// A format is rejected when it holds more placeholders than there are
    /// slots, or when a placeholder index has no slot.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::TemplateFormat`] for a malformed format and
    /// [`AuditError::DuplicateTemplate`] if the name is taken.
    pub fn register(
        &mut self,
        name: &str,
        operation: Operation,
        slots: &[&str],
        format: &str,
    ) -> Result<&Template, AuditError> {
        if self.templates.contains_key(name) {
            return Err(AuditError::DuplicateTemplate(name.to_owned()));
        }
        self.check_format(name, slots.len(), format)?;

        let template = Template {
            name: name.to_owned(),
            operation,
            slots: slots.iter().map(|s| (*s).to_owned()).collect(),
            format: format.to_owned(),
        };
        tracing::debug!(template = name, %operation, "Registered template");
        Ok(self.templates.entry(name.to_owned()).or_insert(template))
    }

    /// Look up a template.
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Names of all registered templates.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Substitute `args` into the named template.
    ///
    /// Missing arguments render as empty strings; surplus arguments are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::UnknownTemplate`] if `name` is not registered.
    pub fn render(&self, name: &str, args: &[String]) -> Result<String, AuditError> {
        let template = self
            .get(name)
            .ok_or_else(|| AuditError::UnknownTemplate(name.to_owned()))?;
        let rendered = self
            .placeholder
            .replace_all(&template.format, |caps: &Captures<'_>| {
                caps.get(1)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .and_then(|index| args.get(index))
                    .cloned()
                    .unwrap_or_default()
            });
        Ok(rendered.into_owned())
    }

    /// Render a stored event. Events without a template render as their
    /// arguments joined by `, `.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::UnknownTemplate`] if the event names a
    /// template that is not registered.
    pub fn render_event(&self, event: &ChangeEvent) -> Result<String, AuditError> {
        match &event.template {
            Some(name) => self.render(name, &event.args),
            None => Ok(event.args.join(PLAIN_SEPARATOR)),
        }
    }

    fn check_format(&self, name: &str, slot_count: usize, format: &str) -> Result<(), AuditError> {
        let malformed = |reason: String| AuditError::TemplateFormat {
            name: name.to_owned(),
            reason,
        };

        let mut occurrences: usize = 0;
        for caps in self.placeholder.captures_iter(format) {
            occurrences = occurrences.saturating_add(1);
            let index = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .ok_or_else(|| malformed("placeholder index out of range".to_owned()))?;
            if index >= slot_count {
                return Err(malformed(format!(
                    "placeholder {{{index}}} has no slot ({slot_count} declared)"
                )));
            }
        }
        if occurrences > slot_count {
            return Err(malformed(format!(
                "{occurrences} placeholders exceed {slot_count} declared slots"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use catalog_types::BatchId;

    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn builtin_templates_register() {
        let registry = TemplateRegistry::builtin().unwrap();
        assert_eq!(registry.names().count(), 7);
        assert_eq!(
            registry.get(templates::SET_REMOVE).map(Template::operation),
            Some(Operation::Removed)
        );
    }

    #[test]
    fn renders_positionally() {
        let registry = TemplateRegistry::builtin().unwrap();
        let text = registry
            .render(templates::DETAIL_CHANGE, &args(&["1", "title", "Foo", "Bar"]))
            .unwrap();
        assert_eq!(text, "Changed title – Foo › Bar");

        let price = registry
            .render(
                templates::BASEPRICE_CHANGE,
                &args(&["1", "base_price", "US", "9.99", "4.99", "USD"]),
            )
            .unwrap();
        assert_eq!(price, "Changed base_price in US – 9.99 › 4.99 USD");
    }

    #[test]
    fn missing_arguments_render_empty() {
        let registry = TemplateRegistry::builtin().unwrap();
        let text = registry.render(templates::SET_ADD, &args(&["1", "tags"])).unwrap();
        assert_eq!(text, "Changed tags – added ");
    }

    #[test]
    fn too_many_placeholders_fail_at_registration() {
        let mut registry = TemplateRegistry::new().unwrap();
        let err = registry
            .register("broken", Operation::Changed, &["a"], "{0} and {0}")
            .unwrap_err();
        assert!(matches!(err, AuditError::TemplateFormat { .. }));
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn placeholder_without_slot_fails_at_registration() {
        let mut registry = TemplateRegistry::new().unwrap();
        let err = registry
            .register("broken", Operation::Changed, &["a", "b"], "{2}")
            .unwrap_err();
        assert!(matches!(err, AuditError::TemplateFormat { .. }));
    }

    #[test]
    fn fewer_placeholders_than_slots_is_allowed() {
        let mut registry = TemplateRegistry::new().unwrap();
        assert!(
            registry
                .register("terse", Operation::Changed, &["id", "field", "old", "new"], "{1}")
                .is_ok()
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = TemplateRegistry::builtin().unwrap();
        let err = registry
            .register(templates::PRODUCT_ADD, Operation::Added, &["id"], "{0}")
            .unwrap_err();
        assert!(matches!(err, AuditError::DuplicateTemplate(_)));
    }

    #[test]
    fn events_render_with_or_without_template() {
        let registry = TemplateRegistry::builtin().unwrap();
        let mut event = ChangeEvent {
            batch_id: BatchId::new(),
            ordinal: 0,
            template: Some(templates::PRODUCT_ADD.to_owned()),
            args: args(&["1"]),
        };
        assert_eq!(registry.render_event(&event).unwrap(), "Added Product ID 1");
        event.template = None;
        event.args = args(&["a", "b"]);
        assert_eq!(registry.render_event(&event).unwrap(), "a, b");
        event.template = Some("nope".to_owned());
        assert!(matches!(
            registry.render_event(&event),
            Err(AuditError::UnknownTemplate(_))
        ));
    }
}
