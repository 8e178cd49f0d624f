//! Run-time evaluation of a field's dynamic conditions.

use bitwire_schema::{CompiledConditions, FieldDescriptor, FieldLookup};
use tracing::trace;

/// The dynamic conditions attached to one field.
#[derive(Debug, Clone, Copy)]
pub struct DynamicConditions<'a> {
    field: &'a str,
    conditions: &'a CompiledConditions,
}

/// Result of evaluating a field's conditions against concrete values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Evaluated {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub omit: bool,
    pub required: bool,
}

impl<'a> DynamicConditions<'a> {
    pub fn of(field: &'a FieldDescriptor) -> Self {
        Self {
            field: &field.name,
            conditions: field.conditions(),
        }
    }

    pub fn has_min(&self) -> bool {
        self.conditions.min.is_some()
    }

    pub fn has_max(&self) -> bool {
        self.conditions.max.is_some()
    }

    pub fn has_omit_if(&self) -> bool {
        self.conditions.omit_if.is_some()
    }

    pub fn has_required_if(&self) -> bool {
        self.conditions.required_if.is_some()
    }

    /// Evaluates every expression against `scope`.
    ///
    /// Bounds that do not evaluate to a finite number are treated as unset.
    pub fn regenerate(&self, scope: &dyn FieldLookup) -> Evaluated {
        if self.conditions.is_empty() {
            return Evaluated::default();
        }
        let c = self.conditions;
        let evaluated = Evaluated {
            min: c.min.as_ref().and_then(|e| e.evaluate_number(scope)),
            max: c.max.as_ref().and_then(|e| e.evaluate_number(scope)),
            omit: c.omit_if.as_ref().is_some_and(|e| e.evaluate_bool(scope)),
            required: c.required_if.as_ref().is_some_and(|e| e.evaluate_bool(scope)),
        };
        trace!(field = self.field, ?evaluated, "regenerated dynamic conditions");
        evaluated
    }
}

impl Evaluated {
    /// Effective lower bound, clamped into the static bounds.
    pub fn min_within(&self, static_min: f64, static_max: f64) -> f64 {
        match self.min {
            Some(min) => static_max.min(min.max(static_min)),
            None => static_min,
        }
    }

    /// Effective upper bound, clamped into the static bounds.
    pub fn max_within(&self, static_min: f64, static_max: f64) -> f64 {
        match self.max {
            Some(max) => static_min.max(max.min(static_max)),
            None => static_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitwire_schema::{Anchor, Message, SchemaSet, Value};
    use serde_json::json;

    struct Scope(Message);

    impl FieldLookup for Scope {
        fn lookup(&self, _anchor: Anchor, path: &str) -> Option<&Value> {
            self.0.lookup(path)
        }
    }

    fn schema() -> SchemaSet {
        SchemaSet::from_json(&json!({
            "messages": [{"name": "Sample", "fields": [
                {"name": "mode", "type": "int32", "options": {"min": 0, "max": 3}},
                {"name": "limit", "type": "int32", "options": {"min": 0, "max": 100}},
                {"name": "reading", "type": "double", "options": {
                    "min": 0, "max": 100,
                    "dynamic_conditions": {
                        "min": "this.limit - 10",
                        "max": "this.limit + 10",
                        "omit_if": "this.mode == 0",
                        "required_if": "this.mode == 2"
                    }
                }},
                {"name": "plain", "type": "bool"}
            ]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_regenerate() {
        let schema = schema();
        let field = schema.message("Sample").unwrap().field("reading").unwrap();
        let conditions = DynamicConditions::of(field);
        assert!(conditions.has_min() && conditions.has_max());
        assert!(conditions.has_omit_if() && conditions.has_required_if());

        let scope = Scope(Message::new("Sample").with("mode", 2i32).with("limit", 50i32));
        let evaluated = conditions.regenerate(&scope);
        assert_eq!(evaluated.min, Some(40.0));
        assert_eq!(evaluated.max, Some(60.0));
        assert!(!evaluated.omit);
        assert!(evaluated.required);

        let scope = Scope(Message::new("Sample").with("mode", 0i32));
        let evaluated = conditions.regenerate(&scope);
        assert_eq!(evaluated.min, None);
        assert!(evaluated.omit);
        assert!(!evaluated.required);
    }

    #[test]
    fn test_no_conditions() {
        let schema = schema();
        let field = schema.message("Sample").unwrap().field("plain").unwrap();
        let scope = Scope(Message::new("Sample"));
        assert_eq!(DynamicConditions::of(field).regenerate(&scope), Evaluated::default());
    }

    #[test]
    fn test_clamping() {
        let evaluated = Evaluated {
            min: Some(-5.0),
            max: Some(500.0),
            ..Default::default()
        };
        assert_eq!(evaluated.min_within(0.0, 100.0), 0.0);
        assert_eq!(evaluated.max_within(0.0, 100.0), 100.0);

        let evaluated = Evaluated {
            min: Some(20.0),
            max: Some(30.0),
            ..Default::default()
        };
        assert_eq!(evaluated.min_within(0.0, 100.0), 20.0);
        assert_eq!(evaluated.max_within(0.0, 100.0), 30.0);

        let unset = Evaluated::default();
        assert_eq!(unset.min_within(1.0, 9.0), 1.0);
        assert_eq!(unset.max_within(1.0, 9.0), 9.0);
    }
}
