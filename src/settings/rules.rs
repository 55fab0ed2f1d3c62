use serde::Serialize;
use std::collections::BTreeMap;

use crate::doctype::condition::truthy;
use crate::doctype::{Doc, FieldType, Meta};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct FieldState {
    pub visible: bool,
    pub required: bool,
    pub read_only: bool,
}

impl FieldState {
    pub fn editable(&self) -> bool {
        self.visible && !self.read_only
    }
}

pub type FieldStates = BTreeMap<String, FieldState>;

/// Visibility, mandatoriness and read-only state of every non-layout field
/// for the given record. Pure; recompute after every change.
pub fn field_states(meta: &Meta, doc: &Doc) -> FieldStates {
    meta.fields()
        .filter(|f| !f.field.fieldtype.is_layout())
        .map(|f| {
            let df = &f.field;
            let visible = match &f.depends_on {
                Some(cond) => cond.evaluate(doc),
                None if df.fieldtype == FieldType::Html => {
                    doc.get(&df.fieldname).is_some_and(truthy)
                }
                None => true,
            };
            let mandatory = df.reqd
                || f
                    .mandatory_depends_on
                    .as_ref()
                    .is_some_and(|cond| cond.evaluate(doc));
            let state = FieldState {
                visible,
                required: visible && mandatory,
                read_only: df.read_only || df.fieldtype == FieldType::Html,
            };
            (df.fieldname.clone(), state)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn states_for(patch: serde_json::Value) -> FieldStates {
        let meta = Meta::banking_settings().unwrap();
        let mut doc = meta.defaults();
        doc.extend(patch.as_object().cloned().unwrap());
        field_states(&meta, &doc)
    }

    #[test]
    fn credentials_become_required_when_enabled() {
        let off = states_for(json!({}));
        for field in ["admin_endpoint", "customer_id", "api_token"] {
            assert!(off[field].visible);
            assert!(!off[field].required, "{field} required while disabled");
        }

        let on = states_for(json!({"enabled": 1}));
        for field in ["admin_endpoint", "customer_id", "api_token"] {
            assert!(on[field].required, "{field} not required while enabled");
        }
    }

    #[test]
    fn test_environment_follows_kosma_flag() {
        let on = states_for(json!({}));
        assert!(on["use_test_environment"].editable());

        let off = states_for(json!({"enable_klarna_kosma": 0}));
        assert!(!off["use_test_environment"].visible);
        assert!(!off["use_test_environment"].editable());
    }

    #[test]
    fn license_fields_follow_ebics_flag() {
        let off = states_for(json!({}));
        for field in ["fintech_license_key", "fintech_licensee_name"] {
            assert!(!off[field].visible);
            assert!(!off[field].editable());
        }

        let on = states_for(json!({"enable_ebics": 1}));
        for field in ["fintech_license_key", "fintech_licensee_name"] {
            assert!(on[field].visible);
            assert!(on[field].read_only);
            assert!(!on[field].editable());
        }
    }

    #[test]
    fn subscription_shows_only_with_content() {
        assert!(!states_for(json!({}))["subscription"].visible);
        let with = states_for(json!({"subscription": {"plan": "Business"}}));
        assert!(with["subscription"].visible);
        assert!(with["subscription"].read_only);
    }

    #[test]
    fn layout_fields_have_no_state() {
        let states = states_for(json!({}));
        assert!(!states.contains_key("section_break_kosma"));
        assert!(!states.contains_key("column_break_6"));
    }
}
