//! The Banking Settings record: typed view, field states and validation.

pub mod record;
pub mod rules;
pub mod validate;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::doctype::{Doc, Meta};
pub use record::{BankingSettings, KosmaEnvironment};
pub use rules::{FieldState, FieldStates, field_states};
pub use validate::{Origin, ValidatedUpdate, ValidationErrors, validate_update};

/// What a form needs to render the record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingsView {
    pub doc: Doc,
    pub field_states: FieldStates,
    pub modified: Option<DateTime<Utc>>,
}

/// Field states for an unsaved draft laid over `current`.
///
/// Unknown and layout fields in the draft are ignored; nothing is validated.
pub fn preview(meta: &Meta, current: &Doc, draft: &Doc) -> FieldStates {
    let mut merged = current.clone();
    for (fieldname, value) in draft {
        if meta
            .field(fieldname)
            .is_some_and(|f| f.field.fieldtype.is_stored())
        {
            merged.insert(fieldname.clone(), value.clone());
        }
    }
    field_states(meta, &merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_reacts_to_draft_edits() {
        let meta = Meta::banking_settings().unwrap();
        let current = meta.defaults();
        let draft = json!({"enabled": 1, "enable_ebics": 1, "subscription": {"plan": "x"}});
        let states = preview(&meta, &current, draft.as_object().unwrap());

        assert!(states["customer_id"].required);
        assert!(states["fintech_licensee_name"].visible);
        // display-only content is never taken from a draft
        assert!(!states["subscription"].visible);
    }
}
