//! Frontend markup for a checklist block.
//!
//! In client-persist mode every item carries reactive attributes whose
//! initial state comes from storage; otherwise the block's own attributes are
//! rendered as plain HTML.

use crate::checklist::{sanitize_key, ChecklistService};
use crate::database::models::ChecklistState;
use crate::database::store::{RecordStore, StoreError};
use serde::Deserialize;
use std::fmt::Write;

#[derive(Debug, Clone, Deserialize)]
pub struct ChecklistBlock {
    pub post_id: i64,
    #[serde(default)]
    pub enable_save: bool,
    #[serde(default)]
    pub field_name: String,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChecklistItem {
    pub uuid: String,
    /// Inner block markup, emitted verbatim.
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub disabled: bool,
}

pub fn render_checklist<S: RecordStore<ChecklistState>>(
    service: &ChecklistService<S>,
    block: &ChecklistBlock,
    nonce: &str,
) -> Result<String, StoreError> {
    let persist = block.enable_save && block.post_id > 0;
    let field_name = sanitize_key(&block.field_name);

    let mut out = String::from("<div class=\"wp-block-checklist\"");
    if !field_name.is_empty() {
        let _ = write!(out, " data-field-name=\"{}\"", escape_attr(&field_name));
    }
    out.push('>');

    for item in &block.items {
        if persist {
            let checked = service.is_checked(block.post_id, &item.uuid)?;
            render_persisted_item(&mut out, item, checked);
        } else {
            render_plain_item(&mut out, item);
        }
    }

    let _ = write!(
        out,
        "<input type=\"hidden\" id=\"checklist_nonce\" value=\"{}\">",
        escape_attr(nonce)
    );
    let _ = write!(
        out,
        "<input type=\"hidden\" id=\"checklist_post_id\" value=\"{}\">",
        block.post_id
    );
    out.push_str("</div>");
    Ok(out)
}

fn render_persisted_item(out: &mut String, item: &ChecklistItem, checked: bool) {
    // The toggle endpoint stores the sanitized key; post it back in that form.
    let _ = write!(
        out,
        "<div class=\"checklist-item-wrapper\" x-data=\"todo\" x-init=\"checked = {checked}\">\
         <input class=\"checklist-input\" type=\"checkbox\" value=\"{}\" x-model=\"checked\" @change=\"toggle\" />\
         {}</div>",
        escape_attr(&sanitize_key(&item.uuid)),
        item.html
    );
}

fn render_plain_item(out: &mut String, item: &ChecklistItem) {
    let mut attrs = String::new();
    if item.checked {
        attrs.push_str(" checked=\"checked\"");
    }
    if item.read_only {
        attrs.push_str(" data-readonly=\"true\" onclick=\"this.checked=!this.checked;\"");
    }
    if item.disabled {
        attrs.push_str(" disabled=\"disabled\"");
    }
    let _ = write!(
        out,
        "<div class=\"checklist-item-wrapper\">\
         <input class=\"checklist-input\" type=\"checkbox\" value=\"1\"{attrs} />\
         {}</div>",
        item.html
    );
}

fn escape_attr(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::ToggleRequest;
    use crate::database::store::MemoryRecordStore;

    fn item(uuid: &str) -> ChecklistItem {
        ChecklistItem {
            uuid: uuid.into(),
            html: format!("<p>{uuid}</p>"),
            checked: false,
            read_only: false,
            disabled: false,
        }
    }

    #[test]
    fn plain_mode_uses_block_attributes() {
        let service = ChecklistService::new(MemoryRecordStore::<ChecklistState>::new());
        let block = ChecklistBlock {
            post_id: 7,
            enable_save: false,
            field_name: String::new(),
            items: vec![
                ChecklistItem {
                    checked: true,
                    read_only: true,
                    ..item("a")
                },
                ChecklistItem {
                    disabled: true,
                    ..item("b")
                },
            ],
        };
        let html = render_checklist(&service, &block, "n0nce").unwrap();
        assert!(html.contains(
            "value=\"1\" checked=\"checked\" data-readonly=\"true\" onclick=\"this.checked=!this.checked;\" />"
        ));
        assert!(html.contains("value=\"1\" disabled=\"disabled\" />"));
        assert!(!html.contains("x-data"));
        assert!(html.contains("id=\"checklist_nonce\" value=\"n0nce\""));
        assert!(html.contains("id=\"checklist_post_id\" value=\"7\""));
    }

    #[test]
    fn persisted_mode_reflects_stored_state() {
        let service = ChecklistService::new(MemoryRecordStore::<ChecklistState>::new());
        service
            .toggle(&ToggleRequest {
                user_id: 1,
                post_id: 7,
                blog_id: 1,
                field: "a".into(),
                checked: "true".into(),
            })
            .unwrap();
        let block = ChecklistBlock {
            post_id: 7,
            enable_save: true,
            field_name: "Groceries!".into(),
            items: vec![item("a"), item("b")],
        };
        let html = render_checklist(&service, &block, "n0nce").unwrap();
        assert!(html.starts_with("<div class=\"wp-block-checklist\" data-field-name=\"groceries\">"));
        assert!(html.contains("x-init=\"checked = true\"><input class=\"checklist-input\" type=\"checkbox\" value=\"a\""));
        assert!(html.contains("x-init=\"checked = false\"><input class=\"checklist-input\" type=\"checkbox\" value=\"b\""));
    }

    #[test]
    fn persistence_requires_a_post() {
        let service = ChecklistService::new(MemoryRecordStore::<ChecklistState>::new());
        let block = ChecklistBlock {
            post_id: 0,
            enable_save: true,
            field_name: String::new(),
            items: vec![item("a")],
        };
        let html = render_checklist(&service, &block, "").unwrap();
        assert!(!html.contains("x-data"));
    }

    #[test]
    fn persisted_identifiers_are_sanitized() {
        let service = ChecklistService::new(MemoryRecordStore::<ChecklistState>::new());
        let block = ChecklistBlock {
            post_id: 7,
            enable_save: true,
            field_name: String::new(),
            items: vec![item("\"><script>")],
        };
        let html = render_checklist(&service, &block, "\"x").unwrap();
        assert!(html.contains("type=\"checkbox\" value=\"script\""));
        assert!(html.contains("id=\"checklist_nonce\" value=\"&quot;x\""));
    }

    #[test]
    fn uppercase_uuids_render_their_stored_state() {
        let service = ChecklistService::new(MemoryRecordStore::<ChecklistState>::new());
        let uuid = "3F2504E0-4F89-11D3-9A0C-0305E82C3301";
        service
            .toggle(&ToggleRequest {
                user_id: 1,
                post_id: 7,
                blog_id: 1,
                field: sanitize_key(uuid),
                checked: "true".into(),
            })
            .unwrap();
        let block = ChecklistBlock {
            post_id: 7,
            enable_save: true,
            field_name: String::new(),
            items: vec![item(uuid)],
        };
        let html = render_checklist(&service, &block, "").unwrap();
        assert!(html.contains(
            "x-init=\"checked = true\"><input class=\"checklist-input\" type=\"checkbox\" value=\"3f2504e0-4f89-11d3-9a0c-0305e82c3301\""
        ));
    }
}
