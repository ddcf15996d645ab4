use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Parent id carried by top-level notes.
pub const ROOT_PARENT_ID: &str = "root";

/// Leading character of a `trashed` timestamp for notes currently in the trash.
pub const TRASHED_SENTINEL: char = '2';

/// A linked Google account.
///
/// An account is linked through a browser profile (`profile_name`), through an
/// OAuth capture (`master_token`), or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub email: String,
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub master_token: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub access_token_expiry: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_profile(email: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            profile_name: profile_name.into(),
            ..Default::default()
        }
    }

    pub fn has_profile(&self) -> bool {
        !self.profile_name.is_empty()
    }

    pub fn has_master_token(&self) -> bool {
        !self.master_token.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.has_profile() || self.has_master_token()
    }

    /// A missing expiry counts as expired.
    pub fn is_access_token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.access_token_expiry {
            Some(expiry) => now > expiry,
            None => true,
        }
    }
}

/// A note record, flat and tagged with the owning account's email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Note {
    pub email: String,
    pub id: String,
    pub server_id: String,
    pub kind: String,
    pub parent_id: String,
    #[serde(rename = "type")]
    pub note_type: String,
    pub trashed: String,
    pub title: String,
    pub text: String,
    pub is_archived: bool,
    pub color: String,
    pub sort_value: String,
    pub checked: bool,
    pub indexable_text: String,
    pub checked_checkboxes_count: String,
}

fn str_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn bool_field(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn nested_str(map: &Map<String, Value>, outer: &str, key: &str) -> String {
    map.get(outer)
        .and_then(|v| v.as_object())
        .map(|inner| str_field(inner, key))
        .unwrap_or_default()
}

impl Note {
    /// Normalize a raw node from the notes API or the scraped web app.
    ///
    /// `timestamps.trashed` and `previewData.checkedCheckboxesCount` are lifted
    /// to the top level; fields that are missing or of the wrong type are left
    /// empty.
    pub fn parse(raw: &Value, email: &str) -> Result<Self> {
        let map = raw
            .as_object()
            .ok_or_else(|| Error::NoteParsing("note entry is not a JSON object".to_string()))?;

        Ok(Self {
            email: email.to_string(),
            id: str_field(map, "id"),
            server_id: str_field(map, "serverId"),
            kind: str_field(map, "kind"),
            parent_id: str_field(map, "parentId"),
            note_type: str_field(map, "type"),
            trashed: nested_str(map, "timestamps", "trashed"),
            title: str_field(map, "title"),
            text: str_field(map, "text"),
            is_archived: bool_field(map, "isArchived"),
            color: str_field(map, "color"),
            sort_value: str_field(map, "sortValue"),
            checked: bool_field(map, "checked"),
            indexable_text: str_field(map, "indexableText"),
            checked_checkboxes_count: nested_str(map, "previewData", "checkedCheckboxesCount"),
        })
    }

    /// Flat JSON form used by the local note feed.
    pub fn encode(&self) -> Value {
        json!({
            "email": self.email,
            "id": self.id,
            "serverId": self.server_id,
            "kind": self.kind,
            "parentId": self.parent_id,
            "type": self.note_type,
            "trashed": self.trashed,
            "title": self.title,
            "text": self.text,
            "isArchived": self.is_archived,
            "color": self.color,
            "sortValue": self.sort_value,
            "checked": self.checked,
            "indexableText": self.indexable_text,
            "checkedCheckboxesCount": self.checked_checkboxes_count,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }

    pub fn is_trashed(&self) -> bool {
        self.trashed.starts_with(TRASHED_SENTINEL)
    }

    pub fn is_list(&self) -> bool {
        self.note_type == "LIST"
    }

    fn sort_key(&self) -> i64 {
        self.sort_value.parse().unwrap_or(0)
    }
}

/// Visible top-level notes of one account, highest `sortValue` first.
pub fn root_notes<'a>(notes: &'a [Note], email: &str) -> Vec<&'a Note> {
    let mut roots: Vec<&Note> = notes
        .iter()
        .filter(|n| n.email == email && n.is_root() && !n.is_archived && !n.is_trashed())
        .collect();
    roots.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    roots
}

/// Display content of a root note: either free text or checklist items.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteView {
    pub id: String,
    pub email: String,
    pub server_id: String,
    pub note_type: String,
    pub color: String,
    pub title: String,
    pub text: String,
    pub unchecked_items: Vec<String>,
    pub checked_items: Vec<String>,
}

impl NoteView {
    /// Build the view of `root`. Roots carrying a checked-checkbox count are
    /// self-contained; otherwise the items come from child notes in `all`.
    pub fn build(root: &Note, all: &[Note]) -> Self {
        let mut view = Self {
            id: root.id.clone(),
            email: root.email.clone(),
            server_id: root.server_id.clone(),
            note_type: root.note_type.clone(),
            color: root.color.clone(),
            title: root.title.clone(),
            ..Default::default()
        };

        if !root.checked_checkboxes_count.is_empty() {
            if root.is_list() {
                let items: Vec<String> =
                    root.indexable_text.split('\n').map(str::to_string).collect();
                let checked = root
                    .checked_checkboxes_count
                    .parse::<i64>()
                    .unwrap_or(0)
                    .clamp(0, items.len() as i64) as usize;
                let split = items.len() - checked;
                view.unchecked_items = items[..split].to_vec();
                view.checked_items = items[split..].to_vec();
            } else {
                view.text = root.indexable_text.clone();
            }
            return view;
        }

        let (checked, unchecked): (Vec<&Note>, Vec<&Note>) = all
            .iter()
            .filter(|n| n.parent_id == root.id)
            .partition(|n| n.checked);
        let unchecked: Vec<String> = unchecked.into_iter().map(|n| n.text.clone()).collect();

        if root.is_list() {
            view.unchecked_items = unchecked;
            view.checked_items = checked.into_iter().map(|n| n.text.clone()).collect();
        } else {
            view.text = unchecked.join("\n");
        }
        view
    }
}
