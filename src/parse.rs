//! Extraction of screen names and pagination cursors from GraphQL
//! timeline responses.
//!
//! The response tree is deep and the backend occasionally moves the
//! timeline container, so location strategies are tried in order and
//! unrecognized entries are skipped rather than treated as errors.

use serde_json::Value;

use crate::handles::HandleSet;

/// Handles and pagination cursor pulled from one timeline page.
#[derive(Debug, Default)]
pub struct PageExtract {
    pub handles: HandleSet,
    /// Bottom cursor for the next page, absent on the last one.
    pub next_cursor: Option<String>,
}

const INSTRUCTION_PATHS: [&[&str]; 2] = [
    &["data", "viewer", "muting_timeline", "timeline", "instructions"],
    &["data", "viewer", "timeline", "timeline", "instructions"],
];

const SCREEN_NAME_PATH: &[&str] = &["itemContent", "user_results", "result", "core", "screen_name"];

fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

/// First instruction array any known path resolves to.
pub(crate) fn locate_instructions(root: &Value) -> Option<&Vec<Value>> {
    INSTRUCTION_PATHS
        .iter()
        .find_map(|path| value_at(root, path).and_then(Value::as_array))
}

/// Walk every entry of every instruction, collecting user screen names
/// and the bottom cursor. Later cursor entries override earlier ones.
pub fn extract_page(root: &Value) -> PageExtract {
    let mut extract = PageExtract::default();
    let Some(instructions) = locate_instructions(root) else {
        return extract;
    };

    for instruction in instructions {
        let Some(entries) = instruction.get("entries").and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            let Some(content) = entry.get("content") else {
                continue;
            };
            if content.get("cursorType").and_then(Value::as_str) == Some("Bottom") {
                if let Some(cursor) = content.get("value").and_then(Value::as_str) {
                    if !cursor.is_empty() {
                        extract.next_cursor = Some(cursor.to_string());
                    }
                }
            }
            if let Some(handle) = value_at(content, SCREEN_NAME_PATH).and_then(Value::as_str) {
                extract.handles.insert(handle);
            }
        }
    }

    extract
}
