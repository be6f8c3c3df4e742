//! Incremental document synchronization.
//!
//! The relay feeds every client message through [`DocumentSync::observe`] before
//! it reaches the language server. `textDocument/didOpen` and
//! `textDocument/didChange` for the tracked document update the buffer, which is
//! written to the working source file before the call returns.
//!
//! Positions are LSP positions: zero-based lines and UTF-16 code unit columns.
//! A line ends at `\n`, `\r\n` or `\r`.

use crate::error::SyncError;
use cjbox_protocol::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const DID_OPEN: &str = "textDocument/didOpen";
const DID_CHANGE: &str = "textDocument/didChange";

/// Zero-based line and UTF-16 column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Line number.
    pub line: u32,
    /// Column in UTF-16 code units.
    pub character: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.character)
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive start.
    pub start: Position,
    /// Exclusive end.
    pub end: Position,
}

/// One entry of `contentChanges`.
///
/// Without a range the text replaces the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    /// Replaced range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    /// Replacement text.
    pub text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidOpenParams {
    text_document: TextDocumentItem,
}

#[derive(Deserialize)]
struct TextDocumentItem {
    uri: String,
    version: i32,
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidChangeParams {
    text_document: VersionedTextDocumentIdentifier,
    content_changes: Vec<ContentChange>,
}

#[derive(Deserialize)]
struct VersionedTextDocumentIdentifier {
    uri: String,
    version: i32,
}

/// What a notification did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Buffer replaced or edited, and persisted.
    Applied,
    /// Change older than the buffer; dropped.
    Stale,
    /// Not a document notification for the tracked document.
    Ignored,
}

/// Authoritative copy of the session's source file.
#[derive(Debug)]
pub struct DocumentSync {
    path: PathBuf,
    uri: Option<String>,
    text: String,
    version: i32,
}

impl DocumentSync {
    /// Empty buffer at version 0, persisted to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            uri: None,
            text: String::new(),
            version: 0,
        }
    }

    /// Current buffer.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Tracked document, once one has been opened.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Working file the buffer is persisted to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `message` if it is a document notification.
    pub async fn observe(&mut self, message: &Message) -> Result<SyncOutcome, SyncError> {
        let params = message.params().unwrap_or(&Value::Null);
        match message.method() {
            Some(DID_OPEN) => {
                let DidOpenParams { text_document: doc } =
                    DidOpenParams::deserialize(params).map_err(|source| SyncError::Params {
                        method: DID_OPEN,
                        source,
                    })?;
                self.open(&doc.uri, doc.text, doc.version).await
            }
            Some(DID_CHANGE) => {
                let DidChangeParams {
                    text_document: doc,
                    content_changes,
                } = DidChangeParams::deserialize(params).map_err(|source| SyncError::Params {
                    method: DID_CHANGE,
                    source,
                })?;
                self.change(&doc.uri, doc.version, &content_changes).await
            }
            _ => Ok(SyncOutcome::Ignored),
        }
    }

    /// Replace the buffer wholesale.
    ///
    /// The first opened document becomes the tracked one; other documents are
    /// left to the language server alone.
    pub async fn open(
        &mut self,
        uri: &str,
        text: String,
        version: i32,
    ) -> Result<SyncOutcome, SyncError> {
        if self.uri.as_deref().is_some_and(|tracked| tracked != uri) {
            debug!(uri = %uri, "ignoring untracked document");
            return Ok(SyncOutcome::Ignored);
        }

        self.persist(&text).await?;
        self.uri = Some(uri.to_string());
        self.text = text;
        self.version = version;
        debug!(uri = %uri, version, len = self.text().len(), "document opened");
        Ok(SyncOutcome::Applied)
    }

    /// Apply `changes` in order if `version` is not older than the buffer.
    ///
    /// Each change is resolved against the text produced by the changes before
    /// it. On error neither the buffer nor the file is modified.
    pub async fn change(
        &mut self,
        uri: &str,
        version: i32,
        changes: &[ContentChange],
    ) -> Result<SyncOutcome, SyncError> {
        if self.uri.as_deref() != Some(uri) {
            debug!(uri = %uri, "ignoring change to untracked document");
            return Ok(SyncOutcome::Ignored);
        }
        if version < self.version {
            debug!(uri = %uri, version, current = self.version, "dropping stale change");
            return Ok(SyncOutcome::Stale);
        }

        let mut text = self.text.clone();
        for change in changes {
            apply(&mut text, change)?;
        }

        self.persist(&text).await?;
        self.text = text;
        self.version = version;
        trace!(uri = %uri, version, edits = changes.len(), "document changed");
        Ok(SyncOutcome::Applied)
    }

    async fn persist(&self, text: &str) -> Result<(), SyncError> {
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }
}

fn apply(text: &mut String, change: &ContentChange) -> Result<(), SyncError> {
    let Some(range) = change.range else {
        text.clone_from(&change.text);
        return Ok(());
    };

    let start = offset_at(text, range.start);
    let end = offset_at(text, range.end);
    if end < start {
        return Err(SyncError::InvertedRange {
            start: range.start,
            end: range.end,
        });
    }
    text.replace_range(start..end, &change.text);
    Ok(())
}

/// Byte offset of `position` in `text`.
///
/// A column past the end of its line clamps to the line end, a line past the
/// end of the text clamps to the end of the text, and a column inside a
/// surrogate pair resolves to the start of that character.
pub fn offset_at(text: &str, position: Position) -> usize {
    let Some(line_start) = line_start(text, position.line) else {
        return text.len();
    };

    let mut remaining = position.character as usize;
    for (index, ch) in text[line_start..].char_indices() {
        if ch == '\n' || ch == '\r' || remaining < ch.len_utf16() {
            return line_start + index;
        }
        remaining -= ch.len_utf16();
    }
    text.len()
}

/// Byte offset where `line` starts, if the text has that many lines.
fn line_start(text: &str, line: u32) -> Option<usize> {
    if line == 0 {
        return Some(0);
    }

    let bytes = text.as_bytes();
    let mut seen = 0;
    let mut i = 0;
    while i < bytes.len() {
        let next = match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => i + 2,
            b'\r' | b'\n' => i + 1,
            _ => {
                i += 1;
                continue;
            }
        };
        seen += 1;
        if seen == line {
            return Some(next);
        }
        i = next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    fn edit(start: (u32, u32), end: (u32, u32), text: &str) -> ContentChange {
        ContentChange {
            range: Some(Range {
                start: pos(start.0, start.1),
                end: pos(end.0, end.1),
            }),
            text: text.to_string(),
        }
    }

    fn sync() -> (tempfile::TempDir, DocumentSync) {
        let dir = tempfile::tempdir().unwrap();
        let sync = DocumentSync::new(dir.path().join("main.cj"));
        (dir, sync)
    }

    const URI: &str = "file:///playground/src/main.cj";

    #[tokio::test]
    async fn test_stale_change_is_dropped() {
        let (_dir, mut doc) = sync();
        doc.open(URI, "abc".into(), 1).await.unwrap();

        let applied = doc.change(URI, 2, &[edit((0, 1), (0, 2), "X")]).await.unwrap();
        assert_eq!(applied, SyncOutcome::Applied);
        let stale = doc.change(URI, 1, &[edit((0, 0), (0, 1), "Z")]).await.unwrap();
        assert_eq!(stale, SyncOutcome::Stale);

        assert_eq!(doc.text(), "aXc");
        assert_eq!(doc.version(), 2);
        assert_eq!(std::fs::read_to_string(doc.path()).unwrap(), "aXc");
    }

    #[tokio::test]
    async fn test_equal_version_is_applied() {
        let (_dir, mut doc) = sync();
        doc.open(URI, "abc".into(), 3).await.unwrap();
        doc.change(URI, 3, &[edit((0, 3), (0, 3), "d")]).await.unwrap();
        assert_eq!(doc.text(), "abcd");
    }

    #[tokio::test]
    async fn test_batch_edits_apply_sequentially() {
        let (_dir, mut doc) = sync();
        doc.open(URI, "hello world".into(), 1).await.unwrap();

        // the second edit addresses the text produced by the first
        let changes = [edit((0, 0), (0, 5), "hi"), edit((0, 2), (0, 2), ",")];
        doc.change(URI, 2, &changes).await.unwrap();
        assert_eq!(doc.text(), "hi, world");
    }

    #[tokio::test]
    async fn test_full_replacement() {
        let (_dir, mut doc) = sync();
        doc.open(URI, "old".into(), 1).await.unwrap();
        let change = ContentChange {
            range: None,
            text: "new text".into(),
        };
        doc.change(URI, 2, &[change]).await.unwrap();
        assert_eq!(doc.text(), "new text");
        assert_eq!(std::fs::read_to_string(doc.path()).unwrap(), "new text");
    }

    #[tokio::test]
    async fn test_inverted_range_leaves_buffer_intact() {
        let (_dir, mut doc) = sync();
        doc.open(URI, "abcdef".into(), 1).await.unwrap();

        let changes = [edit((0, 0), (0, 1), "A"), edit((0, 4), (0, 2), "?")];
        let result = doc.change(URI, 2, &changes).await;
        assert!(matches!(result, Err(SyncError::InvertedRange { .. })));
        assert_eq!(doc.text(), "abcdef");
        assert_eq!(doc.version(), 1);
        assert_eq!(std::fs::read_to_string(doc.path()).unwrap(), "abcdef");
    }

    #[tokio::test]
    async fn test_untracked_document_is_ignored() {
        let (_dir, mut doc) = sync();
        let other = "file:///playground/src/other.cj";
        assert_eq!(
            doc.change(URI, 1, &[edit((0, 0), (0, 0), "x")]).await.unwrap(),
            SyncOutcome::Ignored
        );

        doc.open(URI, "main".into(), 1).await.unwrap();
        assert_eq!(
            doc.open(other, "other".into(), 1).await.unwrap(),
            SyncOutcome::Ignored
        );
        assert_eq!(doc.uri(), Some(URI));
        assert_eq!(doc.text(), "main");
    }

    #[test]
    fn test_offsets_count_utf16_units() {
        // U+1F600 is two UTF-16 units and four bytes
        let text = "a\u{1F600}b";
        assert_eq!(offset_at(text, pos(0, 1)), 1);
        assert_eq!(offset_at(text, pos(0, 3)), 5);
        // inside the surrogate pair
        assert_eq!(offset_at(text, pos(0, 2)), 1);

        // U+00E9 is one unit and two bytes
        assert_eq!(offset_at("\u{e9}x", pos(0, 1)), 2);
    }

    #[test]
    fn test_offsets_across_line_endings() {
        let text = "ab\r\ncd\ref\ngh";
        assert_eq!(offset_at(text, pos(1, 0)), 4);
        assert_eq!(offset_at(text, pos(2, 1)), 8);
        assert_eq!(offset_at(text, pos(3, 2)), text.len());
    }

    #[test]
    fn test_offsets_clamp() {
        let text = "ab\ncd";
        // past the end of line 0 stops before the newline
        assert_eq!(offset_at(text, pos(0, 10)), 2);
        // past the last line
        assert_eq!(offset_at(text, pos(7, 0)), text.len());
        // empty trailing line
        assert_eq!(offset_at("ab\n", pos(1, 0)), 3);
    }

    #[tokio::test]
    async fn test_observe_routes_notifications() {
        let (_dir, mut doc) = sync();
        let open = Message::notification(
            DID_OPEN,
            Some(json!({
                "textDocument": { "uri": URI, "languageId": "Cangjie", "version": 1, "text": "main() {}\r\n" }
            })),
        );
        assert_eq!(doc.observe(&open).await.unwrap(), SyncOutcome::Applied);

        let change = Message::notification(
            DID_CHANGE,
            Some(json!({
                "textDocument": { "uri": URI, "version": 2 },
                "contentChanges": [{
                    "range": { "start": { "line": 0, "character": 8 }, "end": { "line": 0, "character": 8 } },
                    "rangeLength": 0,
                    "text": " 1 "
                }]
            })),
        );
        assert_eq!(doc.observe(&change).await.unwrap(), SyncOutcome::Applied);
        assert_eq!(doc.text(), "main() { 1 }\r\n");

        let hover = Message::notification("textDocument/hover", None);
        assert_eq!(doc.observe(&hover).await.unwrap(), SyncOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_malformed_params_are_fatal() {
        let (_dir, mut doc) = sync();
        let open = Message::notification(DID_OPEN, Some(json!({ "textDocument": { "uri": URI } })));
        assert!(matches!(
            doc.observe(&open).await,
            Err(SyncError::Params { method: DID_OPEN, .. })
        ));
    }
}
