//! Document representation and lifecycle status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Source document type, detected from the file extension with a
/// content-sniffing fallback in the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF documents.
    Pdf,
    /// Word documents.
    Docx,
    /// Markdown text.
    Markdown,
    /// Plain text.
    Text,
    /// Source code.
    Code,
    /// HTML pages.
    Html,
    /// Tabular data (CSV/TSV).
    Table,
    /// Anything else; processed through fallback text extraction.
    Other,
}

impl FileType {
    /// Detects the file type from a path's extension.
    ///
    /// Returns [`FileType::Other`] for unknown extensions; the analyzer
    /// then attempts fallback text extraction before rejecting.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "docx" | "doc" => Self::Docx,
            "md" | "markdown" | "mdx" => Self::Markdown,
            "txt" | "text" | "log" => Self::Text,
            "html" | "htm" | "xhtml" => Self::Html,
            "csv" | "tsv" => Self::Table,
            "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" | "hpp" | "rb"
            | "sh" | "sql" | "kt" | "swift" | "scala" => Self::Code,
            _ => Self::Other,
        }
    }

    /// Returns the canonical lowercase name used in node metadata and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Markdown => "md",
            Self::Text => "txt",
            Self::Code => "code",
            Self::Html => "html",
            Self::Table => "table",
            Self::Other => "other",
        }
    }

    /// Parses a canonical name back into a file type.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "md" | "markdown" => Some(Self::Markdown),
            "txt" | "text" => Some(Self::Text),
            "code" => Some(Self::Code),
            "html" => Some(Self::Html),
            "table" => Some(Self::Table),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Accepted, not yet processed.
    Pending,
    /// An ingest is in flight.
    Processing,
    /// All chunks persisted; `node_count` is authoritative.
    Completed,
    /// Some segments persisted under the `allow_partial` policy.
    Partial,
    /// Terminal failure; see `Document::error`.
    Failed,
    /// Cancellation requested; outstanding tasks are being stopped.
    Canceling,
    /// Cancellation finished.
    Canceled,
}

impl DocumentStatus {
    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a canonical name back into a status.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "canceling" => Some(Self::Canceling),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns whether the status is terminal for the current attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Canceled
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered source document.
///
/// The invariant maintained by the finalize stage: when
/// `status == Completed`, `node_count` equals the number of chunks
/// persisted for this `doc_id` in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque stable identifier.
    pub doc_id: String,

    /// Pointer to the original bytes.
    pub source_path: String,

    /// Detected or declared file type.
    pub file_type: FileType,

    /// Caller-supplied metadata (title, tags, datasource name).
    pub metadata: BTreeMap<String, String>,

    /// Processing status.
    pub status: DocumentStatus,

    /// Size of the source in bytes.
    pub size_bytes: u64,

    /// Number of persisted chunks (authoritative when completed).
    pub node_count: usize,

    /// Unix timestamp of the last completed (re)ingest.
    pub last_processed_at: Option<i64>,

    /// Error message for failed/partial documents.
    pub error: Option<String>,
}

impl Document {
    /// Creates a new pending document.
    #[must_use]
    pub fn new(doc_id: impl Into<String>, source_path: impl Into<String>) -> Self {
        let source_path = source_path.into();
        let file_type = FileType::from_path(Path::new(&source_path));
        Self {
            doc_id: doc_id.into(),
            source_path,
            file_type,
            metadata: BTreeMap::new(),
            status: DocumentStatus::Pending,
            size_bytes: 0,
            node_count: 0,
            last_processed_at: None,
            error: None,
        }
    }

    /// Attaches caller-supplied metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Overrides the detected file type.
    #[must_use]
    pub const fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_path() {
        assert_eq!(FileType::from_path(Path::new("a.md")), FileType::Markdown);
        assert_eq!(FileType::from_path(Path::new("a.PDF")), FileType::Pdf);
        assert_eq!(FileType::from_path(Path::new("src/lib.rs")), FileType::Code);
        assert_eq!(FileType::from_path(Path::new("data.csv")), FileType::Table);
        assert_eq!(FileType::from_path(Path::new("notes.txt")), FileType::Text);
        assert_eq!(FileType::from_path(Path::new("blob")), FileType::Other);
    }

    #[test]
    fn test_file_type_roundtrip() {
        for ft in [
            FileType::Pdf,
            FileType::Docx,
            FileType::Markdown,
            FileType::Text,
            FileType::Code,
            FileType::Html,
            FileType::Table,
            FileType::Other,
        ] {
            assert_eq!(FileType::parse(ft.as_str()), Some(ft));
        }
        assert_eq!(FileType::parse("zip"), None);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Partial,
            DocumentStatus::Failed,
            DocumentStatus::Canceling,
            DocumentStatus::Canceled,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_status_terminal() {
        assert!(DocumentStatus::Completed.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(!DocumentStatus::Canceling.is_terminal());
    }

    #[test]
    fn test_document_new() {
        let doc = Document::new("doc-1", "guide.md");
        assert_eq!(doc.doc_id, "doc-1");
        assert_eq!(doc.file_type, FileType::Markdown);
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.node_count, 0);
        assert!(doc.error.is_none());
    }

    #[test]
    fn test_document_builders() {
        let mut meta = BTreeMap::new();
        meta.insert("title".to_string(), "Guide".to_string());
        let doc = Document::new("doc-1", "blob")
            .with_metadata(meta)
            .with_file_type(FileType::Text);
        assert_eq!(doc.file_type, FileType::Text);
        assert_eq!(doc.metadata.get("title").map(String::as_str), Some("Guide"));
    }

    #[test]
    fn test_document_serialization() {
        let doc = Document::new("doc-1", "guide.md");
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
