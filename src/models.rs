use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::extraction_schema::ExtractionResult;

/// Column every client record is normalized to.
pub const CLIENT_ID_COLUMN: &str = "ID_Cliente";

/// Header names accepted as the client identifier, in priority order.
pub const CLIENT_ID_ALIASES: [&str; 3] = ["ID_Cliente", "ID", "id"];

// ============ Roster Models ============

/// One row of an uploaded client roster.
///
/// The identifier is always exposed under `ID_Cliente`; every original
/// header-keyed value is kept as an opaque attribute, in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    client_id: String,
    columns: Vec<(String, String)>,
}

impl ClientRecord {
    /// Builds a record from header/value pairs.
    ///
    /// Repeated header names keep their first position and the last value.
    /// Returns `None` when none of the identifier columns holds a non-empty value.
    /// An empty `ID_Cliente` column is reported with the fallback alias value, not `""`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut columns: Vec<(String, String)> = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            match columns.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = value,
                None => columns.push((key, value)),
            }
        }

        let client_id = CLIENT_ID_ALIASES.iter().find_map(|alias| {
            columns
                .iter()
                .find(|(key, value)| key == alias && !value.is_empty())
                .map(|(_, value)| value.clone())
        })?;

        Some(Self { client_id, columns })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Looks up a column by its exact (case-sensitive) header name.
    pub fn get(&self, column: &str) -> Option<&str> {
        if column == CLIENT_ID_COLUMN {
            return Some(&self.client_id);
        }
        self.columns
            .iter()
            .find(|(key, _)| key == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn segmento(&self) -> Option<&str> {
        self.get("Segmento").filter(|s| !s.is_empty())
    }

    /// Label used when listing clients for selection: `"<id> - <Segmento>"`.
    pub fn label(&self) -> String {
        match self.segmento() {
            Some(segmento) => format!("{} - {}", self.client_id, segmento),
            None => self.client_id.clone(),
        }
    }

    /// Number of distinct keys once the identifier is normalized.
    pub fn column_count(&self) -> usize {
        let has_id_column = self.columns.iter().any(|(key, _)| key == CLIENT_ID_COLUMN);
        self.columns.len() + usize::from(!has_id_column)
    }
}

impl Serialize for ClientRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.column_count()))?;
        map.serialize_entry(CLIENT_ID_COLUMN, &self.client_id)?;
        for (key, value) in &self.columns {
            if key != CLIENT_ID_COLUMN {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Why a data row was left out of the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    FieldCountMismatch { expected: usize, found: usize },
    MissingClientId,
}

/// A dropped data row. `line` is the 1-based physical line in the upload, blank lines included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub line: usize,
    pub reason: SkipReason,
}

/// Outcome of ingesting one roster upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub records: Vec<ClientRecord>,
    pub skipped: Vec<SkippedRow>,
    /// `None` when the input had no header + data row to work with.
    pub delimiter: Option<char>,
}

impl IngestReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============ Session Models ============

/// Steps of the capture flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStep {
    UploadCsv,
    SelectClient,
    CaptureImage,
    Processing,
    Results,
}

/// Snapshot of a session returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: uuid::Uuid,
    pub step: AppStep,
    pub client_count: usize,
    pub selected_client_id: Option<String>,
    pub error: Option<String>,
    pub has_capture: bool,
    pub has_result: bool,
}

// ============ API Request/Response Models ============

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub session: SessionView,
    pub client_count: usize,
    pub skipped_count: usize,
    pub report: IngestReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientListItem {
    pub label: String,
    pub record: ClientRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectClientRequest {
    pub client_id: String,
}

/// Captured frame, as produced by a browser canvas (`data:image/jpeg;base64,...`)
/// or as a bare base64 string.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureRequest {
    pub image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResponse {
    pub session: SessionView,
    pub result: ExtractionResult,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_alias_priority() {
        let record = ClientRecord::from_pairs([("id", "low"), ("ID", "mid")]).unwrap();
        assert_eq!(record.client_id(), "mid");

        let record =
            ClientRecord::from_pairs([("id", "low"), ("ID", "mid"), ("ID_Cliente", "top")])
                .unwrap();
        assert_eq!(record.client_id(), "top");
    }

    #[test]
    fn test_empty_preferred_alias_falls_through() {
        let record = ClientRecord::from_pairs([("ID_Cliente", ""), ("ID", "42")]).unwrap();
        assert_eq!(record.client_id(), "42");
        assert_eq!(record.get("ID_Cliente"), Some("42"));
    }

    #[test]
    fn test_aliases_are_case_sensitive() {
        assert!(ClientRecord::from_pairs([("Id", "1"), ("Nome", "Ana")]).is_none());
        assert!(ClientRecord::from_pairs([("id_cliente", "1")]).is_none());
    }

    #[test]
    fn test_duplicate_header_last_write_wins() {
        let record =
            ClientRecord::from_pairs([("ID", "1"), ("Nome", "Ana"), ("Nome", "Bia")]).unwrap();
        assert_eq!(record.get("Nome"), Some("Bia"));
        assert_eq!(record.column_count(), 3);
    }

    #[test]
    fn test_serializes_with_normalized_id_first() {
        let record = ClientRecord::from_pairs([("ID", "42"), ("Nome", "Ana")]).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"ID_Cliente":"42","ID":"42","Nome":"Ana"}"#);
    }

    #[test]
    fn test_label_with_and_without_segmento() {
        let record = ClientRecord::from_pairs([("ID_Cliente", "C1"), ("Segmento", "Varejo")])
            .unwrap();
        assert_eq!(record.label(), "C1 - Varejo");

        let record = ClientRecord::from_pairs([("ID_Cliente", "C2"), ("Segmento", "")]).unwrap();
        assert_eq!(record.label(), "C2");
    }

    #[test]
    fn test_step_serialization() {
        assert_eq!(
            serde_json::to_string(&AppStep::CaptureImage).unwrap(),
            "\"CAPTURE_IMAGE\""
        );
    }
}
