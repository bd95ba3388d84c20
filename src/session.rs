//! In-memory capture sessions.
//!
//! A session walks the steps upload → select → capture → processing → results.
//! Nothing is persisted: sessions expire after an idle TTL and a re-upload
//! replaces the roster wholesale.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::{AppError, EXTRACTION_FAILED_MESSAGE, NO_VALID_DATA_MESSAGE};
use crate::extraction_schema::ExtractionResult;
use crate::gemini_client::{ExtractionError, ImagePayload};
use crate::models::{AppStep, ClientRecord, IngestReport, SessionView};

/// A pending extraction handed out by [`Session::begin_capture`].
#[derive(Debug, Clone)]
pub struct CaptureTicket {
    pub client_id: String,
    pub image: ImagePayload,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    step: AppStep,
    clients: Vec<ClientRecord>,
    selected_client_id: Option<String>,
    captured_image: Option<ImagePayload>,
    result: Option<ExtractionResult>,
    error: Option<String>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            step: AppStep::UploadCsv,
            clients: Vec::new(),
            selected_client_id: None,
            captured_image: None,
            result: None,
            error: None,
        }
    }

    pub fn step(&self) -> AppStep {
        self.step
    }

    pub fn clients(&self) -> &[ClientRecord] {
        &self.clients
    }

    pub fn result(&self) -> Option<&ExtractionResult> {
        self.result.as_ref()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id,
            step: self.step,
            client_count: self.clients.len(),
            selected_client_id: self.selected_client_id.clone(),
            error: self.error.clone(),
            has_capture: self.captured_image.is_some(),
            has_result: self.result.is_some(),
        }
    }

    fn ensure_idle(&self) -> Result<(), AppError> {
        if self.step == AppStep::Processing {
            return Err(AppError::Conflict(
                "An extraction is already in progress for this session".to_string(),
            ));
        }
        Ok(())
    }

    fn clear_capture(&mut self) {
        self.captured_image = None;
        self.result = None;
    }

    /// Replaces the roster with a fresh upload.
    ///
    /// An upload without usable records empties the roster and keeps the
    /// session on the upload step.
    pub fn load_roster(&mut self, report: &IngestReport) -> Result<(), AppError> {
        self.ensure_idle()?;
        self.clear_capture();
        self.selected_client_id = None;
        self.clients = report.records.clone();

        if self.clients.is_empty() {
            self.step = AppStep::UploadCsv;
            self.error = Some(NO_VALID_DATA_MESSAGE.to_string());
            return Err(AppError::NoValidData);
        }

        self.step = AppStep::SelectClient;
        self.error = None;
        Ok(())
    }

    pub fn select_client(&mut self, client_id: &str) -> Result<(), AppError> {
        self.ensure_idle()?;
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(AppError::BadRequest("client_id is required".to_string()));
        }
        if self.clients.is_empty() {
            return Err(AppError::Conflict(
                "Upload a client roster before selecting a client".to_string(),
            ));
        }
        if !self.clients.iter().any(|c| c.client_id() == client_id) {
            return Err(AppError::NotFound(format!(
                "Client {} is not in the uploaded roster",
                client_id
            )));
        }

        self.clear_capture();
        self.selected_client_id = Some(client_id.to_string());
        self.step = AppStep::CaptureImage;
        self.error = None;
        Ok(())
    }

    /// Moves to the processing step and hands out what the extraction needs.
    pub fn begin_capture(
        &mut self,
        image: ImagePayload,
        captured_at: DateTime<Utc>,
    ) -> Result<CaptureTicket, AppError> {
        self.ensure_idle()?;
        let client_id = match (&self.step, &self.selected_client_id) {
            (AppStep::CaptureImage, Some(client_id)) => client_id.clone(),
            _ => {
                return Err(AppError::Conflict(
                    "Select a client before capturing an image".to_string(),
                ))
            }
        };

        self.captured_image = Some(image.clone());
        self.result = None;
        self.error = None;
        self.step = AppStep::Processing;

        Ok(CaptureTicket {
            client_id,
            image,
            captured_at,
        })
    }

    /// Settles the in-flight extraction. Failures send the user back to capture.
    pub fn complete_capture(&mut self, outcome: &Result<ExtractionResult, ExtractionError>) {
        if self.step != AppStep::Processing {
            tracing::warn!(
                "Session {} settled an extraction while in step {:?}",
                self.id,
                self.step
            );
        }
        match outcome {
            Ok(result) => {
                self.result = Some(result.clone());
                self.error = None;
                self.step = AppStep::Results;
            }
            Err(err) => {
                tracing::warn!("Session {} extraction failed: {}", self.id, err);
                self.result = None;
                self.error = Some(EXTRACTION_FAILED_MESSAGE.to_string());
                self.step = AppStep::CaptureImage;
            }
        }
    }

    /// Leaves the capture step without capturing.
    pub fn cancel_capture(&mut self) -> Result<(), AppError> {
        self.ensure_idle()?;
        if self.step != AppStep::CaptureImage {
            return Err(AppError::Conflict("No capture to cancel".to_string()));
        }
        self.captured_image = None;
        self.step = AppStep::SelectClient;
        Ok(())
    }

    /// Starts over with the same roster.
    pub fn reset(&mut self) -> Result<(), AppError> {
        self.ensure_idle()?;
        self.clear_capture();
        self.selected_client_id = None;
        self.error = None;
        self.step = if self.clients.is_empty() {
            AppStep::UploadCsv
        } else {
            AppStep::SelectClient
        };
        Ok(())
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Process-local session registry with idle expiry.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<Uuid, SharedSession>,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        let sessions = Cache::builder()
            .time_to_idle(idle_ttl)
            .max_capacity(10_000)
            .build();
        Self { sessions }
    }

    pub async fn create(&self) -> (Uuid, SharedSession) {
        let id = Uuid::new_v4();
        let session = Arc::new(Mutex::new(Session::new(id)));
        self.sessions.insert(id, session.clone()).await;
        tracing::info!("Session {} created", id);
        (id, session)
    }

    pub async fn get(&self, id: Uuid) -> Result<SharedSession, AppError> {
        self.sessions
            .get(&id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), AppError> {
        match self.sessions.remove(&id).await {
            Some(_) => {
                tracing::info!("Session {} discarded", id);
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Session {} not found", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_ingestor::ingest_csv;
    use crate::extraction_schema::{Atendimento, DadosExtraidos};

    fn loaded_session() -> Session {
        let mut session = Session::new(Uuid::new_v4());
        session
            .load_roster(&ingest_csv("ID_Cliente,Segmento\nC1,Varejo\nC2,Alta Renda"))
            .unwrap();
        session
    }

    fn sample_result() -> ExtractionResult {
        ExtractionResult {
            atendimento: Atendimento {
                id_cliente: "C1".to_string(),
                timestamp: "2025-01-01T00:00:00.000Z".to_string(),
            },
            dados_extraidos: DadosExtraidos::default(),
        }
    }

    fn image() -> ImagePayload {
        ImagePayload::from_data_url("AAAA").unwrap()
    }

    #[test]
    fn test_empty_roster_stays_on_upload() {
        let mut session = Session::new(Uuid::new_v4());
        let err = session.load_roster(&ingest_csv("ID_Cliente\n")).unwrap_err();
        assert!(matches!(err, AppError::NoValidData));
        assert_eq!(session.step(), AppStep::UploadCsv);
        assert_eq!(session.view().error.as_deref(), Some(NO_VALID_DATA_MESSAGE));
    }

    #[test]
    fn test_full_flow() {
        let mut session = loaded_session();
        assert_eq!(session.step(), AppStep::SelectClient);

        session.select_client("C1").unwrap();
        assert_eq!(session.step(), AppStep::CaptureImage);

        let ticket = session.begin_capture(image(), Utc::now()).unwrap();
        assert_eq!(ticket.client_id, "C1");
        assert_eq!(session.step(), AppStep::Processing);

        session.complete_capture(&Ok(sample_result()));
        assert_eq!(session.step(), AppStep::Results);
        assert!(session.result().is_some());
        assert!(session.view().has_capture);

        session.reset().unwrap();
        assert_eq!(session.step(), AppStep::SelectClient);
        assert!(session.result().is_none());
        assert_eq!(session.view().selected_client_id, None);
        assert_eq!(session.clients().len(), 2);
    }

    #[test]
    fn test_failed_extraction_returns_to_capture() {
        let mut session = loaded_session();
        session.select_client("C2").unwrap();
        session.begin_capture(image(), Utc::now()).unwrap();

        session.complete_capture(&Err(ExtractionError::EmptyResponse));
        assert_eq!(session.step(), AppStep::CaptureImage);
        assert_eq!(
            session.view().error.as_deref(),
            Some(EXTRACTION_FAILED_MESSAGE)
        );

        // Retry is allowed once the previous attempt settled
        assert!(session.begin_capture(image(), Utc::now()).is_ok());
    }

    #[test]
    fn test_concurrent_capture_is_rejected() {
        let mut session = loaded_session();
        session.select_client("C1").unwrap();
        session.begin_capture(image(), Utc::now()).unwrap();

        let err = session.begin_capture(image(), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(matches!(
            session.load_roster(&ingest_csv("ID\n1")),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(session.reset(), Err(AppError::Conflict(_))));
    }

    #[test]
    fn test_capture_requires_selection() {
        let mut session = loaded_session();
        let err = session.begin_capture(image(), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_unknown_client_is_not_found() {
        let mut session = loaded_session();
        assert!(matches!(
            session.select_client("C9"),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            session.select_client("  "),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_cancel_capture() {
        let mut session = loaded_session();
        session.select_client("C1").unwrap();
        session.cancel_capture().unwrap();
        assert_eq!(session.step(), AppStep::SelectClient);
        assert!(session.cancel_capture().is_err());
    }

    #[test]
    fn test_reupload_discards_previous_state() {
        let mut session = loaded_session();
        session.select_client("C1").unwrap();
        session.begin_capture(image(), Utc::now()).unwrap();
        session.complete_capture(&Ok(sample_result()));

        session.load_roster(&ingest_csv("ID;Nome\n42;Ana")).unwrap();
        assert_eq!(session.step(), AppStep::SelectClient);
        assert_eq!(session.clients().len(), 1);
        assert!(session.result().is_none());
        assert_eq!(session.view().selected_client_id, None);
    }

    #[tokio::test]
    async fn test_store_create_get_remove() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _) = store.create().await;
        assert!(store.get(id).await.is_ok());
        store.remove(id).await.unwrap();
        assert!(matches!(store.get(id).await, Err(AppError::NotFound(_))));
        assert!(store.remove(id).await.is_err());
    }
}
