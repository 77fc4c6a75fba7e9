use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::api::{RecordingBackend, RemoteRecording, TranscriptionStatusInfo};
use crate::error::RemoteError;

/// HTTP binding of the clinic backend.
///
/// Recording records and blob storage live under the clinic API base URL;
/// transcription operations go to the transcription service base URL passed
/// per call (empty means the service is not configured).
pub struct HttpRecordingBackend {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordingRequest<'a> {
    session_id: &'a str,
    user_id: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Serialize)]
struct UploadAudioRequest<'a> {
    file_name: &'a str,
    mime_type: &'a str,
    /// Base64-encoded audio bytes
    data: String,
}

#[derive(Debug, Serialize)]
struct UpdateDurationRequest {
    duration_seconds: f64,
}

#[derive(Debug, Serialize)]
struct StartTranscriptionRequest<'a> {
    recording_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

impl HttpRecordingBackend {
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        info!("Clinic backend at {}", api_url);

        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    fn transcription_api(base_url: &str, path: &str) -> Result<String, RemoteError> {
        if base_url.trim().is_empty() {
            return Err(RemoteError::NotConfigured);
        }
        Ok(format!("{}{}", base_url.trim_end_matches('/'), path))
    }

    /// Collapse a response into its error message, preferring the backend's
    /// own description over the bare status code.
    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error);

        match body {
            Some(message) => format!("{} ({})", message, status),
            None => format!("backend returned {}", status),
        }
    }

    async fn expect_ok(
        response: reqwest::Response,
        classify: fn(String) -> RemoteError,
    ) -> Result<reqwest::Response, RemoteError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify(Self::error_message(response).await))
        }
    }
}

#[async_trait::async_trait]
impl RecordingBackend for HttpRecordingBackend {
    async fn create_recording(
        &self,
        session_id: &str,
        user_id: &str,
        file_name: &str,
    ) -> Result<RemoteRecording, RemoteError> {
        let response = self
            .client
            .post(self.api("/recordings"))
            .json(&CreateRecordingRequest {
                session_id,
                user_id,
                file_name,
            })
            .send()
            .await
            .map_err(|e| RemoteError::Persistence(e.to_string()))?;

        let response = Self::expect_ok(response, RemoteError::Persistence).await?;

        let recording: RemoteRecording = response
            .json()
            .await
            .map_err(|e| RemoteError::Persistence(e.to_string()))?;

        debug!("Created remote recording {}", recording.id);
        Ok(recording)
    }

    async fn upload_audio(
        &self,
        recording_id: &str,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.api(&format!("/recordings/{}/audio", recording_id)))
            .json(&UploadAudioRequest {
                file_name,
                mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            })
            .send()
            .await
            .map_err(|e| RemoteError::Storage(e.to_string()))?;

        Self::expect_ok(response, RemoteError::Storage).await?;

        debug!(
            "Uploaded audio for recording {} ({} bytes)",
            recording_id,
            bytes.len()
        );
        Ok(())
    }

    async fn update_duration(
        &self,
        recording_id: &str,
        duration_seconds: f64,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .patch(self.api(&format!("/recordings/{}", recording_id)))
            .json(&UpdateDurationRequest { duration_seconds })
            .send()
            .await
            .map_err(|e| RemoteError::Persistence(e.to_string()))?;

        Self::expect_ok(response, RemoteError::Persistence).await?;
        Ok(())
    }

    async fn start_transcription(
        &self,
        recording_id: &str,
        api_base_url: &str,
    ) -> Result<(), RemoteError> {
        let url = Self::transcription_api(api_base_url, "/transcriptions")?;

        let response = self
            .client
            .post(url)
            .json(&StartTranscriptionRequest { recording_id })
            .send()
            .await
            .map_err(|e| RemoteError::TranscriptionStart(e.to_string()))?;

        Self::expect_ok(response, RemoteError::TranscriptionStart).await?;

        info!("Transcription started for recording {}", recording_id);
        Ok(())
    }

    async fn transcription_status(
        &self,
        recording_id: &str,
        api_base_url: &str,
        force_sync: bool,
    ) -> Result<TranscriptionStatusInfo, RemoteError> {
        let url = Self::transcription_api(
            api_base_url,
            &format!("/transcriptions/{}", recording_id),
        )?;

        let response = self
            .client
            .get(url)
            .query(&[("force_sync", force_sync)])
            .send()
            .await
            .map_err(|e| RemoteError::TranscriptionPoll(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::TranscriptionPoll(format!(
                "no transcription for recording {}",
                recording_id
            )));
        }

        let response = Self::expect_ok(response, RemoteError::TranscriptionPoll).await?;

        response
            .json()
            .await
            .map_err(|e| RemoteError::TranscriptionPoll(e.to_string()))
    }

    async fn sync_transcription(
        &self,
        recording_id: &str,
        api_base_url: &str,
    ) -> Result<(), RemoteError> {
        let url = Self::transcription_api(
            api_base_url,
            &format!("/transcriptions/{}/sync", recording_id),
        )?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| RemoteError::TranscriptionSync(e.to_string()))?;

        Self::expect_ok(response, RemoteError::TranscriptionSync).await?;

        debug!("Requested transcription re-sync for recording {}", recording_id);
        Ok(())
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.api(&format!("/recordings/{}", recording_id)))
            .send()
            .await
            .map_err(|e| RemoteError::Persistence(e.to_string()))?;

        Self::expect_ok(response, RemoteError::Persistence).await?;
        Ok(())
    }
}
