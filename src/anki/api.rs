use std::{
    collections::HashMap,
    time::Duration,
};

use reqwest::Client;
use serde::{
    Deserialize,
    Serialize,
};
use tokio::time::sleep;

use crate::core::AnkimineError;

const ANKI_CONNECT_URL: &str = "http://localhost:8765/";

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub result: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInput {
    pub deck_name: String,
    pub model_name: String,
    pub fields: HashMap<String, String>,
    pub tags: Vec<String>,
    pub options: NoteOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteOptions {
    pub allow_duplicate: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CardTemplateSpec {
    pub name: String,
    pub front: String,
    pub back: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModelParams {
    pub model_name: String,
    pub in_order_fields: Vec<String>,
    pub css: String,
    pub is_cloze: bool,
    pub card_templates: Vec<CardTemplateSpec>,
}

async fn make_request<T: for<'de> Deserialize<'de>>(
    action: &str,
    params: Option<serde_json::Value>,
) -> Result<ApiResponse<T>, AnkimineError> {
    let mut body = serde_json::Map::new();
    body.insert("action".to_string(), serde_json::Value::String(action.to_string()));
    body.insert("version".to_string(), serde_json::Value::Number((6).into()));

    if let Some(params) = params {
        body.insert("params".to_string(), params);
    }

    let response: ApiResponse<T> =
        Client::new().post(ANKI_CONNECT_URL).json(&body).send().await?.json().await?;

    if let Some(error) = &response.error {
        return Err(AnkimineError::AnkiConnect(error.clone()));
    }
    Ok(response)
}

pub async fn get_version() -> Result<u32, AnkimineError> {
    let response: ApiResponse<u32> = make_request("version", None).await?;
    Ok(response.result.unwrap_or_default())
}

pub async fn model_names() -> Result<Vec<String>, AnkimineError> {
    let response: ApiResponse<Vec<String>> = make_request("modelNames", None).await?;
    Ok(response.result.unwrap_or_default())
}

pub async fn create_deck(name: &str) -> Result<u64, AnkimineError> {
    let params = serde_json::json!({ "deck": name });
    let response: ApiResponse<u64> = make_request("createDeck", Some(params)).await?;
    Ok(response.result.unwrap_or_default())
}

pub async fn create_model(model: &CreateModelParams) -> Result<(), AnkimineError> {
    let params = serde_json::to_value(model)?;
    let _: ApiResponse<serde_json::Value> = make_request("createModel", Some(params)).await?;
    Ok(())
}

/// One slot per submitted note: the created note id, or None when Anki
/// rejected it (usually a duplicate).
pub async fn add_notes(notes: &[NoteInput]) -> Result<Vec<Option<u64>>, AnkimineError> {
    let params = serde_json::json!({ "notes": notes });
    let response: ApiResponse<Vec<Option<u64>>> = make_request("addNotes", Some(params)).await?;
    Ok(response.result.unwrap_or_default())
}

/// Poll until AnkiConnect answers, for launch races where Anki is still
/// starting up.
pub async fn wait_awake(wait_time: u64, max_attempts: u32) -> Result<bool, AnkimineError> {
    for attempt in 1..=max_attempts {
        match get_version().await {
            Ok(version) => {
                log::info!("AnkiConnect is online. Version: {}", version);
                return Ok(true);
            }
            Err(err) => {
                log::warn!(
                    "AnkiConnect attempt {} of {} failed: {}. Retrying in {}s...",
                    attempt,
                    max_attempts,
                    err,
                    wait_time
                );
                if attempt < max_attempts {
                    sleep(Duration::from_secs(wait_time)).await;
                }
            }
        }
    }
    Ok(false)
}
