use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RenderRequest {
    pub(crate) expression: String,
    pub(crate) user_id: u64,
    pub(crate) session_id: Option<String>,
    pub(crate) pdf: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RenderResponse {
    pub(crate) image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) pdf_base64: Option<String>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) kind: String,
    pub(crate) error: String,
}
