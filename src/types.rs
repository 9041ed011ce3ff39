use serde::{Deserialize, Serialize};
use sqlx::PgPool;

pub const MODE_AI: &str = "ai";
pub const MODE_HUMAN: &str = "human";

pub const SENDER_CUSTOMER: &str = "customer";
pub const SENDER_AI: &str = "ai";
pub const SENDER_HUMAN: &str = "human";

pub const SOURCE_WEB: &str = "web";
pub const SOURCE_FACEBOOK: &str = "facebook";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub tenant_id: String,
    pub company_name: String,
    pub description: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub faqs: String,
    pub payment_details: String,
    pub discounts: String,
    pub policy: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    pub tenant_id: String,
    pub name: String,
    pub persona: String,
    pub guidelines: String,
    pub intro_message: String,
    /// One of "short" | "normal" | "long"; anything else is treated as normal.
    pub response_length: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    /// Sanitized on write: digits and decimal point only.
    pub price: String,
    pub discounts: String,
    pub payment_terms: String,
    pub policy: String,
    pub faqs: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub id: String,
    pub tenant_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    /// Originating channel, "web" or "facebook".
    pub source: String,
    pub counterpart_name: String,
    pub counterpart_avatar_url: String,
    /// Platform sender id for external channels; empty for web conversations.
    pub external_sender_id: String,
    /// "ai" or "human"; the sole gate on automatic reply generation.
    pub mode: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_type: String,
    pub content: String,
    /// "text" or "file".
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_agent_id: Option<String>,
    #[serde(default)]
    pub human_agent_name: String,
    #[serde(default)]
    pub human_agent_avatar_url: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookChannel {
    pub id: String,
    pub tenant_id: String,
    pub page_id: String,
    pub page_name: String,
    pub access_token: String,
    /// Used for webhook signature verification; empty disables the check.
    pub app_secret: String,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub struct AppState {
    pub db: PgPool,
    pub http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationModeBody {
    pub mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub conversation_id: String,
    pub content: String,
    pub sender_type: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub human_agent_id: Option<String>,
    #[serde(default)]
    pub human_agent_name: Option<String>,
    #[serde(default)]
    pub human_agent_avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBusinessBody {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub faqs: String,
    #[serde(default)]
    pub payment_details: String,
    #[serde(default)]
    pub discounts: String,
    #[serde(default)]
    pub policy: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAssistantBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub guidelines: String,
    #[serde(default)]
    pub intro_message: String,
    #[serde(default)]
    pub response_length: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub discounts: String,
    #[serde(default)]
    pub payment_terms: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub faqs: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub discounts: Option<String>,
    pub payment_terms: Option<String>,
    pub policy: Option<String>,
    pub faqs: Option<String>,
    pub image_urls: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentBody {
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_size: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectFacebookBody {
    pub page_id: String,
    #[serde(default)]
    pub page_name: String,
    pub access_token: String,
    #[serde(default)]
    pub app_secret: String,
}
