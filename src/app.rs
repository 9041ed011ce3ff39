use std::{collections::HashMap, env, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::facebook::{
    deliver_to_messenger, parse_webhook_events, select_products_for_images,
    verify_webhook_signature,
};
use crate::knowledge::sanitize_price;
use crate::responder::{generate_reply, TenantContext};
use crate::types::*;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "minechat".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

/// A conversation's mode is the sole gate on automatic reply generation.
fn should_auto_respond(conversation: &Conversation) -> bool {
    conversation.mode == MODE_AI
}

fn valid_mode(mode: &str) -> bool {
    mode == MODE_AI || mode == MODE_HUMAN
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

async fn auth_tenant_from_headers(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<String, (StatusCode, Json<Value>)> {
    let Some(token) = bearer_token(headers) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing bearer token" })),
        ));
    };
    let tenant_id = sqlx::query_scalar::<_, String>("SELECT id FROM tenants WHERE api_token = $1")
        .bind(&token)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;
    tenant_id.ok_or((
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid api token" })),
    ))
}

async fn get_business_db(pool: &PgPool, tenant_id: &str) -> Option<Business> {
    let row = sqlx::query(
        "SELECT tenant_id, company_name, description, email, phone, address, faqs, \
                payment_details, discounts, policy, created_at, updated_at \
         FROM businesses WHERE tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;
    Some(Business {
        tenant_id: row.get("tenant_id"),
        company_name: row.get("company_name"),
        description: row.get("description"),
        email: row.get("email"),
        phone: row.get("phone"),
        address: row.get("address"),
        faqs: row.get("faqs"),
        payment_details: row.get("payment_details"),
        discounts: row.get("discounts"),
        policy: row.get("policy"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

async fn get_assistant_db(pool: &PgPool, tenant_id: &str) -> Option<AssistantConfig> {
    let row = sqlx::query(
        "SELECT tenant_id, name, persona, guidelines, intro_message, response_length, \
                created_at, updated_at \
         FROM assistant_configs WHERE tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;
    Some(AssistantConfig {
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        persona: row.get("persona"),
        guidelines: row.get("guidelines"),
        intro_message: row.get("intro_message"),
        response_length: row.get("response_length"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn parse_product_row(row: sqlx::postgres::PgRow) -> Product {
    Product {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        description: row.get("description"),
        price: row.get("price"),
        discounts: row.get("discounts"),
        payment_terms: row.get("payment_terms"),
        policy: row.get("policy"),
        faqs: row.get("faqs"),
        image_urls: serde_json::from_str::<Vec<String>>(&row.get::<String, _>("image_urls"))
            .unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn get_products_db(pool: &PgPool, tenant_id: &str) -> Vec<Product> {
    let rows = sqlx::query(
        "SELECT id, tenant_id, name, description, price, discounts, payment_terms, policy, \
                faqs, image_urls, created_at, updated_at \
         FROM products WHERE tenant_id = $1 ORDER BY created_at ASC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    rows.into_iter().map(parse_product_row).collect()
}

async fn get_product_db(pool: &PgPool, tenant_id: &str, product_id: &str) -> Option<Product> {
    let row = sqlx::query(
        "SELECT id, tenant_id, name, description, price, discounts, payment_terms, policy, \
                faqs, image_urls, created_at, updated_at \
         FROM products WHERE id = $1 AND tenant_id = $2",
    )
    .bind(product_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;
    Some(parse_product_row(row))
}

async fn persist_product(pool: &PgPool, product: &Product) {
    let image_urls =
        serde_json::to_string(&product.image_urls).unwrap_or_else(|_| "[]".to_string());
    let _ = sqlx::query(
        r#"
        INSERT INTO products (id, tenant_id, name, description, price, discounts, payment_terms,
                              policy, faqs, image_urls, created_at, updated_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            description = EXCLUDED.description,
            price = EXCLUDED.price,
            discounts = EXCLUDED.discounts,
            payment_terms = EXCLUDED.payment_terms,
            policy = EXCLUDED.policy,
            faqs = EXCLUDED.faqs,
            image_urls = EXCLUDED.image_urls,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&product.id)
    .bind(&product.tenant_id)
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.price)
    .bind(&product.discounts)
    .bind(&product.payment_terms)
    .bind(&product.policy)
    .bind(&product.faqs)
    .bind(image_urls)
    .bind(&product.created_at)
    .bind(&product.updated_at)
    .execute(pool)
    .await;
}

async fn get_documents_db(pool: &PgPool, tenant_id: &str) -> Vec<DocumentMeta> {
    let rows = sqlx::query(
        "SELECT id, tenant_id, file_name, file_type, file_size, created_at \
         FROM documents WHERE tenant_id = $1 ORDER BY created_at ASC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    rows.into_iter()
        .map(|row| DocumentMeta {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            file_name: row.get("file_name"),
            file_type: row.get("file_type"),
            file_size: row.get("file_size"),
            created_at: row.get("created_at"),
        })
        .collect()
}

fn parse_channel_row(row: sqlx::postgres::PgRow) -> FacebookChannel {
    FacebookChannel {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        page_id: row.get("page_id"),
        page_name: row.get("page_name"),
        access_token: row.get("access_token"),
        app_secret: row.get("app_secret"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn find_channel_by_page_id(pool: &PgPool, page_id: &str) -> Option<FacebookChannel> {
    let row = sqlx::query(
        "SELECT id, tenant_id, page_id, page_name, access_token, app_secret, enabled, \
                created_at, updated_at \
         FROM facebook_channels WHERE page_id = $1 AND enabled = true \
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(page_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;
    Some(parse_channel_row(row))
}

async fn find_tenant_channel(pool: &PgPool, tenant_id: &str) -> Option<FacebookChannel> {
    let row = sqlx::query(
        "SELECT id, tenant_id, page_id, page_name, access_token, app_secret, enabled, \
                created_at, updated_at \
         FROM facebook_channels WHERE tenant_id = $1 AND enabled = true \
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;
    Some(parse_channel_row(row))
}

fn parse_conversation_row(row: sqlx::postgres::PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        source: row.get("source"),
        counterpart_name: row.get("counterpart_name"),
        counterpart_avatar_url: row.get("counterpart_avatar_url"),
        external_sender_id: row.get("external_sender_id"),
        mode: row.get("mode"),
        status: row.get("status"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const CONVERSATION_COLUMNS: &str =
    "id, tenant_id, source, counterpart_name, counterpart_avatar_url, external_sender_id, \
     mode, status, created_at, updated_at";

async fn get_conversation_db(pool: &PgPool, conversation_id: &str) -> Option<Conversation> {
    let row = sqlx::query(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
    ))
    .bind(conversation_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;
    Some(parse_conversation_row(row))
}

async fn persist_conversation(pool: &PgPool, conversation: &Conversation) {
    let _ = sqlx::query(
        r#"
        INSERT INTO conversations (id, tenant_id, source, counterpart_name,
                                   counterpart_avatar_url, external_sender_id, mode, status,
                                   created_at, updated_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        ON CONFLICT (id) DO UPDATE SET
            counterpart_name = EXCLUDED.counterpart_name,
            counterpart_avatar_url = EXCLUDED.counterpart_avatar_url,
            mode = EXCLUDED.mode,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&conversation.id)
    .bind(&conversation.tenant_id)
    .bind(&conversation.source)
    .bind(&conversation.counterpart_name)
    .bind(&conversation.counterpart_avatar_url)
    .bind(&conversation.external_sender_id)
    .bind(&conversation.mode)
    .bind(&conversation.status)
    .bind(&conversation.created_at)
    .bind(&conversation.updated_at)
    .execute(pool)
    .await;
}

/// Conversations are created lazily on the first inbound message from a new
/// counterpart, always starting in AI mode.
async fn find_or_create_conversation(
    pool: &PgPool,
    tenant_id: &str,
    source: &str,
    external_sender_id: &str,
    counterpart_name: &str,
) -> Conversation {
    if !external_sender_id.is_empty() {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE tenant_id = $1 AND source = $2 AND external_sender_id = $3 LIMIT 1"
        ))
        .bind(tenant_id)
        .bind(source)
        .bind(external_sender_id)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();
        if let Some(row) = row {
            return parse_conversation_row(row);
        }
    }

    let now = now_iso();
    let conversation = Conversation {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        source: source.to_string(),
        counterpart_name: counterpart_name.to_string(),
        counterpart_avatar_url: String::new(),
        external_sender_id: external_sender_id.to_string(),
        mode: MODE_AI.to_string(),
        status: "open".to_string(),
        created_at: now.clone(),
        updated_at: now,
    };
    persist_conversation(pool, &conversation).await;
    conversation
}

fn parse_message_row(row: sqlx::postgres::PgRow) -> ChatMessage {
    ChatMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_type: row.get("sender_type"),
        content: row.get("content"),
        message_type: row.get("message_type"),
        file_url: row.get("file_url"),
        file_name: row.get("file_name"),
        file_size: row.get("file_size"),
        human_agent_id: row.get("human_agent_id"),
        human_agent_name: row
            .get::<Option<String>, _>("human_agent_name")
            .unwrap_or_default(),
        human_agent_avatar_url: row
            .get::<Option<String>, _>("human_agent_avatar_url")
            .unwrap_or_default(),
        read: row.get("read"),
        created_at: row.get("created_at"),
    }
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_type, content, message_type, file_url, file_name, file_size, \
     human_agent_id, human_agent_name, human_agent_avatar_url, read, created_at";

async fn get_conversation_messages_db(pool: &PgPool, conversation_id: &str) -> Vec<ChatMessage> {
    let rows = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
         WHERE conversation_id = $1 ORDER BY created_at ASC"
    ))
    .bind(conversation_id)
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    rows.into_iter().map(parse_message_row).collect()
}

async fn persist_message(pool: &PgPool, message: &ChatMessage) {
    let _ = sqlx::query(
        r#"
        INSERT INTO chat_messages (id, conversation_id, sender_type, content, message_type,
                                   file_url, file_name, file_size, human_agent_id,
                                   human_agent_name, human_agent_avatar_url, read, created_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&message.id)
    .bind(&message.conversation_id)
    .bind(&message.sender_type)
    .bind(&message.content)
    .bind(&message.message_type)
    .bind(&message.file_url)
    .bind(&message.file_name)
    .bind(&message.file_size)
    .bind(&message.human_agent_id)
    .bind(&message.human_agent_name)
    .bind(&message.human_agent_avatar_url)
    .bind(message.read)
    .bind(&message.created_at)
    .execute(pool)
    .await;
}

struct HumanAttribution {
    agent_id: Option<String>,
    agent_name: String,
    agent_avatar_url: String,
}

/// Append a message to a conversation. Messages are immutable once written;
/// the conversation's updated_at is bumped so inbox ordering follows activity.
async fn append_message(
    state: &Arc<AppState>,
    conversation_id: &str,
    sender_type: &str,
    content: &str,
    file: Option<(String, Option<String>, Option<i64>)>,
    human: Option<HumanAttribution>,
) -> Option<ChatMessage> {
    let trimmed = content.trim();
    if trimmed.is_empty() && file.is_none() {
        return None;
    }

    let (message_type, file_url, file_name, file_size) = match file {
        Some((url, name, size)) => ("file".to_string(), Some(url), name, size),
        None => ("text".to_string(), None, None, None),
    };

    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_type: sender_type.to_string(),
        content: trimmed.to_string(),
        message_type,
        file_url,
        file_name,
        file_size,
        human_agent_id: human.as_ref().and_then(|h| h.agent_id.clone()),
        human_agent_name: human
            .as_ref()
            .map(|h| h.agent_name.clone())
            .unwrap_or_default(),
        human_agent_avatar_url: human
            .as_ref()
            .map(|h| h.agent_avatar_url.clone())
            .unwrap_or_default(),
        read: sender_type != SENDER_CUSTOMER,
        created_at: now_iso(),
    };

    let _ = sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
        .bind(&message.created_at)
        .bind(conversation_id)
        .execute(&state.db)
        .await;
    persist_message(&state.db, &message).await;
    Some(message)
}

struct TenantSnapshot {
    business: Option<Business>,
    assistant: Option<AssistantConfig>,
    products: Vec<Product>,
    documents: Vec<DocumentMeta>,
}

impl TenantSnapshot {
    fn context(&self) -> TenantContext<'_> {
        TenantContext {
            business: self.business.as_ref(),
            assistant: self.assistant.as_ref(),
            products: &self.products,
            documents: &self.documents,
        }
    }
}

/// Load the tenant's current data fresh from the database. The knowledge base
/// is compiled from this snapshot on every request; nothing is cached across
/// tenant edits.
async fn load_tenant_snapshot(pool: &PgPool, tenant_id: &str) -> TenantSnapshot {
    TenantSnapshot {
        business: get_business_db(pool, tenant_id).await,
        assistant: get_assistant_db(pool, tenant_id).await,
        products: get_products_db(pool, tenant_id).await,
        documents: get_documents_db(pool, tenant_id).await,
    }
}

/// Generate and persist the AI reply for an already-persisted customer
/// message, then fan it out to the conversation's external channel. Called
/// after the mode gate; the inbound message itself is never dropped by mode.
async fn respond_to_customer_message(
    state: Arc<AppState>,
    conversation: Conversation,
    customer_text: String,
) {
    let snapshot = load_tenant_snapshot(&state.db, &conversation.tenant_id).await;
    let history = get_conversation_messages_db(&state.db, &conversation.id).await;
    let reply = generate_reply(&state, &snapshot.context(), &history, &customer_text).await;

    let Some(message) =
        append_message(&state, &conversation.id, SENDER_AI, &reply, None, None).await
    else {
        return;
    };

    if conversation.source == SOURCE_FACEBOOK {
        let Some(channel) = find_tenant_channel(&state.db, &conversation.tenant_id).await else {
            eprintln!(
                "[facebook] no enabled channel for tenant {}, reply stored only",
                conversation.tenant_id
            );
            return;
        };
        let selected =
            select_products_for_images(&snapshot.products, &customer_text, &message.content);
        let image_urls: Vec<String> = selected
            .iter()
            .flat_map(|p| p.image_urls.iter().cloned())
            .collect();
        let result = deliver_to_messenger(
            &state,
            &channel,
            &conversation.external_sender_id,
            &message.content,
            &image_urls,
        )
        .await;
        if !result.failures.is_empty() {
            eprintln!(
                "[facebook] delivery incomplete for conversation {}: {} failure(s)",
                conversation.id,
                result.failures.len()
            );
        }
    }
}

async fn post_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message is required" })),
        )
            .into_response();
    }

    let conversation = match &body.conversation_id {
        Some(id) => {
            let Some(conversation) = get_conversation_db(&state.db, id).await else {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "conversation not found" })),
                )
                    .into_response();
            };
            if conversation.tenant_id != tenant_id {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "conversation not found" })),
                )
                    .into_response();
            }
            conversation
        }
        None => {
            find_or_create_conversation(&state.db, &tenant_id, SOURCE_WEB, "", "Web visitor").await
        }
    };

    // The inbound message is durably stored before the mode check; human mode
    // only suppresses the automatic answer, never the message itself.
    let _ = append_message(
        &state,
        &conversation.id,
        SENDER_CUSTOMER,
        &body.message,
        None,
        None,
    )
    .await;

    if !should_auto_respond(&conversation) {
        return (
            StatusCode::OK,
            Json(json!({
                "message": Value::Null,
                "conversationId": conversation.id,
                "images": []
            })),
        )
            .into_response();
    }

    let snapshot = load_tenant_snapshot(&state.db, &tenant_id).await;
    let history = get_conversation_messages_db(&state.db, &conversation.id).await;
    let reply = generate_reply(&state, &snapshot.context(), &history, &body.message).await;
    let _ = append_message(&state, &conversation.id, SENDER_AI, &reply, None, None).await;

    let selected = select_products_for_images(&snapshot.products, &body.message, &reply);
    let images: Vec<String> = selected
        .iter()
        .flat_map(|p| p.image_urls.iter().cloned())
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "message": reply,
            "conversationId": conversation.id,
            "images": images
        })),
    )
        .into_response()
}

/// Dry-run chat for assistant-configuration preview: same reply pipeline
/// against the current knowledge base, zero persistence.
async fn post_chat_test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message is required" })),
        )
            .into_response();
    }

    let snapshot = load_tenant_snapshot(&state.db, &tenant_id).await;
    let reply = generate_reply(&state, &snapshot.context(), &[], &body.message).await;
    let selected = select_products_for_images(&snapshot.products, &body.message, &reply);
    let images: Vec<String> = selected
        .iter()
        .flat_map(|p| p.image_urls.iter().cloned())
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "message": reply,
            "conversationId": Value::Null,
            "images": images
        })),
    )
        .into_response()
}

async fn facebook_webhook_verify(
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").cloned().unwrap_or_default();
    let verify_token = params.get("hub.verify_token").cloned().unwrap_or_default();
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
    if mode.is_empty() || verify_token.is_empty() || challenge.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing hub parameters" })),
        )
            .into_response();
    }

    let expected = env::var("FACEBOOK_VERIFY_TOKEN").unwrap_or_default();
    if mode == "subscribe" && !expected.is_empty() && verify_token == expected {
        return (StatusCode::OK, challenge).into_response();
    }

    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid webhook verification token" })),
    )
        .into_response()
}

/// Page webhook events. The 200 ack is decoupled from business handling: the
/// platform gets its ack regardless of whether any event resolved to a tenant.
async fn facebook_webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));
    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());

    let mut processed = 0usize;
    for event in parse_webhook_events(&payload) {
        let Some(channel) = find_channel_by_page_id(&state.db, &event.page_id).await else {
            // Unknown or disconnected page: ignore silently, still ack.
            continue;
        };
        if !verify_webhook_signature(&channel.app_secret, signature_header, &body) {
            eprintln!(
                "[webhook] signature mismatch for page {}, event dropped",
                event.page_id
            );
            continue;
        }

        let conversation = find_or_create_conversation(
            &state.db,
            &channel.tenant_id,
            SOURCE_FACEBOOK,
            &event.sender_id,
            "Messenger user",
        )
        .await;

        let persisted = append_message(
            &state,
            &conversation.id,
            SENDER_CUSTOMER,
            &event.text,
            None,
            None,
        )
        .await
        .is_some();
        if !persisted {
            continue;
        }
        processed += 1;

        if should_auto_respond(&conversation) {
            let state_clone = state.clone();
            let text = event.text.clone();
            tokio::spawn(async move {
                respond_to_customer_message(state_clone, conversation, text).await;
            });
        }
    }

    (
        StatusCode::OK,
        Json(json!({ "received": true, "processed": processed })),
    )
        .into_response()
}

async fn patch_conversation_mode(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConversationModeBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if !valid_mode(&body.mode) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "mode must be \"ai\" or \"human\"" })),
        )
            .into_response();
    }

    let Some(mut conversation) = get_conversation_db(&state.db, &conversation_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "conversation not found" })),
        )
            .into_response();
    };
    if conversation.tenant_id != tenant_id {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "conversation not found" })),
        )
            .into_response();
    }

    // Pure metadata change: stored messages are untouched.
    let _ = sqlx::query("UPDATE conversations SET mode = $1, updated_at = $2 WHERE id = $3")
        .bind(&body.mode)
        .bind(now_iso())
        .bind(&conversation_id)
        .execute(&state.db)
        .await;
    conversation.mode = body.mode;

    (StatusCode::OK, Json(json!({ "conversation": conversation }))).into_response()
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if body.content.trim().is_empty() && body.file_url.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "content is required" })),
        )
            .into_response();
    }
    if body.sender_type != SENDER_HUMAN && body.sender_type != SENDER_CUSTOMER {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "senderType must be \"customer\" or \"human\"" })),
        )
            .into_response();
    }

    let Some(conversation) = get_conversation_db(&state.db, &body.conversation_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "conversation not found" })),
        )
            .into_response();
    };
    if conversation.tenant_id != tenant_id {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "conversation not found" })),
        )
            .into_response();
    }

    // Attribution is captured at send time, not a live reference.
    let human = (body.sender_type == SENDER_HUMAN).then(|| HumanAttribution {
        agent_id: body.human_agent_id.clone(),
        agent_name: body.human_agent_name.clone().unwrap_or_default(),
        agent_avatar_url: body.human_agent_avatar_url.clone().unwrap_or_default(),
    });
    let file = body
        .file_url
        .clone()
        .map(|url| (url, body.file_name.clone(), body.file_size));

    let Some(message) = append_message(
        &state,
        &conversation.id,
        &body.sender_type,
        &body.content,
        file,
        human,
    )
    .await
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unable to create message" })),
        )
            .into_response();
    };

    // Human sends are permitted in either mode and never change the mode;
    // they still fan out to the external channel.
    if body.sender_type == SENDER_HUMAN && conversation.source == SOURCE_FACEBOOK {
        let state_clone = state.clone();
        let message_clone = message.clone();
        let conversation_clone = conversation.clone();
        tokio::spawn(async move {
            let Some(channel) =
                find_tenant_channel(&state_clone.db, &conversation_clone.tenant_id).await
            else {
                eprintln!(
                    "[facebook] no enabled channel for tenant {}, message stored only",
                    conversation_clone.tenant_id
                );
                return;
            };
            let image_urls: Vec<String> = message_clone.file_url.clone().into_iter().collect();
            let result = deliver_to_messenger(
                &state_clone,
                &channel,
                &conversation_clone.external_sender_id,
                &message_clone.content,
                &image_urls,
            )
            .await;
            if !result.failures.is_empty() {
                eprintln!(
                    "[facebook] delivery incomplete for conversation {}: {} failure(s)",
                    conversation_clone.id,
                    result.failures.len()
                );
            }
        });
    }

    (StatusCode::CREATED, Json(json!({ "message": message }))).into_response()
}

async fn get_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let rows = sqlx::query(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations \
         WHERE tenant_id = $1 ORDER BY updated_at DESC"
    ))
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();
    let conversations: Vec<Conversation> =
        rows.into_iter().map(parse_conversation_row).collect();
    Json(json!({ "conversations": conversations })).into_response()
}

async fn get_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let Some(conversation) = get_conversation_db(&state.db, &conversation_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "conversation not found" })),
        )
            .into_response();
    };
    if conversation.tenant_id != tenant_id {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "conversation not found" })),
        )
            .into_response();
    }
    let messages = get_conversation_messages_db(&state.db, &conversation_id).await;
    Json(json!({ "messages": messages })).into_response()
}

async fn mark_conversation_read(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let result = sqlx::query(
        "UPDATE chat_messages SET read = true \
         WHERE conversation_id = $1 \
           AND EXISTS (SELECT 1 FROM conversations WHERE id = $1 AND tenant_id = $2)",
    )
    .bind(&conversation_id)
    .bind(&tenant_id)
    .execute(&state.db)
    .await;
    match result {
        Ok(done) => Json(json!({ "updated": done.rows_affected() })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn create_tenant(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tenant_id = Uuid::new_v4().to_string();
    let api_token = Uuid::new_v4().to_string();
    let result = sqlx::query("INSERT INTO tenants (id, api_token, created_at) VALUES ($1,$2,$3)")
        .bind(&tenant_id)
        .bind(&api_token)
        .bind(now_iso())
        .execute(&state.db)
        .await;
    match result {
        Ok(_) => (
            StatusCode::CREATED,
            Json(json!({ "tenantId": tenant_id, "apiToken": api_token })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn get_business(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match get_business_db(&state.db, &tenant_id).await {
        Some(business) => Json(json!({ "business": business })).into_response(),
        None => Json(json!({ "business": Value::Null })).into_response(),
    }
}

async fn put_business(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SaveBusinessBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let now = now_iso();
    let _ = sqlx::query(
        r#"
        INSERT INTO businesses (tenant_id, company_name, description, email, phone, address,
                                faqs, payment_details, discounts, policy, created_at, updated_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$11)
        ON CONFLICT (tenant_id) DO UPDATE SET
            company_name = EXCLUDED.company_name,
            description = EXCLUDED.description,
            email = EXCLUDED.email,
            phone = EXCLUDED.phone,
            address = EXCLUDED.address,
            faqs = EXCLUDED.faqs,
            payment_details = EXCLUDED.payment_details,
            discounts = EXCLUDED.discounts,
            policy = EXCLUDED.policy,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&tenant_id)
    .bind(body.company_name.trim())
    .bind(body.description.trim())
    .bind(body.email.trim())
    .bind(body.phone.trim())
    .bind(body.address.trim())
    .bind(&body.faqs)
    .bind(body.payment_details.trim())
    .bind(body.discounts.trim())
    .bind(body.policy.trim())
    .bind(&now)
    .execute(&state.db)
    .await;

    match get_business_db(&state.db, &tenant_id).await {
        Some(business) => Json(json!({ "business": business })).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to save business" })),
        )
            .into_response(),
    }
}

async fn get_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match get_assistant_db(&state.db, &tenant_id).await {
        Some(assistant) => Json(json!({ "assistant": assistant })).into_response(),
        None => Json(json!({ "assistant": Value::Null })).into_response(),
    }
}

async fn put_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SaveAssistantBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let response_length = match body.response_length.trim() {
        "short" | "long" => body.response_length.trim().to_string(),
        _ => "normal".to_string(),
    };
    let now = now_iso();
    let _ = sqlx::query(
        r#"
        INSERT INTO assistant_configs (tenant_id, name, persona, guidelines, intro_message,
                                       response_length, created_at, updated_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$7)
        ON CONFLICT (tenant_id) DO UPDATE SET
            name = EXCLUDED.name,
            persona = EXCLUDED.persona,
            guidelines = EXCLUDED.guidelines,
            intro_message = EXCLUDED.intro_message,
            response_length = EXCLUDED.response_length,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&tenant_id)
    .bind(body.name.trim())
    .bind(body.persona.trim())
    .bind(body.guidelines.trim())
    .bind(body.intro_message.trim())
    .bind(&response_length)
    .bind(&now)
    .execute(&state.db)
    .await;

    match get_assistant_db(&state.db, &tenant_id).await {
        Some(assistant) => Json(json!({ "assistant": assistant })).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to save assistant" })),
        )
            .into_response(),
    }
}

async fn get_products(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let products = get_products_db(&state.db, &tenant_id).await;
    Json(json!({ "products": products })).into_response()
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateProductBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if body.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "name is required" })),
        )
            .into_response();
    }

    let now = now_iso();
    let product = Product {
        id: Uuid::new_v4().to_string(),
        tenant_id,
        name: body.name.trim().to_string(),
        description: body.description.trim().to_string(),
        price: sanitize_price(&body.price),
        discounts: body.discounts.trim().to_string(),
        payment_terms: body.payment_terms.trim().to_string(),
        policy: body.policy.trim().to_string(),
        faqs: body.faqs,
        image_urls: body.image_urls,
        created_at: now.clone(),
        updated_at: now,
    };
    persist_product(&state.db, &product).await;
    (StatusCode::CREATED, Json(json!({ "product": product }))).into_response()
}

async fn update_product(
    Path(product_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateProductBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let Some(mut product) = get_product_db(&state.db, &tenant_id, &product_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "product not found" })),
        )
            .into_response();
    };

    if let Some(name) = body.name {
        if name.trim().is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "name cannot be empty" })),
            )
                .into_response();
        }
        product.name = name.trim().to_string();
    }
    if let Some(description) = body.description {
        product.description = description.trim().to_string();
    }
    if let Some(price) = body.price {
        product.price = sanitize_price(&price);
    }
    if let Some(discounts) = body.discounts {
        product.discounts = discounts.trim().to_string();
    }
    if let Some(payment_terms) = body.payment_terms {
        product.payment_terms = payment_terms.trim().to_string();
    }
    if let Some(policy) = body.policy {
        product.policy = policy.trim().to_string();
    }
    if let Some(faqs) = body.faqs {
        product.faqs = faqs;
    }
    if let Some(image_urls) = body.image_urls {
        product.image_urls = image_urls;
    }
    product.updated_at = now_iso();

    persist_product(&state.db, &product).await;
    Json(json!({ "product": product })).into_response()
}

async fn delete_product(
    Path(product_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let result = sqlx::query("DELETE FROM products WHERE id = $1 AND tenant_id = $2")
        .bind(&product_id)
        .bind(&tenant_id)
        .execute(&state.db)
        .await;
    match result {
        Ok(done) if done.rows_affected() > 0 => Json(json!({ "deleted": true })).into_response(),
        Ok(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "product not found" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn get_documents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let documents = get_documents_db(&state.db, &tenant_id).await;
    Json(json!({ "documents": documents })).into_response()
}

async fn create_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateDocumentBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if body.file_name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "fileName is required" })),
        )
            .into_response();
    }
    let document = DocumentMeta {
        id: Uuid::new_v4().to_string(),
        tenant_id,
        file_name: body.file_name.trim().to_string(),
        file_type: body.file_type.trim().to_string(),
        file_size: body.file_size,
        created_at: now_iso(),
    };
    let _ = sqlx::query(
        "INSERT INTO documents (id, tenant_id, file_name, file_type, file_size, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(&document.id)
    .bind(&document.tenant_id)
    .bind(&document.file_name)
    .bind(&document.file_type)
    .bind(document.file_size)
    .bind(&document.created_at)
    .execute(&state.db)
    .await;
    (StatusCode::CREATED, Json(json!({ "document": document }))).into_response()
}

async fn delete_document(
    Path(document_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND tenant_id = $2")
        .bind(&document_id)
        .bind(&tenant_id)
        .execute(&state.db)
        .await;
    match result {
        Ok(done) if done.rows_affected() > 0 => Json(json!({ "deleted": true })).into_response(),
        Ok(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "document not found" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn list_facebook_channels(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let rows = sqlx::query(
        "SELECT id, tenant_id, page_id, page_name, access_token, app_secret, enabled, \
                created_at, updated_at \
         FROM facebook_channels WHERE tenant_id = $1 ORDER BY created_at ASC",
    )
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();
    let channels: Vec<FacebookChannel> = rows.into_iter().map(parse_channel_row).collect();
    Json(json!({ "channels": channels })).into_response()
}

async fn connect_facebook_channel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConnectFacebookBody>,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if body.page_id.trim().is_empty() || body.access_token.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "pageId and accessToken are required" })),
        )
            .into_response();
    }

    let now = now_iso();
    let channel = FacebookChannel {
        id: Uuid::new_v4().to_string(),
        tenant_id,
        page_id: body.page_id.trim().to_string(),
        page_name: body.page_name.trim().to_string(),
        access_token: body.access_token.trim().to_string(),
        app_secret: body.app_secret.trim().to_string(),
        enabled: true,
        created_at: now.clone(),
        updated_at: now,
    };
    let result = sqlx::query(
        r#"
        INSERT INTO facebook_channels (id, tenant_id, page_id, page_name, access_token,
                                       app_secret, enabled, created_at, updated_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        ON CONFLICT (page_id) DO UPDATE SET
            tenant_id = EXCLUDED.tenant_id,
            page_name = EXCLUDED.page_name,
            access_token = EXCLUDED.access_token,
            app_secret = EXCLUDED.app_secret,
            enabled = EXCLUDED.enabled,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&channel.id)
    .bind(&channel.tenant_id)
    .bind(&channel.page_id)
    .bind(&channel.page_name)
    .bind(&channel.access_token)
    .bind(&channel.app_secret)
    .bind(channel.enabled)
    .bind(&channel.created_at)
    .bind(&channel.updated_at)
    .execute(&state.db)
    .await;

    match result {
        Ok(_) => (StatusCode::CREATED, Json(json!({ "channel": channel }))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn disconnect_facebook_channel(
    Path(channel_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let tenant_id = match auth_tenant_from_headers(&state, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let result = sqlx::query("DELETE FROM facebook_channels WHERE id = $1 AND tenant_id = $2")
        .bind(&channel_id)
        .bind(&tenant_id)
        .execute(&state.db)
        .await;
    match result {
        Ok(done) if done.rows_affected() > 0 => Json(json!({ "deleted": true })).into_response(),
        Ok(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "channel not found" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

pub async fn run() {
    let _ = dotenvy::dotenv();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(4000);
    let database_url = resolve_database_url();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");

    // One shared client; the timeout bounds the language-model call so a hung
    // upstream trips the fallback instead of stalling the request.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build http client");

    let state = Arc::new(AppState { db, http });

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/tenants", post(create_tenant))
        .route("/api/business", get(get_business).put(put_business))
        .route("/api/assistant", get(get_assistant).put(put_assistant))
        .route("/api/products", get(get_products).post(create_product))
        .route(
            "/api/products/{product_id}",
            patch(update_product).delete(delete_product),
        )
        .route("/api/documents", get(get_documents).post(create_document))
        .route("/api/documents/{document_id}", delete(delete_document))
        .route(
            "/api/channels/facebook",
            get(list_facebook_channels).post(connect_facebook_channel),
        )
        .route(
            "/api/channels/facebook/{channel_id}",
            delete(disconnect_facebook_channel),
        )
        .route("/api/chat", post(post_chat))
        .route("/api/chat/test", post(post_chat_test))
        .route(
            "/api/facebook/webhook",
            get(facebook_webhook_verify).post(facebook_webhook_event),
        )
        .route("/api/conversations", get(get_conversations))
        .route(
            "/api/conversations/{conversation_id}/mode",
            patch(patch_conversation_mode),
        )
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(get_messages),
        )
        .route(
            "/api/conversations/{conversation_id}/read",
            post(mark_conversation_read),
        )
        .route("/api/messages", post(post_message))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    println!("minechat server running at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(mode: &str) -> Conversation {
        Conversation {
            id: "c1".to_string(),
            tenant_id: "t1".to_string(),
            source: SOURCE_WEB.to_string(),
            counterpart_name: "Web visitor".to_string(),
            counterpart_avatar_url: String::new(),
            external_sender_id: String::new(),
            mode: mode.to_string(),
            status: "open".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn ai_mode_is_the_sole_gate_on_auto_response() {
        assert!(should_auto_respond(&conversation(MODE_AI)));
        assert!(!should_auto_respond(&conversation(MODE_HUMAN)));
    }

    #[test]
    fn only_known_mode_values_are_valid() {
        assert!(valid_mode("ai"));
        assert!(valid_mode("human"));
        assert!(!valid_mode("auto"));
        assert!(!valid_mode(""));
        assert!(!valid_mode("AI"));
    }

    #[test]
    fn bearer_token_parses_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc-123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc-123".to_string()));

        let mut bad = HeaderMap::new();
        bad.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&bad), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
