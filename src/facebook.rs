use std::time::Duration;

use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::types::{AppState, FacebookChannel, Product};

const GRAPH_SEND_URL: &str = "https://graph.facebook.com/v21.0/me/messages";

/// Platform rate limits reject bursts of sequential sends; space them out.
const INTER_SEND_DELAY_MS: u64 = 400;

#[derive(Debug, Clone, PartialEq)]
pub struct InboundFacebookMessage {
    /// The page the message was delivered to (`recipient.id`); resolves to a
    /// tenant via the stored channel connection.
    pub page_id: String,
    /// The customer's platform-scoped sender id.
    pub sender_id: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct DeliveryResult {
    pub text_sent: bool,
    pub images_sent: usize,
    pub failures: Vec<String>,
}

pub fn verify_webhook_signature(
    app_secret: &str,
    signature_header: Option<&str>,
    body: &[u8],
) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Flatten a page webhook payload into inbound text messages. Echo events and
/// entries without text are skipped; delivery order from the platform is kept
/// as-is, never resequenced.
pub fn parse_webhook_events(payload: &Value) -> Vec<InboundFacebookMessage> {
    if payload.get("object").and_then(Value::as_str) != Some("page") {
        return vec![];
    }

    let mut inbound = Vec::new();
    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for entry in entries {
        let events = entry
            .get("messaging")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for event in events {
            let sender_id = event
                .pointer("/sender/id")
                .and_then(Value::as_str)
                .unwrap_or("");
            let page_id = event
                .pointer("/recipient/id")
                .and_then(Value::as_str)
                .unwrap_or("");
            let Some(message) = event.get("message") else {
                continue;
            };
            if message
                .get("is_echo")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                continue;
            }
            let text = message
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim();
            if sender_id.is_empty() || page_id.is_empty() || text.is_empty() {
                continue;
            }
            inbound.push(InboundFacebookMessage {
                page_id: page_id.to_string(),
                sender_id: sender_id.to_string(),
                text: text.to_string(),
            });
        }
    }

    inbound
}

fn wants_full_catalog(text: &str) -> bool {
    let Ok(pattern) = Regex::new(
        r"(?i)\b(show\s+(me\s+)?(everything|all)|all\s+(of\s+)?(your\s+)?products|everything\s+you\s+(have|offer|sell))\b",
    ) else {
        return false;
    };
    pattern.is_match(text)
}

/// Decide which product images accompany a reply. A product qualifies when its
/// name appears in the inbound message or in the reply text; a "show me
/// everything" style inbound message includes every product. Products without
/// stored images never qualify, so unrelated photos don't flood the thread.
pub fn select_products_for_images<'a>(
    products: &'a [Product],
    inbound_text: &str,
    reply_text: &str,
) -> Vec<&'a Product> {
    let with_images = || {
        products
            .iter()
            .filter(|p| !p.image_urls.is_empty() && !p.name.trim().is_empty())
    };

    if wants_full_catalog(inbound_text) {
        return with_images().collect();
    }

    let inbound_lower = inbound_text.to_lowercase();
    let reply_lower = reply_text.to_lowercase();
    with_images()
        .filter(|p| {
            let name = p.name.trim().to_lowercase();
            inbound_lower.contains(&name) || reply_lower.contains(&name)
        })
        .collect()
}

pub fn text_payload(access_token: &str, recipient_id: &str, text: &str) -> Value {
    json!({
        "access_token": access_token,
        "recipient": { "id": recipient_id },
        "message": { "text": text }
    })
}

pub fn image_payload(access_token: &str, recipient_id: &str, image_url: &str) -> Value {
    json!({
        "access_token": access_token,
        "recipient": { "id": recipient_id },
        "message": {
            "attachment": {
                "type": "image",
                "payload": { "url": image_url, "is_reusable": true }
            }
        }
    })
}

async fn graph_send(state: &AppState, payload: &Value) -> Result<Value, Value> {
    let response = state
        .http
        .post(GRAPH_SEND_URL)
        .json(payload)
        .send()
        .await
        .map_err(|e| {
            json!({
                "statusCode": 0,
                "statusText": "REQUEST_ERROR",
                "body": { "error": e.to_string() }
            })
        })?;

    let status = response.status();
    let raw_body = response.text().await.unwrap_or_default();
    let body =
        serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({ "raw": raw_body }));
    let result = json!({
        "statusCode": status.as_u16(),
        "statusText": status.to_string(),
        "body": body
    });

    if status.is_success() {
        return Ok(result);
    }
    Err(result)
}

/// Deliver one logical reply to Messenger: images first (sequential calls with
/// a short delay between them), then the text as a trailing call, since the
/// send API does not accept a combined image+caption payload. Failures are logged
/// and collected; the stored message is already the source of truth and is
/// never rolled back. Re-invoking for the same message only resends, so the
/// call is safe to retry.
pub async fn deliver_to_messenger(
    state: &AppState,
    channel: &FacebookChannel,
    recipient_id: &str,
    text: &str,
    image_urls: &[String],
) -> DeliveryResult {
    let mut result = DeliveryResult::default();

    for (index, image_url) in image_urls.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(INTER_SEND_DELAY_MS)).await;
        }
        let payload = image_payload(&channel.access_token, recipient_id, image_url);
        match graph_send(state, &payload).await {
            Ok(_) => result.images_sent += 1,
            Err(err) => {
                eprintln!("[facebook] image send failed for page {}: {err}", channel.page_id);
                result.failures.push(err.to_string());
            }
        }
    }

    if !text.trim().is_empty() {
        if !image_urls.is_empty() {
            tokio::time::sleep(Duration::from_millis(INTER_SEND_DELAY_MS)).await;
        }
        let payload = text_payload(&channel.access_token, recipient_id, text.trim());
        match graph_send(state, &payload).await {
            Ok(_) => result.text_sent = true,
            Err(err) => {
                eprintln!("[facebook] text send failed for page {}: {err}", channel.page_id);
                result.failures.push(err.to_string());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, images: &[&str]) -> Product {
        Product {
            id: format!("p-{name}"),
            tenant_id: "t1".to_string(),
            name: name.to_string(),
            description: String::new(),
            price: String::new(),
            discounts: String::new(),
            payment_terms: String::new(),
            policy: String::new(),
            faqs: String::new(),
            image_urls: images.iter().map(|s| s.to_string()).collect(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_check_accepts_valid_and_rejects_tampered() {
        let body = br#"{"object":"page"}"#;
        let header = sign("secret", body);
        assert!(verify_webhook_signature("secret", Some(&header), body));
        assert!(!verify_webhook_signature("secret", Some(&header), b"other"));
        assert!(!verify_webhook_signature("secret", None, body));
    }

    #[test]
    fn signature_check_is_skipped_without_secret() {
        assert!(verify_webhook_signature("", None, b"anything"));
    }

    #[test]
    fn parse_extracts_text_messages_from_page_payload() {
        let payload = json!({
            "object": "page",
            "entry": [{
                "messaging": [{
                    "sender": { "id": "user-1" },
                    "recipient": { "id": "page-9" },
                    "message": { "text": "hello there" }
                }]
            }]
        });
        let inbound = parse_webhook_events(&payload);
        assert_eq!(
            inbound,
            vec![InboundFacebookMessage {
                page_id: "page-9".to_string(),
                sender_id: "user-1".to_string(),
                text: "hello there".to_string(),
            }]
        );
    }

    #[test]
    fn parse_ignores_non_page_objects_and_echoes() {
        let not_page = json!({ "object": "instagram", "entry": [] });
        assert!(parse_webhook_events(&not_page).is_empty());

        let echo = json!({
            "object": "page",
            "entry": [{
                "messaging": [{
                    "sender": { "id": "page-9" },
                    "recipient": { "id": "user-1" },
                    "message": { "text": "our own reply", "is_echo": true }
                }]
            }]
        });
        assert!(parse_webhook_events(&echo).is_empty());
    }

    #[test]
    fn parse_skips_events_without_text() {
        let payload = json!({
            "object": "page",
            "entry": [{
                "messaging": [
                    { "sender": { "id": "u" }, "recipient": { "id": "p" }, "message": {} },
                    { "sender": { "id": "u" }, "recipient": { "id": "p" }, "postback": { "payload": "x" } }
                ]
            }]
        });
        assert!(parse_webhook_events(&payload).is_empty());
    }

    #[test]
    fn image_selection_matches_product_name_case_insensitively() {
        let products = [
            product("Widget", &["https://img.test/w.png"]),
            product("Gadget", &["https://img.test/g.png"]),
        ];
        let selected = select_products_for_images(&products, "tell me about the WIDGET", "");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "Widget");
    }

    #[test]
    fn image_selection_checks_reply_text_too() {
        let products = [product("Widget", &["https://img.test/w.png"])];
        let selected =
            select_products_for_images(&products, "what do you sell?", "We offer the Widget!");
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn catalog_phrase_selects_all_products_with_images() {
        let products = [
            product("Widget", &["https://img.test/w.png"]),
            product("Gadget", &["https://img.test/g.png"]),
            product("Imageless", &[]),
        ];
        let selected = select_products_for_images(&products, "show me everything you have", "");
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn unrelated_reply_selects_no_images() {
        let products = [product("Widget", &["https://img.test/w.png"])];
        let selected =
            select_products_for_images(&products, "where are you located", "Manila, PH");
        assert!(selected.is_empty());
    }

    #[test]
    fn image_payload_marks_attachment_reusable() {
        let payload = image_payload("tok", "user-1", "https://img.test/w.png");
        assert_eq!(payload["recipient"]["id"], "user-1");
        assert_eq!(payload["message"]["attachment"]["type"], "image");
        assert_eq!(
            payload["message"]["attachment"]["payload"]["is_reusable"],
            true
        );
    }

    #[test]
    fn text_payload_carries_token_and_text() {
        let payload = text_payload("tok", "user-1", "hi");
        assert_eq!(payload["access_token"], "tok");
        assert_eq!(payload["message"]["text"], "hi");
    }
}
