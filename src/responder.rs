use serde_json::{json, Value};

use crate::knowledge::{compile_knowledge_base, parse_faqs, FaqEntry};
use crate::prompting::{render_system_prompt, SystemPromptContext};
use crate::types::{
    AppState, AssistantConfig, Business, ChatMessage, DocumentMeta, Product, SENDER_CUSTOMER,
};

/// How many prior turns are replayed to the model.
const HISTORY_TURNS: usize = 10;

/// Fixed moderate temperature: natural phrasing, content constrained by the
/// closed-world system prompt.
const CHAT_TEMPERATURE: f64 = 0.7;

/// Everything the responder needs about one tenant, loaded fresh per request.
pub struct TenantContext<'a> {
    pub business: Option<&'a Business>,
    pub assistant: Option<&'a AssistantConfig>,
    pub products: &'a [Product],
    pub documents: &'a [DocumentMeta],
}

impl TenantContext<'_> {
    pub fn company_name(&self) -> &str {
        self.business
            .map(|b| b.company_name.trim())
            .unwrap_or_default()
    }
}

/// short/normal/long response length maps to a max-token budget.
pub fn max_tokens_for(response_length: &str) -> u32 {
    match response_length.trim() {
        "short" => 150,
        "long" => 600,
        _ => 300,
    }
}

pub fn build_system_prompt(ctx: &TenantContext<'_>) -> String {
    let knowledge_base = compile_knowledge_base(
        ctx.business,
        ctx.assistant,
        ctx.products,
        ctx.documents,
    );
    render_system_prompt(&SystemPromptContext {
        assistant_name: ctx.assistant.map(|a| a.name.as_str()).unwrap_or(""),
        company_name: ctx.company_name(),
        persona: ctx.assistant.map(|a| a.persona.as_str()).unwrap_or(""),
        guidelines: ctx.assistant.map(|a| a.guidelines.as_str()).unwrap_or(""),
        intro_message: ctx
            .assistant
            .map(|a| a.intro_message.as_str())
            .unwrap_or(""),
        knowledge_base: &knowledge_base,
    })
}

/// Assemble the bounded message list for the completion call. History is
/// replayed only when the tenant has a company name configured; an
/// unconfigured tenant has no real context worth replaying.
pub fn build_chat_messages(
    system_prompt: &str,
    ctx: &TenantContext<'_>,
    history: &[ChatMessage],
    customer_text: &str,
) -> Vec<Value> {
    let mut messages = vec![json!({ "role": "system", "content": system_prompt })];

    if !ctx.company_name().is_empty() {
        let start = history.len().saturating_sub(HISTORY_TURNS);
        for message in &history[start..] {
            if message.content.trim().is_empty() {
                continue;
            }
            let role = if message.sender_type == SENDER_CUSTOMER {
                "user"
            } else {
                "assistant"
            };
            messages.push(json!({ "role": role, "content": message.content }));
        }
    }

    messages.push(json!({ "role": "user", "content": customer_text }));
    messages
}

async fn openai_chat_completion(
    state: &AppState,
    messages: &[Value],
    max_tokens: u32,
) -> Result<String, String> {
    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if api_key.trim().is_empty() {
        return Err("OPENAI_API_KEY not configured".to_string());
    }
    let model = std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let response = state
        .http
        .post("https://api.openai.com/v1/chat/completions")
        .bearer_auth(api_key)
        .json(&json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": CHAT_TEMPERATURE
        }))
        .send()
        .await
        .map_err(|err| format!("openai request failed: {err}"))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("openai returned {status}: {body}"));
    }
    let payload = response
        .json::<Value>()
        .await
        .map_err(|err| format!("openai parse failed: {err}"))?;
    let text = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if text.is_empty() {
        return Err("openai response had empty content".to_string());
    }
    Ok(text)
}

/// Generate a reply for one customer message. The language-model path is the
/// primary one; any transport error, non-success status, timeout, or missing
/// credential drops to the deterministic keyword fallback so the customer
/// request itself never fails.
pub async fn generate_reply(
    state: &AppState,
    ctx: &TenantContext<'_>,
    history: &[ChatMessage],
    customer_text: &str,
) -> String {
    let system_prompt = build_system_prompt(ctx);
    let messages = build_chat_messages(&system_prompt, ctx, history, customer_text);
    let max_tokens = max_tokens_for(
        ctx.assistant
            .map(|a| a.response_length.as_str())
            .unwrap_or(""),
    );

    match openai_chat_completion(state, &messages, max_tokens).await {
        Ok(reply) => reply,
        Err(err) => {
            eprintln!("[ai] completion failed, using fallback responder: {err}");
            fallback_reply(ctx, customer_text)
        }
    }
}

const GREETING_WORDS: [&str; 4] = ["hello", "hi", "hey", "greetings"];
const GREETING_PHRASES: [&str; 3] = ["good morning", "good afternoon", "good evening"];
const PRICING_WORDS: [&str; 6] = ["price", "prices", "pricing", "cost", "rates", "fees"];
const PRODUCT_WORDS: [&str; 7] = [
    "product", "products", "service", "services", "offer", "catalog", "sell",
];
const CONTACT_WORDS: [&str; 8] = [
    "contact", "email", "phone", "address", "location", "located", "reach", "call",
];
const HELP_WORDS: [&str; 3] = ["help", "support", "assist"];

fn words_of(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_word(message_words: &[String], candidates: &[&str]) -> bool {
    message_words.iter().any(|w| candidates.contains(&w.as_str()))
}

fn has_phrase(message: &str, phrases: &[&str]) -> bool {
    let lower = message.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}

const STOP_WORDS: [&str; 24] = [
    "the", "and", "you", "your", "are", "was", "what", "who", "how", "where", "when", "why",
    "can", "could", "for", "with", "that", "this", "does", "have", "about", "please", "tell",
    "much",
];

fn significant_words(text: &str) -> Vec<String> {
    words_of(text)
        .into_iter()
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Match the customer message against stored FAQ questions by significant-word
/// overlap. At least half the question's significant words must appear in the
/// message; the best-scoring entry wins, first entry on ties.
fn best_faq_match(entries: &[FaqEntry], message: &str) -> Option<FaqEntry> {
    let message_words = significant_words(message);
    if message_words.is_empty() {
        return None;
    }

    let mut best: Option<(usize, &FaqEntry)> = None;
    for entry in entries {
        let question_words = significant_words(&entry.question);
        if question_words.is_empty() {
            continue;
        }
        let overlap = question_words
            .iter()
            .filter(|w| message_words.contains(w))
            .count();
        if overlap == 0 || overlap * 2 < question_words.len() {
            continue;
        }
        if best.map(|(score, _)| overlap > score).unwrap_or(true) {
            best = Some((overlap, entry));
        }
    }

    best.map(|(_, entry)| entry.clone())
}

fn tenant_faq_entries(ctx: &TenantContext<'_>) -> Vec<FaqEntry> {
    let mut entries = Vec::new();
    if let Some(business) = ctx.business {
        entries.extend(parse_faqs(&business.faqs));
    }
    for product in ctx.products {
        entries.extend(parse_faqs(&product.faqs));
    }
    entries
}

fn display_company(ctx: &TenantContext<'_>) -> String {
    let name = ctx.company_name();
    if name.is_empty() {
        "our team".to_string()
    } else {
        name.to_string()
    }
}

fn contact_lines(business: &Business) -> String {
    let mut lines = String::new();
    if !business.email.trim().is_empty() {
        lines.push_str(&format!("Email: {}\n", business.email.trim()));
    }
    if !business.phone.trim().is_empty() {
        lines.push_str(&format!("Phone: {}\n", business.phone.trim()));
    }
    if !business.address.trim().is_empty() {
        lines.push_str(&format!("Address: {}\n", business.address.trim()));
    }
    lines
}

fn pricing_list(products: &[Product]) -> String {
    let mut out = String::new();
    for product in products {
        out.push_str(&format!("• {}", product.name.trim()));
        if !product.price.trim().is_empty() {
            out.push_str(&format!(" — {}", product.price.trim()));
        }
        out.push('\n');
        if !product.description.trim().is_empty() {
            out.push_str(&format!("  About: {}\n", product.description.trim()));
        }
        if !product.discounts.trim().is_empty() {
            out.push_str(&format!("  Discounts: {}\n", product.discounts.trim()));
        }
        if !product.payment_terms.trim().is_empty() {
            out.push_str(&format!("  Payment: {}\n", product.payment_terms.trim()));
        }
    }
    out
}

/// Deterministic keyword responder used whenever the language-model call is
/// unavailable. Rules run in priority order and short-circuit on first match;
/// identical inputs always produce byte-identical output.
pub fn fallback_reply(ctx: &TenantContext<'_>, message: &str) -> String {
    let message_words = words_of(message);
    let company = display_company(ctx);

    if has_word(&message_words, &GREETING_WORDS) || has_phrase(message, &GREETING_PHRASES) {
        if let Some(intro) = ctx
            .assistant
            .map(|a| a.intro_message.trim())
            .filter(|m| !m.is_empty())
        {
            return intro.to_string();
        }
        return format!("Hello! Welcome to {company}. How can I help you today?");
    }

    let faq_entries = tenant_faq_entries(ctx);
    if let Some(entry) = best_faq_match(&faq_entries, message) {
        return entry.answer;
    }

    if has_word(&message_words, &PRICING_WORDS) || has_phrase(message, &["how much"]) {
        if ctx.products.is_empty() {
            let contact = ctx.business.map(contact_lines).unwrap_or_default();
            if contact.is_empty() {
                return format!(
                    "Please reach out to {company} directly for current pricing details."
                );
            }
            return format!(
                "Please reach out to {company} directly for current pricing details.\n{contact}"
            );
        }
        return format!("Here's our pricing:\n{}", pricing_list(ctx.products));
    }

    if has_word(&message_words, &PRODUCT_WORDS) && !ctx.products.is_empty() {
        let mut list = String::new();
        for product in ctx.products {
            list.push_str(&format!("• {}", product.name.trim()));
            if !product.description.trim().is_empty() {
                list.push_str(&format!(" — {}", product.description.trim()));
            }
            list.push('\n');
        }
        return format!("Here's what {company} offers:\n{list}");
    }

    if has_word(&message_words, &CONTACT_WORDS) {
        if let Some(contact) = ctx
            .business
            .map(contact_lines)
            .filter(|lines| !lines.is_empty())
        {
            return format!("You can reach {company} here:\n{contact}");
        }
    }

    if has_word(&message_words, &HELP_WORDS) {
        return format!(
            "I'm happy to help! Ask me anything about {company} and I'll do my best to assist."
        );
    }

    if ctx.products.is_empty() {
        format!("Thanks for your message! {company} will get back to you shortly.")
    } else {
        format!(
            "Thanks for your message! Feel free to ask about {company}'s products or pricing."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business() -> Business {
        Business {
            tenant_id: "t1".to_string(),
            company_name: "Acme".to_string(),
            description: String::new(),
            email: "hello@acme.test".to_string(),
            phone: "+63 2 555 0100".to_string(),
            address: String::new(),
            faqs: "### Where are you located?\n\nManila, PH".to_string(),
            payment_details: String::new(),
            discounts: String::new(),
            policy: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn widget() -> Product {
        Product {
            id: "p1".to_string(),
            tenant_id: "t1".to_string(),
            name: "Widget".to_string(),
            description: "A fine widget".to_string(),
            price: "9.99".to_string(),
            discounts: String::new(),
            payment_terms: String::new(),
            policy: String::new(),
            faqs: String::new(),
            image_urls: vec!["https://img.test/widget.png".to_string()],
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn assistant(intro: &str) -> AssistantConfig {
        AssistantConfig {
            tenant_id: "t1".to_string(),
            name: "Mina".to_string(),
            persona: String::new(),
            guidelines: String::new(),
            intro_message: intro.to_string(),
            response_length: "short".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn ctx<'a>(
        business: Option<&'a Business>,
        assistant: Option<&'a AssistantConfig>,
        products: &'a [Product],
    ) -> TenantContext<'a> {
        TenantContext {
            business,
            assistant,
            products,
            documents: &[],
        }
    }

    fn customer_message(content: &str) -> ChatMessage {
        ChatMessage {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            sender_type: SENDER_CUSTOMER.to_string(),
            content: content.to_string(),
            message_type: "text".to_string(),
            file_url: None,
            file_name: None,
            file_size: None,
            human_agent_id: None,
            human_agent_name: String::new(),
            human_agent_avatar_url: String::new(),
            read: false,
            created_at: String::new(),
        }
    }

    #[test]
    fn response_length_maps_to_token_budget() {
        assert_eq!(max_tokens_for("short"), 150);
        assert_eq!(max_tokens_for("normal"), 300);
        assert_eq!(max_tokens_for("long"), 600);
        assert_eq!(max_tokens_for(""), 300);
        assert_eq!(max_tokens_for("huge"), 300);
    }

    #[test]
    fn greeting_uses_configured_intro_message() {
        let asst = assistant("Hi! Welcome to Acme 👋");
        let biz = business();
        let reply = fallback_reply(&ctx(Some(&biz), Some(&asst), &[]), "hello there");
        assert_eq!(reply, "Hi! Welcome to Acme 👋");
    }

    #[test]
    fn greeting_without_intro_generates_one() {
        let biz = business();
        let reply = fallback_reply(&ctx(Some(&biz), None, &[]), "good morning!");
        assert!(reply.contains("Acme"));
    }

    #[test]
    fn faq_answer_is_echoed_verbatim_with_emoji() {
        let mut biz = business();
        biz.faqs = "### What are your hours?\n\nWe are open 9-5 📞".to_string();
        let reply = fallback_reply(&ctx(Some(&biz), None, &[]), "what are your hours?");
        assert_eq!(reply, "We are open 9-5 📞");
    }

    #[test]
    fn location_question_surfaces_faq_answer_not_contact_rule() {
        let biz = business();
        let products = [widget()];
        let reply = fallback_reply(&ctx(Some(&biz), None, &products), "where are you located");
        assert_eq!(reply, "Manila, PH");
    }

    #[test]
    fn pricing_question_enumerates_products() {
        let biz = business();
        let products = [widget()];
        let reply = fallback_reply(&ctx(Some(&biz), None, &products), "how much does it cost?");
        assert!(reply.contains("• Widget — 9.99"));
        assert!(reply.contains("A fine widget"));
    }

    #[test]
    fn pricing_without_products_points_to_contact_info() {
        let biz = business();
        let reply = fallback_reply(&ctx(Some(&biz), None, &[]), "what are your prices?");
        assert!(reply.contains("hello@acme.test"));
        assert!(reply.contains("+63 2 555 0100"));
    }

    #[test]
    fn contact_reply_omits_unset_fields() {
        let biz = business();
        let reply = fallback_reply(&ctx(Some(&biz), None, &[]), "how do I contact you by email?");
        assert!(reply.contains("Email: hello@acme.test"));
        assert!(reply.contains("Phone: +63 2 555 0100"));
        assert!(!reply.contains("Address:"));
    }

    #[test]
    fn product_question_lists_names_and_descriptions() {
        let products = [widget()];
        let reply = fallback_reply(&ctx(None, None, &products), "what services do you offer?");
        assert!(reply.contains("• Widget — A fine widget"));
    }

    #[test]
    fn help_question_names_the_tenant() {
        let biz = business();
        let reply = fallback_reply(&ctx(Some(&biz), None, &[]), "I need some support");
        assert!(reply.contains("Acme"));
    }

    #[test]
    fn default_reply_invites_followup_when_products_exist() {
        let biz = business();
        let products = [widget()];
        let reply = fallback_reply(&ctx(Some(&biz), None, &products), "xyzzy");
        assert!(reply.contains("products or pricing"));
    }

    #[test]
    fn fallback_is_deterministic() {
        let biz = business();
        let products = [widget()];
        let a = fallback_reply(&ctx(Some(&biz), None, &products), "how much is the widget?");
        let b = fallback_reply(&ctx(Some(&biz), None, &products), "how much is the widget?");
        assert_eq!(a, b);
    }

    #[test]
    fn history_replayed_only_with_company_name() {
        let biz = business();
        let history = [customer_message("earlier question")];
        let products: [Product; 0] = [];

        let with_company = build_chat_messages(
            "system",
            &ctx(Some(&biz), None, &products),
            &history,
            "current",
        );
        assert_eq!(with_company.len(), 3);
        assert_eq!(with_company[1]["role"], "user");
        assert_eq!(with_company[1]["content"], "earlier question");

        let without_company = build_chat_messages(
            "system",
            &ctx(None, None, &products),
            &history,
            "current",
        );
        assert_eq!(without_company.len(), 2);
    }

    #[test]
    fn history_maps_ai_and_human_senders_to_assistant_role() {
        let biz = business();
        let mut agent_turn = customer_message("an answer");
        agent_turn.sender_type = "human".to_string();
        let history = [agent_turn];
        let messages = build_chat_messages("system", &ctx(Some(&biz), None, &[]), &history, "hi");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn history_is_bounded_to_recent_turns() {
        let biz = business();
        let history: Vec<ChatMessage> = (0..30)
            .map(|i| customer_message(&format!("turn {i}")))
            .collect();
        let messages = build_chat_messages("system", &ctx(Some(&biz), None, &[]), &history, "now");
        // system + 10 history turns + current message
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[1]["content"], "turn 20");
    }

    #[test]
    fn empty_tenant_prompt_still_refuses_fabrication() {
        let prompt = build_system_prompt(&ctx(None, None, &[]));
        assert!(prompt.contains(crate::prompting::REFUSAL_SENTENCE));
    }
}
