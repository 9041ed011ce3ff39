use crate::types::{AssistantConfig, Business, DocumentMeta, Product};

/// FAQ answers longer than this are cut and suffixed with an ellipsis.
const FAQ_ANSWER_MAX_CHARS: usize = 500;

/// FAQ free text is segmented by this heading marker.
const FAQ_DELIMITER: &str = "### ";

#[derive(Debug, Clone, PartialEq)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

/// Keep digits and the decimal point only, so "$19.99 USD" stores as "19.99".
pub fn sanitize_price(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

/// Split raw FAQ text into question/answer pairs. Each `### ` segment holds a
/// question, a blank line, then the answer. Segments without a blank-line
/// separated answer are dropped rather than errored. Truncation counts chars,
/// not bytes, so emoji and other multi-byte symbols survive intact.
pub fn parse_faqs(raw: &str) -> Vec<FaqEntry> {
    let normalized = raw.replace("\r\n", "\n");
    let mut entries = Vec::new();

    for segment in normalized.split(FAQ_DELIMITER) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some((question, answer)) = segment.split_once("\n\n") else {
            continue;
        };
        let question = question.trim();
        let answer = answer.trim();
        if question.is_empty() || answer.is_empty() {
            continue;
        }
        entries.push(FaqEntry {
            question: question.to_string(),
            answer: truncate_answer(answer),
        });
    }

    entries
}

fn truncate_answer(answer: &str) -> String {
    if answer.chars().count() <= FAQ_ANSWER_MAX_CHARS {
        return answer.to_string();
    }
    let cut: String = answer.chars().take(FAQ_ANSWER_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

fn push_labeled(out: &mut String, label: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    out.push_str(label);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn push_faq_block(out: &mut String, raw: &str) {
    let entries = parse_faqs(raw);
    if entries.is_empty() {
        return;
    }
    out.push_str("FAQ:\n");
    for entry in entries {
        out.push_str("Q: ");
        out.push_str(&entry.question);
        out.push('\n');
        out.push_str("A: ");
        out.push_str(&entry.answer);
        out.push('\n');
    }
}

/// Flatten tenant data into the sectioned plain-text grounding document.
/// Pure string assembly: no I/O, no randomness, recomputed on every request so
/// the compiled text always reflects the tenant's current data. Sections whose
/// backing entity is absent are omitted entirely, never emitted empty.
pub fn compile_knowledge_base(
    business: Option<&Business>,
    assistant: Option<&AssistantConfig>,
    products: &[Product],
    documents: &[DocumentMeta],
) -> String {
    let mut out = String::new();

    if let Some(business) = business {
        out.push_str("=== BUSINESS INFORMATION ===\n");
        push_labeled(&mut out, "Company", &business.company_name);
        push_labeled(&mut out, "About", &business.description);
        push_labeled(&mut out, "Email", &business.email);
        push_labeled(&mut out, "Phone", &business.phone);
        push_labeled(&mut out, "Address", &business.address);
        push_labeled(&mut out, "Payment Details", &business.payment_details);
        push_labeled(&mut out, "Discounts", &business.discounts);
        push_labeled(&mut out, "Policy", &business.policy);
        push_faq_block(&mut out, &business.faqs);
        out.push('\n');
    }

    if let Some(assistant) = assistant {
        out.push_str("=== AI ASSISTANT KNOWLEDGE ===\n");
        push_labeled(&mut out, "Assistant Name", &assistant.name);
        push_labeled(&mut out, "Persona", &assistant.persona);
        push_labeled(&mut out, "Guidelines", &assistant.guidelines);
        push_labeled(&mut out, "Intro Message", &assistant.intro_message);
        out.push('\n');
    }

    if !products.is_empty() {
        out.push_str("=== PRODUCTS/SERVICES ===\n");
        for product in products {
            out.push_str("Product: ");
            out.push_str(product.name.trim());
            out.push('\n');
            push_labeled(&mut out, "Description", &product.description);
            push_labeled(&mut out, "Price", &product.price);
            push_labeled(&mut out, "Discounts", &product.discounts);
            push_labeled(&mut out, "Payment Terms", &product.payment_terms);
            push_labeled(&mut out, "Policy", &product.policy);
            push_faq_block(&mut out, &product.faqs);
        }
        out.push('\n');
    }

    if !documents.is_empty() {
        out.push_str("=== UPLOADED DOCUMENTS ===\n");
        for document in documents {
            out.push_str("- ");
            out.push_str(document.file_name.trim());
            out.push('\n');
        }
        out.push('\n');
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business(faqs: &str) -> Business {
        Business {
            tenant_id: "t1".to_string(),
            company_name: "Acme".to_string(),
            description: String::new(),
            email: "hello@acme.test".to_string(),
            phone: String::new(),
            address: String::new(),
            faqs: faqs.to_string(),
            payment_details: String::new(),
            discounts: String::new(),
            policy: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn product(name: &str, price: &str) -> Product {
        Product {
            id: "p1".to_string(),
            tenant_id: "t1".to_string(),
            name: name.to_string(),
            description: String::new(),
            price: price.to_string(),
            discounts: String::new(),
            payment_terms: String::new(),
            policy: String::new(),
            faqs: String::new(),
            image_urls: vec![],
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn sanitize_price_strips_currency_noise() {
        assert_eq!(sanitize_price("$19.99 USD"), "19.99");
        assert_eq!(sanitize_price("1,250"), "1250");
        assert_eq!(sanitize_price("free"), "");
    }

    #[test]
    fn parse_faqs_splits_on_heading_and_blank_line() {
        let entries = parse_faqs("### What are your hours?\n\nWe are open 9-5 📞");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].question, "What are your hours?");
        assert_eq!(entries[0].answer, "We are open 9-5 📞");
    }

    #[test]
    fn parse_faqs_drops_segments_without_answer() {
        let entries = parse_faqs("### Question without answer\n### Real one?\n\nYes.");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].question, "Real one?");
    }

    #[test]
    fn parse_faqs_keeps_short_answers_untruncated() {
        let entries = parse_faqs("### Short?\n\nWe are open 9-5 📞");
        assert_eq!(entries[0].answer, "We are open 9-5 📞");
        assert!(!entries[0].answer.ends_with("..."));
    }

    #[test]
    fn parse_faqs_truncates_long_answers_on_char_boundary() {
        let long_answer = "📞".repeat(600);
        let raw = format!("### Long?\n\n{long_answer}");
        let entries = parse_faqs(&raw);
        assert!(entries[0].answer.ends_with("..."));
        let body = entries[0].answer.trim_end_matches("...");
        assert_eq!(body.chars().count(), 500);
    }

    #[test]
    fn parse_faqs_handles_crlf_input() {
        let entries = parse_faqs("### Hours?\r\n\r\nNine to five");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].answer, "Nine to five");
    }

    #[test]
    fn empty_inputs_compile_to_empty_text() {
        assert_eq!(compile_knowledge_base(None, None, &[], &[]), "");
    }

    #[test]
    fn absent_entities_have_no_section_at_all() {
        let compiled = compile_knowledge_base(None, None, &[product("Widget", "9.99")], &[]);
        assert!(!compiled.contains("BUSINESS INFORMATION"));
        assert!(!compiled.contains("AI ASSISTANT KNOWLEDGE"));
        assert!(!compiled.contains("UPLOADED DOCUMENTS"));
        assert!(compiled.contains("=== PRODUCTS/SERVICES ==="));
        assert!(compiled.contains("Product: Widget"));
        assert!(compiled.contains("Price: 9.99"));
    }

    #[test]
    fn absent_product_fields_are_omitted_not_empty() {
        let compiled = compile_knowledge_base(None, None, &[product("Widget", "")], &[]);
        assert!(!compiled.contains("Price:"));
        assert!(!compiled.contains("Description:"));
    }

    #[test]
    fn business_faq_is_embedded_verbatim() {
        let biz = business("### Where are you located?\n\nManila, PH");
        let compiled = compile_knowledge_base(Some(&biz), None, &[], &[]);
        assert!(compiled.contains("Q: Where are you located?"));
        assert!(compiled.contains("A: Manila, PH"));
    }

    #[test]
    fn documents_contribute_name_hints_only() {
        let doc = DocumentMeta {
            id: "d1".to_string(),
            tenant_id: "t1".to_string(),
            file_name: "pricing-sheet.pdf".to_string(),
            file_type: "application/pdf".to_string(),
            file_size: 1024,
            created_at: String::new(),
        };
        let compiled = compile_knowledge_base(None, None, &[], &[doc]);
        assert!(compiled.contains("- pricing-sheet.pdf"));
        assert!(!compiled.contains("1024"));
    }

    #[test]
    fn products_enumerate_in_given_order() {
        let first = product("Alpha", "1");
        let mut second = product("Beta", "2");
        second.id = "p2".to_string();
        let compiled = compile_knowledge_base(None, None, &[first, second], &[]);
        let alpha = compiled.find("Product: Alpha").unwrap();
        let beta = compiled.find("Product: Beta").unwrap();
        assert!(alpha < beta);
    }
}
