use minijinja::{context, Environment};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");

/// The fixed sentence the model must emit when the knowledge base does not
/// contain an answer. Kept as one constant so tests and prompt stay in sync.
pub const REFUSAL_SENTENCE: &str =
    "I'm sorry, I don't have that information available right now. Please contact us directly and we'll be happy to help.";

pub const DEFAULT_ASSISTANT_NAME: &str = "AI Assistant";

pub struct SystemPromptContext<'a> {
    pub assistant_name: &'a str,
    pub company_name: &'a str,
    pub persona: &'a str,
    pub guidelines: &'a str,
    pub intro_message: &'a str,
    pub knowledge_base: &'a str,
}

/// Produce the full system prompt: identity line, closed-world grounding
/// rules (with the fixed refusal sentence), the compiled knowledge base
/// verbatim, then response-formatting rules. The grounding rules are present
/// even when every context field is empty.
pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            assistant_name => display_assistant_name(ctx.assistant_name),
            company_name => ctx.company_name.trim(),
            persona => ctx.persona.trim(),
            guidelines => ctx.guidelines.trim(),
            intro_message => ctx.intro_message.trim(),
            knowledge_base => display_knowledge_base(ctx.knowledge_base),
            refusal_sentence => REFUSAL_SENTENCE,
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn display_assistant_name(name: &str) -> &str {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        DEFAULT_ASSISTANT_NAME
    } else {
        trimmed
    }
}

fn display_knowledge_base(knowledge_base: &str) -> &str {
    let trimmed = knowledge_base.trim();
    if trimmed.is_empty() {
        "(no business information has been configured yet)"
    } else {
        trimmed
    }
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut prompt = format!("You are {}", display_assistant_name(ctx.assistant_name));
    if !ctx.company_name.trim().is_empty() {
        prompt.push_str(&format!(
            ", the AI assistant for {}",
            ctx.company_name.trim()
        ));
    }
    prompt.push_str(".\n");

    if !ctx.persona.trim().is_empty() {
        prompt.push_str(&format!("Persona: {}\n", ctx.persona.trim()));
    }
    if !ctx.guidelines.trim().is_empty() {
        prompt.push_str(&format!(
            "Behavioral guidelines: {}\n",
            ctx.guidelines.trim()
        ));
    }

    prompt.push_str(
        "\nSTRICT GROUNDING RULES:\n\
         - Use ONLY the information in the KNOWLEDGE BASE block below to answer questions.\n\
         - NEVER invent, assume, or fabricate business details, prices, policies, or contact information that are not written in the knowledge base.\n",
    );
    prompt.push_str(&format!(
        "- If the knowledge base does not contain the answer, reply exactly: \"{REFUSAL_SENTENCE}\"\n"
    ));

    prompt.push_str("\nKNOWLEDGE BASE:\n");
    prompt.push_str(display_knowledge_base(ctx.knowledge_base));
    prompt.push('\n');

    prompt.push_str(
        "\nRESPONSE RULES:\n\
         - When a customer question matches an FAQ entry, answer with the stored FAQ answer word for word. Do not paraphrase it.\n\
         - For contact or identity questions, use the exact stored email, phone, and address values.\n",
    );
    if !ctx.intro_message.trim().is_empty() {
        prompt.push_str(&format!(
            "- When the customer greets you, respond with: \"{}\"\n",
            ctx.intro_message.trim()
        ));
    }
    prompt.push_str(
        "- Only deflect with a generic offer of help when the question is genuinely unrelated to this business.\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_ctx() -> SystemPromptContext<'static> {
        SystemPromptContext {
            assistant_name: "",
            company_name: "",
            persona: "",
            guidelines: "",
            intro_message: "",
            knowledge_base: "",
        }
    }

    #[test]
    fn empty_context_still_carries_refusal_instruction() {
        let prompt = render_system_prompt(&empty_ctx());
        assert!(prompt.contains(REFUSAL_SENTENCE));
        assert!(prompt.contains("NEVER invent"));
        assert!(prompt.contains("Use ONLY the information"));
    }

    #[test]
    fn fallback_renderer_also_carries_refusal_instruction() {
        let prompt = fallback_system_prompt(&empty_ctx());
        assert!(prompt.contains(REFUSAL_SENTENCE));
        assert!(prompt.contains("NEVER invent"));
    }

    #[test]
    fn knowledge_base_is_embedded_verbatim() {
        let mut ctx = empty_ctx();
        ctx.knowledge_base = "=== BUSINESS INFORMATION ===\nCompany: Acme\nQ: Hours?\nA: 9-5 📞";
        let prompt = render_system_prompt(&ctx);
        assert!(prompt.contains("Company: Acme"));
        assert!(prompt.contains("A: 9-5 📞"));
    }

    #[test]
    fn identity_line_names_assistant_and_company() {
        let mut ctx = empty_ctx();
        ctx.assistant_name = "Mina";
        ctx.company_name = "Acme";
        let prompt = render_system_prompt(&ctx);
        assert!(prompt.starts_with("You are Mina, the AI assistant for Acme."));
    }

    #[test]
    fn missing_assistant_degrades_to_generic_identity() {
        let prompt = render_system_prompt(&empty_ctx());
        assert!(prompt.starts_with("You are AI Assistant"));
    }

    #[test]
    fn intro_message_rule_present_only_when_configured() {
        let mut ctx = empty_ctx();
        ctx.intro_message = "Hi! Welcome to Acme 👋";
        let with_intro = render_system_prompt(&ctx);
        assert!(with_intro.contains("Hi! Welcome to Acme 👋"));

        let without_intro = render_system_prompt(&empty_ctx());
        assert!(!without_intro.contains("greets you, respond with"));
    }
}
