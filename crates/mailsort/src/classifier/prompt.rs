//! Prompt construction and reply parsing for the generative fallback.

use serde_json::Value;

use super::{ClassificationRequest, ClassifyError, ModelVerdict};

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: i64 = 50;

/// Caps on header-like fields, which arrive unbounded from providers.
const MAX_FIELD_CHARS: usize = 300;
const MAX_ATTACHMENT_NAMES: usize = 20;

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Neutralizes chat-template control sequences in untrusted email text.
fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
}

pub fn build_prompt(request: &ClassificationRequest, body_chars: usize) -> String {
    let body = clip(&request.body_preview, body_chars);
    let attachments = if request.attachment_names.is_empty() {
        String::new()
    } else {
        let mut names: Vec<String> = request
            .attachment_names
            .iter()
            .take(MAX_ATTACHMENT_NAMES)
            .map(|name| clip(name, MAX_FIELD_CHARS))
            .collect();
        let omitted = request.attachment_names.len().saturating_sub(MAX_ATTACHMENT_NAMES);
        if omitted > 0 {
            names.push(format!("... and {} more", omitted));
        }
        format!(
            "Attachment names: {}\n",
            sanitize_for_prompt(&names.join(", "))
        )
    };

    format!(
        r#"You are an expert email triage assistant. Sort the email below into exactly one category.

PRIORITY RULES:
1. "invoice" and "receipt" win whenever the email carries proof of purchase or a payment request, even in a professional exchange.
2. "spam" wins when the content is clearly unwanted.
3. When several categories fit, pick the one most specific to the main content.

Categories:
- invoice: invoices, payment requests (amount, VAT, IBAN, or an attached invoice)
- receipt: receipts, order or payment confirmations
- document: shared files or documents without a financial context
- professional: work exchanges, meetings, projects, HR
- newsletter: recurring editorial content
- promotion: commercial offers, ads, discounts
- social: social network notifications
- notification: system alerts, automatic confirmations (account creation, security)
- personal: family, friends, non-work context
- spam: scams, phishing, junk

OUTPUT:
Reply with ONLY a JSON object, no text before or after it and no markdown fences:
{{"category": "invoice", "confidence": 95, "reason": "Attachment 'invoice_001.pdf' and an amount due."}}

EMAIL:
---
Sender: {sender}
Subject: {subject}
Body (preview): {body}
Has attachments: {has_attachments}
{attachments}---"#,
        sender = sanitize_for_prompt(&clip(&request.sender, MAX_FIELD_CHARS)),
        subject = sanitize_for_prompt(&clip(&request.subject, MAX_FIELD_CHARS)),
        body = sanitize_for_prompt(&body),
        has_attachments = request.has_attachments,
        attachments = attachments,
    )
}

/// Returns the first balanced `{...}` object in `response`, honouring string escapes.
pub fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in response[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&response[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a model reply into a verdict. The category is returned as written;
/// checking it against the category set is the caller's job.
pub fn parse_reply(response: &str) -> Result<ModelVerdict, ClassifyError> {
    let json = extract_json(response).ok_or_else(|| {
        ClassifyError::MalformedResponse(format!("no JSON object in reply: {}", snippet(response)))
    })?;
    let data: Value = serde_json::from_str(json)
        .map_err(|e| ClassifyError::MalformedResponse(format!("{}: {}", e, snippet(json))))?;

    let category = data
        .get("category")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .ok_or_else(|| ClassifyError::MalformedResponse("reply has no category".to_string()))?;

    let confidence = match data.get("confidence") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(DEFAULT_CONFIDENCE),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_CONFIDENCE),
        _ => DEFAULT_CONFIDENCE,
    };

    let rationale = data
        .get("reason")
        .or_else(|| data.get("rationale"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(ModelVerdict {
        category,
        confidence: confidence.clamp(0, 100) as u8,
        rationale,
    })
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}
