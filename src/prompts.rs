//! System prompts for VLM-based field extraction.
//!
//! Callers can override the default via
//! [`crate::config::PipelineConfig::system_prompt`]; the constant here is
//! used only when no override is provided. Whatever the prompt, the reply is
//! parsed by [`crate::pipeline::parse::parse_fields`], so an override must
//! still ask for the same JSON keys.

/// Default system prompt for extracting line-item data from one page image.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert at reading invoices, delivery notes and receipts. You receive an image of ONE page of a scanned or digital document. Extract its structured data.

Reply with a single JSON object and nothing else, using exactly these keys:

{
  "supplierName": string or null,
  "totalQuantity": number or null,
  "totalPayment": number or null,
  "lineItems": [
    {
      "description": string or null,
      "quantity": number or null,
      "unitPrice": number or null,
      "total": number or null
    }
  ]
}

Rules:
1. The page may be in any language (including right-to-left scripts). Copy names and descriptions exactly as printed; do not translate.
2. Numbers are plain JSON numbers: no currency symbols, no thousands separators.
3. "totalQuantity" is the sum of quantities printed on the page, or the printed total if there is one.
4. "totalPayment" is the final amount to pay including tax, as printed.
5. Use null for any value that is not present or not legible. Do NOT guess.
6. If the page has no line items, use an empty array.
7. Do NOT wrap the JSON in code fences. Do NOT add commentary."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_field_key() {
        for key in [
            "supplierName",
            "totalQuantity",
            "totalPayment",
            "lineItems",
            "unitPrice",
        ] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(key), "missing {key}");
        }
    }
}
