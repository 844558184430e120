// =============================================================================
// Decision Parser (C5, extraction half)
// =============================================================================
//
// LLM output is free-form prose followed by a JSON array. This module never
// fails: for any input it returns either a non-empty decision array or a
// single synthetic `wait` carrying a diagnostic reason (testable property 1).
//
// Algorithm:
//   1. Replace smart quotes with ASCII quotes.
//   2. Scan left-to-right for top-level `[...]` blocks, tracking bracket
//      depth and skipping brackets inside JSON strings.
//   3. Reject a block unless its raw text contains `"symbol"` or `"action"`.
//   4. Before decoding, truncate any arithmetic expression found in the
//      numeric fields `{risk_usd, position_size_usd, stop_loss, take_profit,
//      leverage, confidence}` to its leading number.
//   5. Decode as a JSON array; accept the first block that decodes and
//      contains at least one object with a non-empty `symbol`.
//   6. Everything before the accepted block's `[` is the CoT trace.
// =============================================================================

use serde_json::Value;

use crate::types::{Decision, DecisionAction};

/// Numeric fields subject to arithmetic-expression truncation.
const NUMERIC_FIELDS: &[&str] = &[
    "risk_usd",
    "position_size_usd",
    "stop_loss",
    "take_profit",
    "leverage",
    "confidence",
];

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
}

/// Parse one LLM response. Never errors.
pub fn parse(raw_text: &str) -> ParseOutcome {
    let normalized = normalize_quotes(raw_text);

    for (start, end) in find_bracket_blocks(&normalized) {
        let block = &normalized[start..end];
        if !(block.contains("\"symbol\"") || block.contains("\"action\"")) {
            continue;
        }

        let candidate = truncate_arithmetic_expressions(block);
        let Ok(values) = serde_json::from_str::<Vec<Value>>(&candidate) else {
            continue;
        };

        let has_valid_symbol = values.iter().any(|v| {
            v.get("symbol")
                .and_then(|s| s.as_str())
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false)
        });
        if !has_valid_symbol {
            continue;
        }

        let decisions = values.iter().map(decision_from_value).collect();
        let cot_trace = normalized[..start].trim().to_string();
        return ParseOutcome { cot_trace, decisions };
    }

    ParseOutcome {
        cot_trace: normalized.trim().to_string(),
        decisions: vec![Decision::wait(
            "",
            "no trailing JSON decision array found in model response",
        )],
    }
}

fn decision_from_value(v: &Value) -> Decision {
    let symbol = v.get("symbol").and_then(|s| s.as_str()).unwrap_or("").to_string();

    let action = v
        .get("action")
        .and_then(|a| a.as_str())
        .and_then(DecisionAction::from_str_loose);

    let reasoning = v.get("reasoning").and_then(|r| r.as_str()).unwrap_or("").to_string();

    match action {
        Some(action) => Decision {
            symbol,
            action,
            leverage: get_u32(v, "leverage"),
            position_size_usd: get_f64(v, "position_size_usd"),
            stop_loss: get_f64(v, "stop_loss"),
            take_profit: get_f64(v, "take_profit"),
            confidence: get_f64(v, "confidence"),
            risk_usd: get_f64(v, "risk_usd"),
            reasoning,
        },
        None => {
            let raw = v.get("action").and_then(|a| a.as_str()).unwrap_or("<missing>");
            Decision::wait(symbol, format!("unrecognized action field: {raw}"))
        }
    }
}

fn get_f64(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn get_u32(v: &Value, key: &str) -> Option<u32> {
    get_f64(v, key).map(|f| f.round().max(0.0) as u32)
}

/// Replace typographic smart quotes with their ASCII equivalents.
fn normalize_quotes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// Find top-level `[...]` spans (byte offsets), ignoring brackets that
/// appear inside a JSON string literal.
fn find_bracket_blocks(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut blocks = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        let c = b as char;
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            ']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        blocks.push((start, i + 1));
                    }
                }
            }
            _ => {}
        }
    }

    blocks
}

/// Truncate any `NUMBER (op NUMBER|PAREN|...)+` arithmetic expression found
/// as the value of one of [`NUMERIC_FIELDS`] down to its leading number.
fn truncate_arithmetic_expressions(input: &str) -> String {
    let mut text = input.to_string();

    for field in NUMERIC_FIELDS {
        let key = format!("\"{field}\"");
        let mut search_from = 0usize;

        loop {
            let Some(rel) = text[search_from..].find(&key) else {
                break;
            };
            let key_idx = search_from + rel;
            let after_key = key_idx + key.len();

            let Some(colon_rel) = text[after_key..].find(':') else {
                search_from = after_key;
                continue;
            };
            let colon_idx = after_key + colon_rel;
            let bytes = text.as_bytes();

            let mut i = colon_idx + 1;
            while i < bytes.len() && (bytes[i] as char).is_whitespace() {
                i += 1;
            }

            let num_start = i;
            let mut j = num_start;
            if j < bytes.len() && bytes[j] == b'-' {
                j += 1;
            }
            let digits_start = j;
            while j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
                j += 1;
            }
            if j == digits_start {
                search_from = after_key;
                continue;
            }
            if j < bytes.len() && bytes[j] == b'.' {
                let dot = j;
                let mut k = j + 1;
                while k < bytes.len() && (bytes[k] as char).is_ascii_digit() {
                    k += 1;
                }
                if k > dot + 1 {
                    j = k;
                }
            }
            let num_end = j;
            let number_str = text[num_start..num_end].to_string();

            let mut m = num_end;
            while m < bytes.len() && (bytes[m] as char).is_whitespace() {
                m += 1;
            }
            if m >= bytes.len() {
                break;
            }
            let next_ch = bytes[m] as char;
            if next_ch == ',' || next_ch == '}' || next_ch == ']' {
                search_from = num_end;
                continue;
            }

            // Arithmetic expression follows — scan to the next depth-0
            // delimiter and splice in just the leading number.
            let mut depth: i32 = 0;
            let mut end = m;
            while end < bytes.len() {
                match bytes[end] as char {
                    '(' => depth += 1,
                    ')' => depth -= 1,
                    ',' | '}' | ']' if depth <= 0 => break,
                    _ => {}
                }
                end += 1;
            }

            let mut rebuilt = String::with_capacity(text.len());
            rebuilt.push_str(&text[..num_start]);
            rebuilt.push_str(&number_str);
            rebuilt.push_str(&text[end..]);
            let new_search_from = num_start + number_str.len();
            text = rebuilt;
            search_from = new_search_from;
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_decision_array() {
        let text = r#"Thinking about BTC... [{"symbol":"BTCUSDT","action":"wait","reasoning":"no edge"}]"#;
        let out = parse(text);
        assert_eq!(out.decisions.len(), 1);
        assert_eq!(out.decisions[0].symbol, "BTCUSDT");
        assert_eq!(out.decisions[0].action, DecisionAction::Wait);
        assert!(out.cot_trace.contains("Thinking about BTC"));
    }

    #[test]
    fn never_errors_on_garbage_input() {
        let out = parse("absolutely no brackets or json here at all");
        assert_eq!(out.decisions.len(), 1);
        assert_eq!(out.decisions[0].action, DecisionAction::Wait);
    }

    #[test]
    fn rejects_scalar_array_picks_decision_array() {
        // Boundary scenario 8.
        let text = r#"prices were [100000, 100100, 100200] then [{"symbol":"BTCUSDT","action":"wait","reasoning":"x"}]"#;
        let out = parse(text);
        assert_eq!(out.decisions.len(), 1);
        assert_eq!(out.decisions[0].symbol, "BTCUSDT");
    }

    #[test]
    fn truncates_arithmetic_expression() {
        // Boundary scenario 7.
        let text = r#"[{"symbol":"BTCUSDT","action":"open_long","risk_usd": 150 * (0.62 - 0.61) * 5}]"#;
        let out = parse(text);
        assert_eq!(out.decisions[0].risk_usd, Some(150.0));
    }

    #[test]
    fn normalizes_smart_quotes() {
        let text = "\u{201C}reasoning\u{201D} prose [{\u{201C}symbol\u{201D}: \u{201C}ETHUSDT\u{201D}, \u{201C}action\u{201D}: \u{201C}hold\u{201D}}]";
        let out = parse(text);
        assert_eq!(out.decisions[0].symbol, "ETHUSDT");
        assert_eq!(out.decisions[0].action, DecisionAction::Hold);
    }

    #[test]
    fn cot_trace_is_everything_before_accepted_array() {
        let text = "line one\nline two [{\"symbol\":\"BTCUSDT\",\"action\":\"hold\"}]";
        let out = parse(text);
        assert_eq!(out.cot_trace, "line one\nline two");
    }

    #[test]
    fn unrecognized_action_downgrades_to_wait() {
        let text = r#"[{"symbol":"BTCUSDT","action":"moon"}]"#;
        let out = parse(text);
        assert_eq!(out.decisions[0].action, DecisionAction::Wait);
        assert!(out.decisions[0].reasoning.contains("unrecognized action"));
    }
}
