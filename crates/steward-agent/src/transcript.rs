//! Transcript synthesis for tool results.
//!
//! After each loop iteration that executed tools, a text transcript of the
//! calls is appended verbatim to the context so the next model call can
//! reason over what happened.

use crate::accumulator::ResolvedToolCall;

/// Render one iteration's tool calls as a transcript block.
pub fn synthesize(calls: &[ResolvedToolCall]) -> String {
    let mut out = String::from("Tool invocations from this round:");
    for call in calls {
        let args = serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string());
        out.push_str("\n- ");
        out.push_str(&call.name);
        out.push('(');
        out.push_str(&args);
        out.push(')');
        match (&call.result, &call.error) {
            (_, Some(error)) => {
                out.push_str(" => error: ");
                out.push_str(error);
            }
            (Some(result), None) => {
                out.push_str(" => ");
                out.push_str(
                    &serde_json::to_string(result).unwrap_or_else(|_| "<unprintable>".to_string()),
                );
            }
            (None, None) => {
                out.push_str(" => <no result>");
            }
        }
    }
    out
}
