use crate::core::error::AppError;
use crate::core::execution::task::TaskErrorSummary;
use serde_json::Value;

/// Redact sensitive keys in the given JSON value.
pub fn redact_value(value: &mut Value, redact_keys: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if should_redact(key, redact_keys) {
                    *child = Value::String("[REDACTED]".to_string());
                    continue;
                }
                redact_value(child, redact_keys);
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_value(item, redact_keys);
            }
        }
        _ => {}
    }
}

fn should_redact(key: &str, redact_keys: &[String]) -> bool {
    let key_lower = key.to_lowercase();
    redact_keys
        .iter()
        .any(|pattern| key_lower.contains(&pattern.to_lowercase()))
}

/// Create the redacted summary persisted on a failed task.
///
/// The message is withheld entirely when the error's context mentions a
/// sensitive key, since connector messages often echo request parameters.
pub fn summarize_error(error: &AppError, redact_keys: &[String]) -> TaskErrorSummary {
    let mentions_secret = error.context.values().any(|ctx| {
        let ctx = ctx.to_lowercase();
        redact_keys
            .iter()
            .any(|pattern| ctx.contains(&pattern.to_lowercase()))
    });
    TaskErrorSummary {
        code: error.code.clone(),
        category: format!("{:?}", error.category),
        message: if mentions_secret {
            "[REDACTED]".to_string()
        } else {
            error.message.clone()
        },
    }
}
