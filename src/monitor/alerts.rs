// src/monitor/alerts.rs - User-facing alert and confirmation texts

/// Sent instead of screening when the user is already blocked
pub fn block_notice(allow_self_reset: bool) -> String {
    if allow_self_reset {
        "🚫 You are blocked. Type '/reset' to clear warnings.".to_string()
    } else {
        "🚫 You are blocked. Please contact an admin for assistance.".to_string()
    }
}

pub fn warning(count: u32, threshold: u32, categories: &[String]) -> String {
    format!(
        "⚠️ Warning {}/{}: your message was flagged for {}.",
        count,
        threshold,
        categories.join(", ")
    )
}

/// Appended after the warning on the message that crosses the threshold
pub fn block_transition(threshold: u32) -> String {
    format!(
        "🚫 You have reached {} warnings and are now blocked.",
        threshold
    )
}

pub fn reset_confirmation(user_id: &str, previous_count: u32, cleared_records: Option<usize>) -> String {
    match cleared_records {
        Some(cleared) => format!(
            "Warnings reset for {} (previous count: {}, {} flag records cleared).",
            user_id, previous_count, cleared
        ),
        None => format!(
            "Warnings reset for {} (previous count: {}).",
            user_id, previous_count
        ),
    }
}
