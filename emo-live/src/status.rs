//! Text rendering of the session state.

use emo_core::SessionView;

/// Emoji shown next to a predicted emotion label.
pub fn emotion_emoji(emotion: &str) -> &'static str {
    match emotion.to_ascii_lowercase().as_str() {
        "happy" => "😊",
        "sad" => "😢",
        "angry" => "😠",
        "surprise" => "😮",
        "fear" => "😨",
        "disgust" => "🤢",
        "neutral" => "😐",
        _ => "🤔",
    }
}

/// Connection banner, or `None` while idle without an error.
pub fn banner(view: &SessionView) -> Option<String> {
    if view.is_connected {
        return Some("Connected to Backend".into());
    }
    if view.is_connecting {
        return Some("Connecting to Backend...".into());
    }
    view.error.as_ref()?;

    if view.reconnect_attempt >= view.max_reconnect_attempts {
        Some(
            "Connection Failed: max reconnection attempts reached. \
             Please check if the backend is running."
                .into(),
        )
    } else {
        Some(format!(
            "Reconnecting... ({}/{})",
            view.reconnect_attempt, view.max_reconnect_attempts
        ))
    }
}

/// One-line summary of the latest prediction.
pub fn prediction_line(view: &SessionView) -> Option<String> {
    let p = view.prediction.as_ref()?;
    let mut line = format!(
        "{} {} {:.1}%",
        emotion_emoji(&p.emotion),
        p.emotion,
        p.confidence * 100.0
    );
    if let Some(model) = &view.model_version {
        line.push_str(&format!(" | model {model}"));
    }
    if let Some(ms) = view.processing_time_ms {
        line.push_str(&format!(" | {ms:.0} ms"));
    }
    Some(line)
}

// ── Tests ────────────────────────────────────────────────────────
