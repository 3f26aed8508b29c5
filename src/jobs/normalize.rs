//! Maps provider result documents onto [`JobPayload`].
//!
//! Providers return loosely shaped JSON: a single `image` object, an `images`
//! array, a bare `audio_url` string, and so on. Everything the orchestrator
//! hands out goes through [`normalize_result`] so callers only ever see
//! [`MediaRef`]s.

use std::collections::HashSet;

use serde_json::Value;

use crate::jobs::types::{FailureKind, JobFailure, JobPayload, MediaKind, MediaRef};

const MEDIA_KEYS: &[(&str, MediaKind)] = &[
    ("images", MediaKind::Image),
    ("image", MediaKind::Image),
    ("video", MediaKind::Video),
    ("videos", MediaKind::Video),
    ("audio", MediaKind::Audio),
    ("audio_file", MediaKind::Audio),
    ("audio_url", MediaKind::Audio),
    ("image_url", MediaKind::Image),
    ("video_url", MediaKind::Video),
];

pub fn normalize_result(raw: Value) -> Result<JobPayload, JobFailure> {
    let mut media = Vec::new();
    if let Some(object) = raw.as_object() {
        for (key, kind) in MEDIA_KEYS {
            if let Some(value) = object.get(*key) {
                collect_media(value, *kind, &mut media);
            }
        }
    }
    let mut seen = HashSet::new();
    media.retain(|item| seen.insert(item.url.clone()));

    if media.is_empty()
        && let Some(message) = error_message(&raw)
    {
        return Err(JobFailure::new(FailureKind::ProviderJobFailed, message));
    }

    Ok(JobPayload { media, raw })
}

fn collect_media(value: &Value, kind: MediaKind, out: &mut Vec<MediaRef>) {
    match value {
        Value::String(url) if is_media_url(url) => out.push(MediaRef {
            kind,
            url: url.clone(),
            content_type: None,
            file_name: None,
        }),
        Value::Array(items) => {
            for item in items {
                collect_media(item, kind, out);
            }
        }
        Value::Object(object) => {
            let Some(url) = object.get("url").and_then(Value::as_str) else {
                return;
            };
            if !is_media_url(url) {
                return;
            }
            let content_type = object
                .get("content_type")
                .and_then(Value::as_str)
                .map(str::to_string);
            let kind = content_type
                .as_deref()
                .map(kind_from_content_type)
                .unwrap_or(kind);
            out.push(MediaRef {
                kind,
                url: url.to_string(),
                content_type,
                file_name: object
                    .get("file_name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        _ => {}
    }
}

fn is_media_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://") || url.starts_with("data:")
}

fn kind_from_content_type(content_type: &str) -> MediaKind {
    match content_type.split('/').next().unwrap_or_default() {
        "image" => MediaKind::Image,
        "video" => MediaKind::Video,
        "audio" => MediaKind::Audio,
        _ => MediaKind::File,
    }
}

/// Extracts an error description from a provider document, if it carries one.
pub fn error_message(raw: &Value) -> Option<String> {
    let object = raw.as_object()?;
    for key in ["error", "detail", "message"] {
        match object.get(key) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                return Some(text.trim().to_string());
            }
            Some(Value::Array(items)) if !items.is_empty() => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| {
                        item.get("msg")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| item.to_string())
                    })
                    .collect();
                return Some(parts.join("; "));
            }
            Some(value @ Value::Object(_)) => {
                return Some(
                    value
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string()),
                );
            }
            _ => {}
        }
    }
    None
}
