//! Completion endpoint clients.
//!
//! [`Provider`] is the seam between the turn loop and the remote model;
//! [`complete`] gives callers one fragment-sequence interface for both
//! streaming and non-streaming calls. [`OpenAiCompatibleProvider`] is the
//! only network implementation and is built from an explicit
//! [`CompletionConfig`].

pub mod compatible;
pub mod traits;

pub use compatible::{CompletionConfig, OpenAiCompatibleProvider};
pub use traits::{
    complete, ChatMessage, FragmentStream, Provider, StreamError, StreamResult,
};

use crate::config::Config;

const MAX_API_ERROR_CHARS: usize = 200;

/// Build the provider described by the loaded configuration.
pub fn create_provider(config: &Config) -> OpenAiCompatibleProvider {
    OpenAiCompatibleProvider::new(config.completion_config())
}

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [(&str, usize); 7] = [
        ("sk-", 1),
        ("\"api_key\":\"", 8),
        ("\"access_token\":\"", 8),
        ("api_key=", 8),
        ("token=", 8),
        ("Bearer ", 16),
        ("bearer ", 16),
    ];

    let mut scrubbed = input.to_string();

    for (prefix, min_len) in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);
            let token_len = end.saturating_sub(content_start);

            // Bare prefixes like "sk-" should not stop future scans.
            if token_len < min_len {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let end = scrubbed
        .char_indices()
        .nth(MAX_API_ERROR_CHARS)
        .map_or(scrubbed.len(), |(i, _)| i);

    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{provider} API error ({status}): {sanitized}")
}
