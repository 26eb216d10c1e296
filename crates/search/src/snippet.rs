use std::path::Path;

/// Maximum snippet length in characters.
pub const SNIPPET_CHARS: usize = 300;

/// Read a file and cut a snippet around the first query-term match. Files
/// that disappeared or cannot be read yield an empty snippet rather than a
/// failed search.
pub async fn snippet_for_file(path: &Path, query: &str, max_chars: usize) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let content = String::from_utf8_lossy(&bytes);
            extract_snippet(&content, query, max_chars)
        }
        Err(err) => {
            log::debug!("snippet read failed for {}: {err}", path.display());
            String::new()
        }
    }
}

/// A contiguous window of up to `max_chars` characters centered on the
/// first literal match of any query term; the file prefix when no term
/// matches.
#[must_use]
pub fn extract_snippet(content: &str, query: &str, max_chars: usize) -> String {
    if content.is_empty() || max_chars == 0 {
        return String::new();
    }

    // ASCII-lowercased haystack keeps byte offsets valid in the original.
    let haystack = content.to_ascii_lowercase();
    let match_byte = query_terms(query)
        .iter()
        .filter_map(|term| haystack.find(term.as_str()))
        .min();

    let boundaries: Vec<usize> = content
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(content.len()))
        .collect();
    let n_chars = boundaries.len() - 1;

    let center_char = match match_byte {
        Some(byte) => boundaries.partition_point(|&b| b <= byte).saturating_sub(1),
        None => 0,
    };

    let mut start = center_char.saturating_sub(max_chars / 2);
    let end = (start + max_chars).min(n_chars);
    // Re-anchor when the window hits the end of the file.
    start = end.saturating_sub(max_chars);

    content[boundaries[start]..boundaries[end]].to_string()
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_ascii_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}
