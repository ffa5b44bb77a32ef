//! Result title cleanup. Pure and idempotent: cleaning a cleaned title is
//! a no-op.

const MAX_TITLE_LEN: usize = 80;
pub const UNKNOWN_ORGANIZATION: &str = "Unknown Organization";

/// Strip leading bracketed tags and trailing " - <site>" suffixes, truncate
/// over-long titles, and fall back to a fixed name when nothing is left.
pub fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();

    // leading "[PDF]", "(Official)", etc.
    loop {
        let stripped = strip_leading_bracket(title);
        if stripped == title {
            break;
        }
        title = stripped;
    }

    // trailing " - Site Name" / " | Site Name" — keep the organization part.
    // Split at the first separator so reapplying the cleanup is a no-op.
    let title = match title.split_once(" - ").or_else(|| title.split_once(" | ")) {
        Some((head, _site)) if !head.trim().is_empty() => head.trim(),
        _ => title,
    };

    let mut title = title.trim().to_string();
    if title.len() > MAX_TITLE_LEN {
        let mut end = MAX_TITLE_LEN;
        while !title.is_char_boundary(end) {
            end -= 1;
        }
        title.truncate(end);
        title = title.trim_end().to_string();
        // avoid a dangling cut-off word separator
        title = title.trim_end_matches(['-', '|', ',', ';']).trim_end().to_string();
    }

    if title.is_empty() {
        UNKNOWN_ORGANIZATION.to_string()
    } else {
        title
    }
}

fn strip_leading_bracket(title: &str) -> &str {
    let trimmed = title.trim_start();
    for (open, close) in [('[', ']'), ('(', ')')] {
        if let Some(rest) = trimmed.strip_prefix(open) {
            if let Some(end) = rest.find(close) {
                return rest[end + 1..].trim_start();
            }
        }
    }
    trimmed
}
