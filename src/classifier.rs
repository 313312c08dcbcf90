//! Answer classification into status code plus comments.

use crate::schema::Status;

/// Dash glyphs seen around status codes, in search priority order.
const DASHES: [char; 2] = ['-', '–'];

/// Status codes in search priority order.
const CODES: [Status; 5] = [Status::Ko, Status::Ok, Status::Pa, Status::Ne, Status::Na];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: Status,
    pub pre_comment: String,
    pub post_comment: String,
}

/// Split a raw answer block at its first matching status marker.
///
/// Markers are tried glyph-major: every code with an ASCII hyphen first, then
/// every code with an en dash. The first marker found anywhere in the block
/// wins, so an ASCII `OK -` beats an en-dash `KO –` regardless of position.
pub fn classify(answer: &str) -> Classification {
    for dash in DASHES {
        for status in CODES {
            let marker = format!("{} {}", status.code(), dash);
            if let Some((pre, post)) = answer.split_once(marker.as_str()) {
                return Classification {
                    status,
                    pre_comment: pre.to_string(),
                    post_comment: post.trim().to_string(),
                };
            }
        }
    }

    Classification {
        status: Status::Unscored,
        pre_comment: answer.to_string(),
        post_comment: String::new(),
    }
}
