//! Shareable invite links of the form `<base>?joinBoard=<board_id>`.

use url::Url;

pub const JOIN_PARAM: &str = "joinBoard";
pub const DEFAULT_INVITE_BASE: &str = "https://kankan-demo.netlify.app/";

/// Build the link a peer opens to join `board_id`.
pub fn build_join_url(base: &str, board_id: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().clear().append_pair(JOIN_PARAM, board_id);
    Ok(url.into())
}

/// A board id extracted from an invite link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub board_id: String,
    /// The link with the join parameter removed.
    pub remaining_url: String,
}

/// Extract the board id from `link`, if it carries a non-blank one.
pub fn consume_join_param(link: &str) -> Option<JoinRequest> {
    let mut url = Url::parse(link).ok()?;
    let board_id = url
        .query_pairs()
        .find(|(key, _)| key == JOIN_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|id| !id.is_empty())?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != JOIN_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Some(JoinRequest {
        board_id,
        remaining_url: url.into(),
    })
}
