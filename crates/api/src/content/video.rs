//! YouTube video id extraction

use url::Url;

use super::{ContentError, ContentResult};

/// Extract the video id from the URL shapes YouTube hands out:
/// `youtu.be/<id>`, `youtube.com/watch?v=<id>`, `/embed/<id>` and `/shorts/<id>`.
pub fn extract_video_id(raw: &str) -> ContentResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ContentError::MissingUrl);
    }

    let url = Url::parse(raw).map_err(|_| ContentError::InvalidUrl)?;
    let host = url.host_str().unwrap_or_default().to_lowercase();

    let id = if host == "youtu.be" || host.ends_with(".youtu.be") {
        url.path().trim_start_matches('/').split('/').next().map(str::to_string)
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        let mut segments = url.path_segments().into_iter().flatten();
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("embed") | Some("shorts") => segments.next().map(str::to_string),
            _ => None,
        }
    } else {
        None
    };

    id.filter(|id| !id.is_empty())
        .ok_or(ContentError::InvalidUrl)
}
