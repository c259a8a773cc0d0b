use crate::cassette::recording::RecordedRequest;
use crate::config::MatchOn;
use crate::runtime::HttpRequest;
use url::{Position, Url};

/// Which request attributes must agree for a recorded interaction to answer a
/// live request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRules {
    on: Vec<MatchOn>,
}

impl MatchRules {
    pub fn new(on: &[MatchOn]) -> Self {
        let mut on = on.to_vec();
        on.sort();
        on.dedup();
        Self { on }
    }

    pub fn matches(&self, recorded: &RecordedRequest, actual: &HttpRequest) -> bool {
        self.on.iter().all(|rule| match rule {
            MatchOn::Method => recorded.method.eq_ignore_ascii_case(&actual.method),
            MatchOn::Uri => normalize_uri(&recorded.uri) == normalize_uri(&actual.uri),
            MatchOn::Body => recorded.body == actual.body,
            MatchOn::Headers => {
                normalize_headers(&recorded.headers)
                    == normalize_headers(&RecordedRequest::from_request(actual).headers)
            }
        })
    }
}

impl Default for MatchRules {
    fn default() -> Self {
        Self::new(&[MatchOn::Method, MatchOn::Uri])
    }
}

/// Base that relative request targets (`/updates?page=2`) are resolved
/// against; stripped again from the normalised form.
const RELATIVE_BASE: &str = "http://relative.invalid";

/// Canonical form of a request URI: scheme and host lower-cased, default
/// port dropped, fragment dropped, query pairs sorted so `?b=2&a=1` and
/// `?a=1&b=2` compare equal. Unparseable input compares verbatim.
pub fn normalize_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(url) => canonical(url).into(),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            match Url::parse(RELATIVE_BASE).and_then(|base| base.join(uri)) {
                Ok(url) => canonical(url)[Position::BeforePath..].to_string(),
                Err(_) => uri.to_string(),
            }
        }
        Err(_) => uri.to_string(),
    }
}

fn canonical(mut url: Url) -> Url {
    url.set_fragment(None);
    let mut pairs = url.query_pairs().into_owned().collect::<Vec<(String, String)>>();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}

fn normalize_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    let mut headers = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect::<Vec<_>>();
    headers.sort();
    headers
}
