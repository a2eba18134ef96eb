//! Socket endpoint resolution
//!
//! A frontend served from `http(s)://host[:port]/base/...` talks to the
//! backend socket at `ws(s)://host[:port]/base/api/ws`.

use taskwire_core::{Error, Result};
use url::Url;

/// Path appended to the page's base path
pub const SOCKET_PATH: &str = "api/ws";

/// Resolve the socket endpoint for a page URL
///
/// `http` maps to `ws` and `https` to `wss`; `ws`/`wss` URLs keep their
/// scheme. Host and port are preserved, the path is cut after its last `/`
/// and [`SOCKET_PATH`] appended. Query and fragment are dropped.
pub fn socket_url(page_url: &str) -> Result<String> {
    let mut url = Url::parse(page_url)
        .map_err(|e| Error::Configuration(format!("Invalid page URL '{}': {}", page_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Configuration(format!(
                "Unsupported scheme '{}' in '{}'",
                other, page_url
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Configuration(format!("Cannot use scheme '{}' for '{}'", scheme, page_url)))?;

    let base = match url.path().rfind('/') {
        Some(idx) => url.path()[..=idx].to_string(),
        None => "/".to_string(),
    };
    url.set_path(&format!("{}{}", base, SOCKET_PATH));
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_root() {
        assert_eq!(
            socket_url("http://localhost:5000/").unwrap(),
            "ws://localhost:5000/api/ws"
        );
    }

    #[test]
    fn test_https_with_base_path() {
        assert_eq!(
            socket_url("https://example.com/spotlight/index.html").unwrap(),
            "wss://example.com/spotlight/api/ws"
        );
        assert_eq!(
            socket_url("https://example.com/spotlight/").unwrap(),
            "wss://example.com/spotlight/api/ws"
        );
    }

    #[test]
    fn test_query_and_fragment_dropped() {
        assert_eq!(
            socket_url("http://127.0.0.1:8080/app/?layout=grid#table").unwrap(),
            "ws://127.0.0.1:8080/app/api/ws"
        );
    }

    #[test]
    fn test_host_without_path() {
        assert_eq!(socket_url("http://localhost").unwrap(), "ws://localhost/api/ws");
    }

    #[test]
    fn test_socket_scheme_kept() {
        assert_eq!(
            socket_url("wss://example.com/").unwrap(),
            "wss://example.com/api/ws"
        );
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            socket_url("file:///tmp/index.html"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(socket_url("not a url"), Err(Error::Configuration(_))));
    }
}
