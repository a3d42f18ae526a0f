use web_transport_proto::ConnectRequest;

/// Decides whether a WebTransport upgrade request is allowed to proceed.
///
/// Policy is configurable, defaulting to rejecting cross-origin requests in
/// production. The pinned `web-transport-proto` version exposes only the
/// request URL, not raw headers, so the policy below is evaluated against
/// the request's URL authority rather than a literal `Origin:` header; see
/// DESIGN.md for the Open Question resolution.
pub trait OriginPolicy: Send + Sync + 'static {
    fn allow(&self, request: &ConnectRequest) -> bool;
}

/// Accepts every upgrade. Only appropriate for development or tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAny;

impl OriginPolicy for AllowAny {
    fn allow(&self, _request: &ConnectRequest) -> bool {
        true
    }
}

/// Rejects any request whose URL authority is not in the allow-list.
///
/// The default-deny origin policy intended for production.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    hosts: Vec<String>,
}

impl AllowList {
    pub fn new(hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

impl OriginPolicy for AllowList {
    fn allow(&self, request: &ConnectRequest) -> bool {
        match request.url.host_str() {
            Some(host) => self.hosts.iter().any(|allowed| allowed == host),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> ConnectRequest {
        ConnectRequest {
            url: url.parse().unwrap(),
        }
    }

    #[test]
    fn allow_any_allows_everything() {
        assert!(AllowAny.allow(&request("https://evil.example/mcp-flow")));
    }

    #[test]
    fn allow_list_rejects_unknown_hosts() {
        let policy = AllowList::new(["api.example.com"]);
        assert!(policy.allow(&request("https://api.example.com/mcp-flow")));
        assert!(!policy.allow(&request("https://evil.example/mcp-flow")));
    }
}
