//! Request/response carriers for user tracking
//!
//! The HTTP layer is external. User tracking only needs to read cookies and
//! the authenticated user from a request, and to attach a cookie to a
//! response that has not been committed yet.

/// Cookie attached to a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    /// `None` means no expiry attribute is sent
    pub max_age_secs: Option<i64>,
    pub comment: Option<String>,
}

impl TrackingCookie {
    /// Site-wide cookie without an expiry
    pub fn site_wide(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            max_age_secs: None,
            comment: Some("Cluster User Tracking".to_string()),
        }
    }
}

/// Inbound side of a request
pub trait TrackingRequest {
    /// Values of every cookie called `name`
    fn cookie_values(&self, name: &str) -> Vec<String>;

    /// Authenticated user, if any
    fn remote_user(&self) -> Option<String>;
}

/// Outbound side of a request
pub trait TrackingResponse {
    /// Whether headers have already been sent
    fn is_committed(&self) -> bool;

    fn add_cookie(&mut self, cookie: TrackingCookie);
}

/// Request held in memory
#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    pub cookies: Vec<(String, String)>,
    pub remote_user: Option<String>,
}

impl SimpleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = Some(user.into());
        self
    }
}

impl TrackingRequest for SimpleRequest {
    fn cookie_values(&self, name: &str) -> Vec<String> {
        self.cookies
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn remote_user(&self) -> Option<String> {
        self.remote_user.clone()
    }
}

/// Response held in memory
#[derive(Debug, Clone, Default)]
pub struct SimpleResponse {
    pub committed: bool,
    pub cookies: Vec<TrackingCookie>,
}

impl SimpleResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response whose headers are already out
    pub fn committed() -> Self {
        Self {
            committed: true,
            cookies: Vec::new(),
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&TrackingCookie> {
        self.cookies.iter().find(|c| c.name == name)
    }
}

impl TrackingResponse for SimpleResponse {
    fn is_committed(&self) -> bool {
        self.committed
    }

    fn add_cookie(&mut self, cookie: TrackingCookie) {
        self.cookies.push(cookie);
    }
}
