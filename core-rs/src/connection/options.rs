//! Request options for control-plane API calls
//!
//! [`RequestOptions`] is the target description carried through the
//! scheduler: where to connect, which method, which credentials and how
//! urgent the call is. [`ApiRequestBuilder`] produces options for the
//! `/api/{version}/{name}` layout of the control plane.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::config::{Credentials, ServerConfig};

/// Scheduling priority of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    /// May bypass a congested queue
    Immediate,
}

/// Target and metadata for one outbound call
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub method: Method,
    pub credentials: Option<Credentials>,
    pub priority: Priority,
}

impl RequestOptions {
    /// GET over https on port 443
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port: 443,
            path: path.into(),
            method: Method::GET,
            credentials: None,
            priority: Priority::Normal,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the request as allowed to bypass a congested queue
    pub fn immediate(self) -> Self {
        self.with_priority(Priority::Immediate)
    }

    pub fn is_immediate(&self) -> bool {
        self.priority == Priority::Immediate
    }

    /// Full URL of the request
    ///
    /// # Example
    ///
    /// ```
    /// use kvis_core::connection::RequestOptions;
    ///
    /// let options = RequestOptions::new("10.0.0.1", "/api/v1beta1/pods");
    /// assert_eq!(options.url(), "https://10.0.0.1:443/api/v1beta1/pods");
    /// ```
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

/// Builds [`RequestOptions`] for named control-plane APIs
#[derive(Debug, Clone)]
pub struct ApiRequestBuilder {
    scheme: String,
    host: String,
    port: u16,
    api_version: String,
    credentials: Option<Credentials>,
}

impl ApiRequestBuilder {
    pub fn new(host: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port: 443,
            api_version: api_version.into(),
            credentials: None,
        }
    }

    /// Builder for the server section of the configuration
    pub fn from_config(server: &ServerConfig, credentials: Option<Credentials>) -> Self {
        Self {
            scheme: server.scheme.clone(),
            host: server.host.clone(),
            port: server.port,
            api_version: server.kube_api_version.clone(),
            credentials,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_endpoint(mut self, scheme: impl Into<String>, port: u16) -> Self {
        self.scheme = scheme.into();
        self.port = port;
        self
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Path of a named API, e.g. `pods/my-pod`
    ///
    /// # Example
    ///
    /// ```
    /// use kvis_core::connection::ApiRequestBuilder;
    ///
    /// let builder = ApiRequestBuilder::new("10.0.0.1", "v1beta1");
    /// assert_eq!(builder.api_path("pods"), "/api/v1beta1/pods");
    /// ```
    pub fn api_path(&self, api_name: &str) -> String {
        format!("/{}", ["api", &self.api_version, api_name].join("/"))
    }

    /// Options for calling `api_name` with `method`
    pub fn request(&self, api_name: &str, method: Method) -> RequestOptions {
        RequestOptions {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            path: self.api_path(api_name),
            method,
            credentials: self.credentials.clone(),
            priority: Priority::Normal,
        }
    }

    pub fn get(&self, api_name: &str) -> RequestOptions {
        self.request(api_name, Method::GET)
    }
}
