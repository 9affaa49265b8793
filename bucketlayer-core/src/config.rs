//! Cluster connection configuration.
//!
//! A [`ClusterConfig`] carries everything the client wrapper needs to reach
//! the store: the endpoint set, credentials, and the target bucket name. It is
//! supplied once at construction and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Connection settings for one cluster client wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Server endpoints the driver may connect to.
    pub endpoints: Vec<String>,
    /// Username presented during authentication.
    pub username: String,
    /// Password presented during authentication.
    pub password: String,
    /// Name of the bucket all document operations target.
    pub bucket: String,
}

impl ClusterConfig {
    /// Creates a builder for fluent construction.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }
}

/// Builder for [`ClusterConfig`] instances.
#[derive(Debug, Default, Clone)]
pub struct ClusterConfigBuilder {
    endpoints: Vec<String>,
    username: String,
    password: String,
    bucket: String,
}

impl ClusterConfigBuilder {
    /// Appends a server endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Replaces the full endpoint list.
    pub fn endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Sets the authentication credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the target bucket name.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Builds and returns the final configuration.
    pub fn build(self) -> ClusterConfig {
        ClusterConfig {
            endpoints: self.endpoints,
            username: self.username,
            password: self.password,
            bucket: self.bucket,
        }
    }
}
