//! Call metadata: the full method name and its service/method split.

use tonic::{GrpcMethod, Request};

const UNKNOWN_FULL_METHOD: &str = "/unknown/unknown";

/// Service and method parsed out of a `/package.Service/Method` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub full_method: String,
    pub service: String,
    pub method: String,
}

impl MethodInfo {
    /// Split `full_method` into its directory-like service prefix (without the
    /// leading `/`) and its final path component.
    ///
    /// Trailing slashes belong to the directory part, so `/svc.Echo/` yields
    /// `svc.Echo` for both. Input without any `/` yields an empty service and
    /// the whole input as the method.
    pub fn parse(full_method: &str) -> Self {
        let service = match full_method.rsplit_once('/') {
            Some((dir, _)) => {
                let dir = dir.trim_end_matches('/');
                dir.strip_prefix('/').unwrap_or(dir)
            }
            None => "",
        };
        let trimmed = full_method.trim_end_matches('/');
        let method = trimmed.rsplit_once('/').map_or(trimmed, |(_, method)| method);
        Self {
            full_method: full_method.to_string(),
            service: service.to_string(),
            method: method.to_string(),
        }
    }
}

/// Metadata handed to the unary wrapper by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryServerInfo {
    pub full_method: String,
}

impl UnaryServerInfo {
    pub fn new(full_method: impl Into<String>) -> Self {
        Self {
            full_method: full_method.into(),
        }
    }

    /// Read the method from the `GrpcMethod` extension tonic's generated
    /// servers attach to each request.
    pub fn from_request<T>(request: &Request<T>) -> Self {
        Self::new(full_method_of(request))
    }
}

/// Metadata handed to the streaming wrapper by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamServerInfo {
    pub full_method: String,
    pub is_client_stream: bool,
    pub is_server_stream: bool,
}

impl StreamServerInfo {
    pub fn new(full_method: impl Into<String>, is_client_stream: bool, is_server_stream: bool) -> Self {
        Self {
            full_method: full_method.into(),
            is_client_stream,
            is_server_stream,
        }
    }

    pub fn from_request<T>(request: &Request<T>, is_client_stream: bool, is_server_stream: bool) -> Self {
        Self::new(full_method_of(request), is_client_stream, is_server_stream)
    }
}

fn full_method_of<T>(request: &Request<T>) -> String {
    request
        .extensions()
        .get::<GrpcMethod<'static>>()
        .map_or_else(
            || UNKNOWN_FULL_METHOD.to_string(),
            |grpc_method| format!("/{}/{}", grpc_method.service(), grpc_method.method()),
        )
}
