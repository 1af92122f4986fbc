//! Endpoint strings.
//!
//! Endpoints look like `tcp://host:port`. On bind, the client-visible
//! connection string substitutes the configured hostname for the address
//! portion (everything up to the last colon), preserving the scheme.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::TransportError;

/// Sentinel advertised when a bound endpoint carries no address suffix.
pub const LOCAL_ENDPOINT: &str = "<local>";

fn split_scheme(endpoint: &str) -> (Option<&str>, &str) {
    match endpoint.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, endpoint),
    }
}

/// Resolve the socket address of a `tcp://` endpoint.
pub fn resolve(endpoint: &str) -> Result<SocketAddr, TransportError> {
    let (scheme, rest) = split_scheme(endpoint);
    if let Some(scheme) = scheme {
        if scheme != "tcp" {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }
    }
    rest.to_socket_addrs()
        .map_err(|_| TransportError::InvalidEndpoint(endpoint.to_string()))?
        .next()
        .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))
}

/// Compute the client-visible connection string for a bound endpoint.
pub fn advertised(endpoint: &str, hostname: &str) -> String {
    let (scheme, rest) = split_scheme(endpoint);
    match rest.rfind(':') {
        Some(position) => match scheme {
            Some(scheme) => format!("{}://{}{}", scheme, hostname, &rest[position..]),
            None => format!("{}{}", hostname, &rest[position..]),
        },
        None => LOCAL_ENDPOINT.to_string(),
    }
}
