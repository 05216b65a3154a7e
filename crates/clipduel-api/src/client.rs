//! Client identity extractor.
//!
//! Users are keyed by IP. By default that is the peer address from
//! [`ConnectInfo`]; with `behind_proxy` set, the first `X-Forwarded-For` hop
//! (then `X-Real-IP`) wins over the socket address.

use std::net::SocketAddr;

use axum::{
  extract::{ConnectInfo, FromRequestParts},
  http::{HeaderMap, request::Parts},
};
use clipduel_core::store::BallotStore;

use crate::{AppState, error::ApiError};

/// The caller's IP address as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<AppState<S>> for ClientIp
where
  S: BallotStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    if state.behind_proxy {
      if let Some(ip) = forwarded_ip(&parts.headers) {
        return Ok(ClientIp(ip));
      }
    }

    parts
      .extensions
      .get::<ConnectInfo<SocketAddr>>()
      .map(|ConnectInfo(addr)| ClientIp(addr.ip().to_string()))
      .ok_or(ApiError::MissingClientAddress)
  }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
  let from_header = |name: &str| {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.split(',').next())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(str::to_owned)
  };
  from_header("x-forwarded-for").or_else(|| from_header("x-real-ip"))
}
