use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use splitledger_core::MemberId;

use crate::app::errors::json_error;
use crate::context::MemberContext;

pub const MEMBER_HEADER: &str = "x-member-id";

/// Attach a [`MemberContext`] from the `X-Member-Id` header, or answer 401.
pub async fn member_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let member_id = match extract_member(req.headers()) {
        Ok(member_id) => member_id,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message),
    };

    req.extensions_mut().insert(MemberContext::new(member_id));
    next.run(req).await
}

fn extract_member(headers: &HeaderMap) -> Result<MemberId, &'static str> {
    let header = headers
        .get(MEMBER_HEADER)
        .ok_or("missing X-Member-Id header")?;
    let header = header.to_str().map_err(|_| "X-Member-Id is not valid text")?;
    header.parse().map_err(|_| "X-Member-Id is empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn member_header_is_trimmed_and_required() {
        let mut headers = HeaderMap::new();
        assert!(extract_member(&headers).is_err());

        headers.insert(MEMBER_HEADER, HeaderValue::from_static("  "));
        assert!(extract_member(&headers).is_err());

        headers.insert(MEMBER_HEADER, HeaderValue::from_static(" alice "));
        assert_eq!(extract_member(&headers).unwrap(), MemberId::from("alice"));
    }
}
