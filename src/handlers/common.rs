use axum::http::StatusCode;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::{ListQuery, PaginatedResponse};

/// Standard no content response
pub fn no_content_response() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Order ids arrive as path segments; anything but a UUID is a client error.
pub fn parse_order_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ServiceError::BadRequest(format!("'{raw}' is not a valid order id")))
}

/// Resolves `page`/`limit` against the configured defaults, clamping the page
/// size to `max_page_size`.
pub fn page_bounds(query: &ListQuery, config: &AppConfig) -> (u64, u64) {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(config.default_page_size)
        .clamp(1, config.max_page_size.max(1));
    (page, limit)
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if total == 0 { 0 } else { total.div_ceil(limit.max(1)) };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}
