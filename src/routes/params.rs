use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema, IntoParams)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    /// Returns `(page, per_page, offset)`. Pages are 1-indexed; a page below 1 or
    /// a non-positive page size is rejected, oversized pages are capped.
    pub fn resolve(&self) -> AppResult<(i64, i64, i64)> {
        let page = self.page.unwrap_or(1);
        let per_page = self.per_page.unwrap_or(DEFAULT_PER_PAGE);
        if page < 1 {
            return Err(AppError::InvalidArgument("page must be at least 1".into()));
        }
        if per_page <= 0 {
            return Err(AppError::InvalidArgument(
                "page size must be greater than 0".into(),
            ));
        }
        let per_page = per_page.min(MAX_PER_PAGE);
        let offset = (page - 1)
            .checked_mul(per_page)
            .ok_or_else(|| AppError::InvalidArgument("page is out of range".into()))?;
        Ok((page, per_page, offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than `desc` sorts ascending.
    pub fn parse_or_asc(raw: Option<&str>) -> Self {
        match raw {
            Some(dir) if dir.trim().eq_ignore_ascii_case("desc") => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
pub struct ProductSearchQuery {
    /// Free text matched against the product name.
    pub q: Option<String>,
    pub category_id: Option<Uuid>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// One of `id`, `name`, `price`, `view`, `created_at`; unknown values use the default sort.
    pub sort_by: Option<String>,
    /// `asc` (default when `sort_by` is given) or `desc`.
    pub sort_order: Option<String>,
}

impl ProductSearchQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
pub struct OrderListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl OrderListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
pub struct OrderSearchQuery {
    pub term: String,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl OrderSearchQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema, IntoParams)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn resolve(&self, default: i64) -> AppResult<i64> {
        let limit = self.limit.unwrap_or(default);
        if limit <= 0 {
            return Err(AppError::InvalidArgument(
                "limit must be greater than 0".into(),
            ));
        }
        Ok(limit.min(MAX_PER_PAGE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        assert_eq!(Pagination::default().resolve().unwrap(), (1, 10, 0));
    }

    #[test]
    fn pagination_offsets_and_caps() {
        assert_eq!(Pagination::new(3, 20).resolve().unwrap(), (3, 20, 40));
        assert_eq!(Pagination::new(1, 500).resolve().unwrap(), (1, 100, 0));
    }

    #[test]
    fn pagination_rejects_out_of_range() {
        assert!(matches!(
            Pagination::new(0, 10).resolve(),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            Pagination::new(1, 0).resolve(),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            Pagination::new(1, -4).resolve(),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn sort_direction_defaults_to_ascending() {
        assert_eq!(SortOrder::parse_or_asc(None), SortOrder::Asc);
        assert_eq!(SortOrder::parse_or_asc(Some("DESC")), SortOrder::Desc);
        assert_eq!(SortOrder::parse_or_asc(Some("sideways")), SortOrder::Asc);
    }

    #[test]
    fn limit_must_be_positive() {
        assert_eq!(LimitQuery::default().resolve(10).unwrap(), 10);
        assert_eq!(LimitQuery { limit: Some(3) }.resolve(10).unwrap(), 3);
        assert!(LimitQuery { limit: Some(0) }.resolve(10).is_err());
    }
}
