//! Catalog query resolver.
//!
//! A product search is a fixed base predicate (`trash = false`) plus any of
//! four optional predicates (category, minimum price, maximum price, name text).
//! Every presence pattern of those four maps to exactly one query: the
//! conjunction of the base predicate and the predicates that are present.

use sea_orm::{
    ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Select,
    sea_query::{Expr, extension::postgres::PgExpr},
};
use uuid::Uuid;

use crate::{
    entity::products::{Column, Entity as Products},
    error::{AppError, AppResult},
    routes::params::{ProductSearchQuery, SortOrder},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub text: Option<String>,
    pub category_id: Option<Uuid>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

impl ProductFilter {
    /// Blank text counts as absent; price bounds must be non-negative and ordered.
    pub fn normalized(self) -> AppResult<Self> {
        let text = self
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        for bound in [self.min_price, self.max_price].into_iter().flatten() {
            if bound < 0 {
                return Err(AppError::InvalidArgument(
                    "price bounds must not be negative".into(),
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(AppError::InvalidArgument(format!(
                    "min_price {min} is greater than max_price {max}"
                )));
            }
        }

        Ok(Self { text, ..self })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    NotTrashed,
    Category(Uuid),
    MinPrice(i64),
    MaxPrice(i64),
    Text(String),
}

impl Predicate {
    fn apply(&self, condition: Condition) -> Condition {
        match self {
            Predicate::NotTrashed => condition.add(Column::Trash.eq(false)),
            Predicate::Category(id) => condition.add(Column::CategoryId.eq(*id)),
            Predicate::MinPrice(min) => condition.add(Column::Price.gte(*min)),
            Predicate::MaxPrice(max) => condition.add(Column::Price.lte(*max)),
            Predicate::Text(text) => {
                condition.add(Expr::col(Column::Name).ilike(like_pattern(text)))
            }
        }
    }
}

/// `%text%` with LIKE wildcards in the user input escaped.
pub fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Name,
    Price,
    View,
    CreatedAt,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "id" => Some(SortField::Id),
            "name" => Some(SortField::Name),
            "price" => Some(SortField::Price),
            "view" => Some(SortField::View),
            "created_at" | "createdAt" => Some(SortField::CreatedAt),
            _ => None,
        }
    }

    fn column(&self) -> Column {
        match self {
            SortField::Id => Column::Id,
            SortField::Name => Column::Name,
            SortField::Price => Column::Price,
            SortField::View => Column::View,
            SortField::CreatedAt => Column::CreatedAt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            field: SortField::Id,
            order: SortOrder::Desc,
        }
    }
}

impl Sort {
    /// No field or an unknown field gives the default sort (id descending).
    /// A known field sorts ascending unless `desc` is asked for.
    pub fn resolve(sort_by: Option<&str>, sort_order: Option<&str>) -> Self {
        match sort_by.and_then(SortField::parse) {
            Some(field) => Self {
                field,
                order: SortOrder::parse_or_asc(sort_order),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub filter: ProductFilter,
    pub sort: Sort,
    pub page: i64,
    pub per_page: i64,
    pub offset: i64,
}

impl CatalogQuery {
    pub fn from_params(params: &ProductSearchQuery) -> AppResult<Self> {
        let (page, per_page, offset) = params.pagination().resolve()?;
        let filter = ProductFilter {
            text: params.q.clone(),
            category_id: params.category_id,
            min_price: params.min_price,
            max_price: params.max_price,
        }
        .normalized()?;
        let sort = Sort::resolve(params.sort_by.as_deref(), params.sort_order.as_deref());

        Ok(Self {
            filter,
            sort,
            page,
            per_page,
            offset,
        })
    }

    /// The base predicate followed by whichever optional predicates are present.
    pub fn predicates(&self) -> Vec<Predicate> {
        let filter = &self.filter;
        let mut predicates = vec![Predicate::NotTrashed];
        if let Some(id) = filter.category_id {
            predicates.push(Predicate::Category(id));
        }
        if let Some(min) = filter.min_price {
            predicates.push(Predicate::MinPrice(min));
        }
        if let Some(max) = filter.max_price {
            predicates.push(Predicate::MaxPrice(max));
        }
        if let Some(text) = &filter.text {
            predicates.push(Predicate::Text(text.clone()));
        }
        predicates
    }

    pub fn condition(&self) -> Condition {
        self.predicates()
            .iter()
            .fold(Condition::all(), |condition, predicate| predicate.apply(condition))
    }

    /// Filtered and ordered select, without paging. Non-id sorts are broken by
    /// id so page boundaries are stable.
    pub fn select(&self) -> Select<Products> {
        let column = self.sort.field.column();
        let finder = Products::find().filter(self.condition());
        let finder = match self.sort.order {
            SortOrder::Asc => finder.order_by_asc(column),
            SortOrder::Desc => finder.order_by_desc(column),
        };
        if self.sort.field == SortField::Id {
            finder
        } else {
            finder.order_by_asc(Column::Id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DbBackend, QueryTrait};

    fn sql(query: &CatalogQuery) -> String {
        query.select().build(DbBackend::Postgres).to_string()
    }

    fn params(
        text: bool,
        category: bool,
        min: bool,
        max: bool,
        category_id: Uuid,
    ) -> ProductSearchQuery {
        ProductSearchQuery {
            q: text.then(|| "mug".to_string()),
            category_id: category.then_some(category_id),
            min_price: min.then_some(100),
            max_price: max.then_some(900),
            ..Default::default()
        }
    }

    #[test]
    fn every_filter_combination_has_exactly_its_predicates() {
        let category_id = Uuid::new_v4();
        for mask in 0u8..16 {
            let (text, category, min, max) =
                (mask & 1 != 0, mask & 2 != 0, mask & 4 != 0, mask & 8 != 0);
            let query =
                CatalogQuery::from_params(&params(text, category, min, max, category_id)).unwrap();
            let predicates = query.predicates();

            assert_eq!(predicates[0], Predicate::NotTrashed, "mask {mask}");
            assert_eq!(
                predicates.contains(&Predicate::Category(category_id)),
                category,
                "mask {mask}"
            );
            assert_eq!(predicates.contains(&Predicate::MinPrice(100)), min, "mask {mask}");
            assert_eq!(predicates.contains(&Predicate::MaxPrice(900)), max, "mask {mask}");
            assert_eq!(
                predicates.contains(&Predicate::Text("mug".into())),
                text,
                "mask {mask}"
            );
            let expected_len = 1 + [text, category, min, max].iter().filter(|p| **p).count();
            assert_eq!(predicates.len(), expected_len, "mask {mask}");

            let rendered = sql(&query);
            assert!(rendered.contains(r#""trash" = FALSE"#), "{rendered}");
            assert_eq!(rendered.contains("ILIKE"), text, "{rendered}");
            assert_eq!(rendered.contains(r#""category_id" ="#), category, "{rendered}");
            assert_eq!(rendered.contains(r#""price" >="#), min, "{rendered}");
            assert_eq!(rendered.contains(r#""price" <="#), max, "{rendered}");
        }
    }

    #[test]
    fn blank_text_is_absent() {
        let query = CatalogQuery::from_params(&ProductSearchQuery {
            q: Some("   ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.predicates(), vec![Predicate::NotTrashed]);
    }

    #[test]
    fn text_is_trimmed() {
        let query = CatalogQuery::from_params(&ProductSearchQuery {
            q: Some("  hoodie ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.filter.text.as_deref(), Some("hoodie"));
    }

    #[test]
    fn text_matches_the_name_only() {
        let query = CatalogQuery::from_params(&ProductSearchQuery {
            q: Some("ferris".into()),
            ..Default::default()
        })
        .unwrap();
        let rendered = sql(&query);
        assert!(rendered.contains(r#""name" ILIKE '%ferris%'"#), "{rendered}");
        assert!(!rendered.contains(r#""description" ILIKE"#), "{rendered}");
    }

    #[test]
    fn malformed_price_range_is_rejected() {
        let inverted = ProductSearchQuery {
            min_price: Some(500),
            max_price: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            CatalogQuery::from_params(&inverted),
            Err(AppError::InvalidArgument(_))
        ));

        let negative = ProductSearchQuery {
            max_price: Some(-1),
            ..Default::default()
        };
        assert!(matches!(
            CatalogQuery::from_params(&negative),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bad_paging_is_rejected() {
        for (page, per_page) in [(0, 10), (-1, 10), (1, 0), (1, -5)] {
            let params = ProductSearchQuery {
                page: Some(page),
                per_page: Some(per_page),
                ..Default::default()
            };
            assert!(
                matches!(CatalogQuery::from_params(&params), Err(AppError::InvalidArgument(_))),
                "page {page} per_page {per_page}"
            );
        }
    }

    #[test]
    fn paging_offsets() {
        let query = CatalogQuery::from_params(&ProductSearchQuery {
            page: Some(3),
            per_page: Some(20),
            ..Default::default()
        })
        .unwrap();
        assert_eq!((query.page, query.per_page, query.offset), (3, 20, 40));
    }

    #[test]
    fn default_sort_is_id_descending() {
        assert_eq!(Sort::resolve(None, None), Sort::default());
        assert_eq!(Sort::resolve(None, Some("asc")), Sort::default());
        let query = CatalogQuery::from_params(&ProductSearchQuery::default()).unwrap();
        assert!(sql(&query).contains(r#""id" DESC"#));
    }

    #[test]
    fn unknown_sort_field_falls_back_to_default() {
        assert_eq!(Sort::resolve(Some("password"), Some("asc")), Sort::default());
    }

    #[test]
    fn known_sort_field_defaults_to_ascending() {
        assert_eq!(
            Sort::resolve(Some("price"), None),
            Sort {
                field: SortField::Price,
                order: SortOrder::Asc
            }
        );
        assert_eq!(
            Sort::resolve(Some("view"), Some("desc")),
            Sort {
                field: SortField::View,
                order: SortOrder::Desc
            }
        );
    }

    #[test]
    fn non_id_sort_gets_id_tie_breaker() {
        let query = CatalogQuery::from_params(&ProductSearchQuery {
            sort_by: Some("name".into()),
            ..Default::default()
        })
        .unwrap();
        let rendered = sql(&query);
        assert!(rendered.contains(r#""name" ASC"#), "{rendered}");
        assert!(rendered.contains(r#""id" ASC"#), "{rendered}");
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("mug"), "%mug%");
        assert_eq!(like_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }
}
