//! Effective unit price of a catalog product.

/// Price actually charged for a product.
///
/// The sale price wins only when the product is flagged on sale and the sale
/// price is present and positive; anything else falls back to the base price.
/// The result is never negative.
pub fn effective_price(price: i64, price_sale: Option<i64>, is_on_sale: bool) -> i64 {
    match price_sale {
        Some(sale) if is_on_sale && sale > 0 => sale,
        _ => price.max(0),
    }
}
