pub mod cart_service;
pub mod catalog_query;
pub mod order_detail_service;
pub mod order_service;
pub mod product_service;
pub mod report_service;
