pub mod product_service;
pub mod reservation_service;
