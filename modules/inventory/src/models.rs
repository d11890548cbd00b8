//! Request/response DTOs for the inventory HTTP and RPC surfaces.

use platform_contracts::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Product, ProductWithTotal};

// --- RPC surface ---

#[derive(Debug, Clone, Deserialize)]
pub struct CheckProductQuantity {
    pub product_id: Uuid,
    pub quantity: i64,
    pub price: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckAndReserveRequest {
    pub transaction_id: Uuid,
    pub products: Vec<CheckProductQuantity>,
}

impl CheckAndReserveRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.products.is_empty() {
            return Err(AppError::invalid_argument("products must not be empty"));
        }
        for line in &self.products {
            if line.quantity <= 0 {
                return Err(AppError::invalid_argument("quantity must be positive"));
            }
            if line.price <= 0 {
                return Err(AppError::invalid_argument("price must be positive"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnerGetProductRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
}

// --- Product CRUD surface ---

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i64,
}

impl CreateProductRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::invalid_argument("name must not be empty"));
        }
        if self.name.len() > 255 {
            return Err(AppError::invalid_argument("name must be at most 255 characters"));
        }
        if self.price <= 0 {
            return Err(AppError::invalid_argument("price must be positive"));
        }
        if self.quantity < 0 {
            return Err(AppError::invalid_argument("quantity must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub quantity: Option<i64>,
}

impl UpdateProductRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AppError::invalid_argument("name must not be empty"));
            }
        }
        if matches!(self.price, Some(p) if p <= 0) {
            return Err(AppError::invalid_argument("price must be positive"));
        }
        if matches!(self.quantity, Some(q) if q < 0) {
            return Err(AppError::invalid_argument("quantity must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i64,
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            description: product.description.clone(),
            price: product.price,
            quantity: product.quantity,
        }
    }
}

impl From<&ProductWithTotal> for ProductResponse {
    fn from(product: &ProductWithTotal) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            description: product.description.clone(),
            price: product.price,
            quantity: product.quantity,
        }
    }
}

/// URL-safe slug derived from the product name: lowercase alphanumerics with
/// single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Mechanical Keyboard"), "mechanical-keyboard");
        assert_eq!(slugify("  USB--C  Hub! "), "usb-c-hub");
        assert_eq!(slugify("Déjà Vu"), "d-j-vu");
    }

    #[test]
    fn reserve_request_rejects_bad_lines() {
        let request = CheckAndReserveRequest {
            transaction_id: Uuid::new_v4(),
            products: vec![],
        };
        assert!(request.validate().is_err());

        let request = CheckAndReserveRequest {
            transaction_id: Uuid::new_v4(),
            products: vec![CheckProductQuantity {
                product_id: Uuid::new_v4(),
                quantity: 0,
                price: 100,
            }],
        };
        assert!(request.validate().is_err());

        let request = CheckAndReserveRequest {
            transaction_id: Uuid::new_v4(),
            products: vec![CheckProductQuantity {
                product_id: Uuid::new_v4(),
                quantity: 1,
                price: -5,
            }],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn create_product_validation() {
        let ok = CreateProductRequest {
            name: "Desk Lamp".into(),
            description: None,
            price: 25_000,
            quantity: 10,
        };
        assert!(ok.validate().is_ok());

        let bad = CreateProductRequest {
            name: "   ".into(),
            description: None,
            price: 25_000,
            quantity: 10,
        };
        assert!(bad.validate().is_err());
    }
}
