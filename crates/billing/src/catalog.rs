//! Product catalog
//!
//! Static mapping from SKU to token quantity and price. Immutable; the
//! mapping from SKU to checkout-provider product id lives in configuration.

use serde::Serialize;

/// A purchasable token pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub sku: &'static str,
    pub name: &'static str,
    pub tokens: i32,
    pub price_cents: i32,
}

pub const CURRENCY: &str = "USD";

pub const PRODUCTS: &[Product] = &[
    Product {
        sku: "ocr_3",
        name: "3 OCR Credits",
        tokens: 3,
        price_cents: 299,
    },
    Product {
        sku: "ocr_10",
        name: "10 OCR Credits",
        tokens: 10,
        price_cents: 799,
    },
    Product {
        sku: "ocr_30",
        name: "30 OCR Credits",
        tokens: 30,
        price_cents: 1999,
    },
];

/// Look up a product by SKU
pub fn find_product(sku: &str) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.sku == sku)
}

/// Public listing entry for the products endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProductListing {
    pub id: String,
    pub name: String,
    pub tokens: i32,
    pub price_cents: i32,
    pub price_display: String,
}

impl From<&Product> for ProductListing {
    fn from(product: &Product) -> Self {
        Self {
            id: product.sku.to_string(),
            name: product.name.to_string(),
            tokens: product.tokens,
            price_cents: product.price_cents,
            price_display: format_price(product.price_cents),
        }
    }
}

/// Full catalog in display order
pub fn list_products() -> Vec<ProductListing> {
    PRODUCTS.iter().map(ProductListing::from).collect()
}

fn format_price(cents: i32) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_and_unknown_sku() {
        let product = find_product("ocr_10").unwrap();
        assert_eq!(product.tokens, 10);
        assert_eq!(product.price_cents, 799);
        assert!(find_product("ocr_1000").is_none());
    }

    #[test]
    fn test_skus_are_unique() {
        let mut skus: Vec<_> = PRODUCTS.iter().map(|p| p.sku).collect();
        skus.sort_unstable();
        skus.dedup();
        assert_eq!(skus.len(), PRODUCTS.len());
    }

    #[test]
    fn test_listing_formats_price() {
        let listing = list_products();
        assert_eq!(listing.len(), 3);
        assert_eq!(listing[0].id, "ocr_3");
        assert_eq!(listing[0].price_display, "$2.99");
        assert_eq!(listing[2].price_display, "$19.99");
    }

    #[test]
    fn test_every_product_grants_tokens() {
        for product in PRODUCTS {
            assert!(product.tokens > 0, "{} grants no tokens", product.sku);
            assert!(product.price_cents > 0, "{} is free", product.sku);
        }
    }
}
