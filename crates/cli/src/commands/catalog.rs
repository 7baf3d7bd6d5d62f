//! Catalog browsing commands.

use pocketshop_cart::{CartConfig, CatalogClient, CategoryFilter, Product};
use pocketshop_core::{ConversionRate, ProductId};
use tracing::info;

/// List products, optionally for one category.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub async fn products(
    config: &CartConfig,
    category: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = CatalogClient::new(&config.catalog);
    let filter = category.map_or(CategoryFilter::All, CategoryFilter::parse);

    let products = client.products_in(&filter).await?;
    info!(count = products.len(), ?filter, "Fetched products");

    for product in &products {
        print_summary(product, &config.conversion);
    }
    Ok(())
}

/// List categories, starting with the implicit "all".
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
#[allow(clippy::print_stdout)]
pub async fn categories(config: &CartConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = CatalogClient::new(&config.catalog);
    let categories = client.categories().await?;

    println!("all");
    for category in categories {
        println!("{category}");
    }
    Ok(())
}

/// Show a single product.
///
/// # Errors
///
/// Returns an error if the product does not exist or the catalog cannot be
/// read.
#[allow(clippy::print_stdout)]
pub async fn product(config: &CartConfig, id: ProductId) -> Result<(), Box<dyn std::error::Error>> {
    let client = CatalogClient::new(&config.catalog);
    let product = client.product(id).await?;

    println!("{}", product.title);
    println!("  Price:    {}", product.display_price(&config.conversion));
    println!("  Category: {}", product.category);
    println!(
        "  Rating:   {:.1} ({} reviews)",
        product.rating.rate, product.rating.count
    );
    println!("  Image:    {}", product.image);
    if !product.description.is_empty() {
        println!();
        println!("{}", product.description);
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_summary(product: &Product, conversion: &ConversionRate) {
    println!(
        "{:>4}  {:>12}  {}",
        product.id,
        product.display_price(conversion).to_string(),
        product.title
    );
}
