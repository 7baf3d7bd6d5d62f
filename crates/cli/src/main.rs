//! Pocketshop CLI - browse the catalog and manage a cart from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Browse
//! pocketshop products --category electronics
//! pocketshop product 3
//!
//! # Sign in (stored in the session cache)
//! pocketshop login --uid abc123 --email shopper@example.org
//!
//! # Cart
//! pocketshop cart add 3 --quantity 2
//! pocketshop cart show
//! pocketshop cart set -NxA1b2 5
//! pocketshop cart watch
//! ```
//!
//! # Commands
//!
//! - `products`, `categories`, `product` - Read the catalog
//! - `login`, `logout`, `whoami` - Manage the cached session
//! - `cart` - Show, follow and change the signed-in user's cart

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use pocketshop_cart::CartConfig;
use pocketshop_core::ProductId;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "pocketshop")]
#[command(author, version, about = "Pocketshop storefront CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List products
    Products {
        /// Only this category ("all" for everything)
        #[arg(short, long)]
        category: Option<String>,
    },
    /// List product categories
    Categories,
    /// Show one product
    Product {
        /// Product ID
        id: ProductId,
    },
    /// Sign in as a user
    Login {
        /// User ID issued by the auth provider
        #[arg(short, long)]
        uid: String,

        /// Email address
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Sign out
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Work with the signed-in user's cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart
    Show,
    /// Print the cart every time it changes, until Ctrl+C
    Watch,
    /// Add a product as a new line
    Add {
        /// Product ID
        product: ProductId,

        /// Number of units
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set the quantity of a line (0 or less removes it)
    Set {
        /// Line item ID
        #[arg(allow_hyphen_values = true)]
        item: String,

        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Add one unit to a line
    Inc {
        /// Line item ID
        #[arg(allow_hyphen_values = true)]
        item: String,
    },
    /// Remove one unit from a line
    Dec {
        /// Line item ID
        #[arg(allow_hyphen_values = true)]
        item: String,
    },
    /// Remove a line
    Remove {
        /// Line item ID
        #[arg(allow_hyphen_values = true)]
        item: String,
    },
    /// Remove every line
    Clear,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Defaults to info for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pocketshop_cart=info,pocketshop_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match CartConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let sentry_guard = init_sentry(&config);
    init_tracing();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        // exit() skips destructors; flush Sentry first
        drop(sentry_guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &CartConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Products { category } => {
            commands::catalog::products(config, category.as_deref()).await?;
        }
        Commands::Categories => commands::catalog::categories(config).await?,
        Commands::Product { id } => commands::catalog::product(config, id).await?,
        Commands::Login { uid, email } => commands::session::login(config, uid, email).await?,
        Commands::Logout => commands::session::logout(config).await?,
        Commands::Whoami => commands::session::whoami(config).await,
        Commands::Cart { action } => {
            let ctx = commands::cart::CartContext::open(config).await?;
            let result = match action {
                CartAction::Show => ctx.show().await,
                CartAction::Watch => ctx.watch().await,
                CartAction::Add { product, quantity } => ctx.add(product, quantity).await,
                CartAction::Set { item, quantity } => ctx.set(&item.into(), quantity).await,
                CartAction::Inc { item } => ctx.increment(&item.into()).await,
                CartAction::Dec { item } => ctx.decrement(&item.into()).await,
                CartAction::Remove { item } => ctx.remove(&item.into()).await,
                CartAction::Clear => ctx.clear().await,
            };
            ctx.close().await;
            result?;
        }
    }
    Ok(())
}
