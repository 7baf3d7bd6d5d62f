//! Session commands.
//!
//! There is no interactive sign-in here: `login` records the user the auth
//! provider issued, and every later command treats the session cache as the
//! provider's answer.

use pocketshop_cart::{AuthState, AuthUser, CartConfig, SessionCache};

/// Sign in as `uid`.
///
/// # Errors
///
/// Returns an error if the session cache cannot be written.
#[allow(clippy::print_stdout)]
pub async fn login(
    config: &CartConfig,
    uid: String,
    email: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let auth = AuthState::restore(SessionCache::new(&config.session_cache_path)).await;
    let user = AuthUser::new(uid, email);
    auth.apply(Some(user.clone())).await?;

    println!("Signed in as {}", describe(&user));
    Ok(())
}

/// Sign out.
///
/// # Errors
///
/// Returns an error if the session cache cannot be removed.
#[allow(clippy::print_stdout)]
pub async fn logout(config: &CartConfig) -> Result<(), Box<dyn std::error::Error>> {
    let auth = AuthState::restore(SessionCache::new(&config.session_cache_path)).await;
    auth.sign_out().await?;

    println!("Signed out");
    Ok(())
}

/// Print the cached user.
#[allow(clippy::print_stdout)]
pub async fn whoami(config: &CartConfig) {
    match SessionCache::new(&config.session_cache_path).load().await {
        Some(user) => println!("{}", describe(&user)),
        None => println!("Not signed in"),
    }
}

fn describe(user: &AuthUser) -> String {
    user.email
        .as_ref()
        .map_or_else(|| user.uid.to_string(), |email| format!("{email} ({})", user.uid))
}
