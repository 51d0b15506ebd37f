//! Build identity, printed by `--version` and sent as the HTTP user agent.

/// Release string. Release builds stamp `SITEWATCH_VERSION`; anything else
/// reports the crate version.
pub const VERSION: &str = match option_env!("SITEWATCH_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// `User-Agent` for requests to the monitored site and to the VK API.
pub fn user_agent() -> String {
    format!("sitewatch/{VERSION}")
}
