//! Learner-visible URL construction
//!
//! The manager is the authority on the URL the UI embeds: template
//! substitution for `{port}` / `{port:<container>}`, a localhost default,
//! and auto-login decoration.

use std::collections::BTreeMap;

use crate::database::{AutoLoginType, Cookie, Track};

/// Host port backing the "first" mapped port.
///
/// First follows the track's declared port order, not map iteration order.
pub fn first_host_port(track: &Track, ports: &BTreeMap<String, u16>) -> Option<u16> {
    for mapping in &track.app_container_ports {
        if let Some(host) = ports.get(&mapping.container.to_string()) {
            return Some(*host);
        }
    }

    ports.values().next().copied()
}

/// Build the app URL with port substitution and auto-login params
pub fn build_app_url(track: &Track, ports: Option<&BTreeMap<String, u16>>) -> Option<String> {
    let first_port = ports.and_then(|p| first_host_port(track, p));

    let mut url = match &track.app_url_template {
        Some(template) => template.clone(),
        None => format!("http://localhost:{}", first_port?),
    };

    if let Some(port) = first_port {
        url = url.replace("{port}", &port.to_string());
    }

    if let Some(ports) = ports {
        for (container, host) in ports {
            url = url.replace(&format!("{{port:{}}}", container), &host.to_string());
        }
    }

    Some(append_login_params(track, url))
}

/// Append `auto_login_config.params` as a query string when configured
pub fn append_login_params(track: &Track, url: String) -> String {
    if track.auto_login_type != AutoLoginType::UrlParams {
        return url;
    }

    let params = &track.auto_login_config.params;
    if params.is_empty() {
        return url;
    }

    let separator = if url.contains('?') { '&' } else { '?' };
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}{}{}", url, separator, query)
}

/// Cookies the UI injects client-side when cookie auto-login is configured
pub fn auto_login_cookies(track: &Track) -> Vec<Cookie> {
    if track.auto_login_type != AutoLoginType::Cookies {
        return Vec::new();
    }

    track.auto_login_config.cookies.clone()
}
