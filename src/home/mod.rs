//! Smart-home device gateway
//!
//! Everything the orchestrator does to the physical world goes through
//! [`DeviceGateway`]. Failures are reported as `false`/`None` so callers can
//! turn them into a spoken apology instead of an error path.

mod client;

pub use client::HomeAssistantClient;

use async_trait::async_trait;
use serde_json::Value;

/// Entity label that marks devices exposed to voice control
pub const DEFAULT_ENTITY_LABEL: &str = "voice-assistant";

/// Domains used when no route narrowed the request
pub const ALL_DOMAINS: &[&str] = &[
    "light",
    "climate",
    "switch",
    "scene",
    "cover",
    "media_player",
    "timer",
];

/// Device/service gateway
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Invoke `domain.service` with `payload`, returning whether it succeeded
    async fn call_service(&self, domain: &str, service: &str, payload: Value) -> bool;

    /// Current state object of an entity, if it could be fetched
    async fn get_state(&self, entity_id: &str) -> Option<Value>;

    /// Lower-cased area and device names for transcript correction
    async fn voice_vocabulary(&self) -> Vec<String>;

    /// Devices relevant to a request, one JSON object per line
    async fn device_context(&self, text: &str, room: &str, route: Option<&str>) -> String;
}

/// Entity domains relevant to a route
#[must_use]
pub fn route_domains(route: Option<&str>) -> &'static [&'static str] {
    match route {
        Some("media") => &["media_player"],
        Some("timers") => &["timer"],
        Some("home_control") => &["light", "climate", "switch", "scene", "cover"],
        _ => ALL_DOMAINS,
    }
}

/// Entity-id slug of a room name
///
/// `"Wohn Zimmer"` becomes `wohn_zimmer`, `"Küche"` becomes `kueche`.
#[must_use]
pub fn room_slug(room: &str) -> String {
    let mut slug = String::with_capacity(room.len());
    for c in room.trim().to_lowercase().chars() {
        match c {
            ' ' => slug.push('_'),
            'ä' => slug.push_str("ae"),
            'ö' => slug.push_str("oe"),
            'ü' => slug.push_str("ue"),
            'ß' => slug.push_str("ss"),
            other => slug.push(other),
        }
    }
    slug
}

/// Entity id of a room-scoped device, e.g. `media_player.kueche`
#[must_use]
pub fn room_entity(domain: &str, room: &str) -> String {
    format!("{domain}.{}", room_slug(room))
}
