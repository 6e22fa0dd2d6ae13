//! Built-in tool handlers
//!
//! Each handler turns a tool call into gateway service calls and a short
//! German reply. Rooms default to the living room when the call names none.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use super::executor::ToolOutcome;
use crate::broker::SatelliteAction;
use crate::home::{DeviceGateway, room_entity};
use crate::semantic::{SemanticRouter, TeachOutcome};
use crate::{Error, Result};

/// Room used when a call does not name one
pub const DEFAULT_ROOM: &str = "wohnzimmer";

/// Player states in which nothing is playing
const IDLE_PLAYER_STATES: &[&str] = &["idle", "off", "standby", "unknown", "unavailable"];

pub(super) struct HandlerContext<'a> {
    pub gateway: &'a dyn DeviceGateway,
    pub router: Option<&'a SemanticRouter>,
}

/// Run the handler registered under `name`
pub(super) async fn dispatch(
    ctx: &HandlerContext<'_>,
    name: &str,
    args: &Map<String, Value>,
) -> Result<ToolOutcome> {
    let gw = ctx.gateway;
    match name {
        "control_light" => control_light(gw, args).await,
        "set_temperature" => set_temperature(gw, args).await,
        "activate_scene" => activate_scene(gw, args).await,
        "play_music" => enqueue_music(gw, args, "play").await,
        "queue_music" => enqueue_music(gw, args, "add").await,
        "stop_music" => {
            player_command(gw, args, "media_pause", |room| {
                format!("Musik im {room} wurde gestoppt.")
            })
            .await
        }
        "resume_music" => {
            player_command(gw, args, "media_play", |room| {
                format!("Musik im {room} wird fortgesetzt.")
            })
            .await
        }
        "next_track" => {
            player_command(gw, args, "media_next_track", |room| {
                format!("Nächstes Lied im {room} wird gespielt.")
            })
            .await
        }
        "previous_track" => {
            player_command(gw, args, "media_previous_track", |room| {
                format!("Vorheriges Lied im {room} wird gespielt.")
            })
            .await
        }
        "clear_queue" => {
            player_command(gw, args, "clear_playlist", |room| {
                format!("Die Warteschlange im {room} wurde geleert.")
            })
            .await
        }
        "manage_volume" => manage_volume(gw, args).await,
        "whats_playing" => Ok(whats_playing(gw, args).await),
        "set_timer" => set_timer(gw, args).await,
        "cancel_timer" => Ok(cancel_timer(gw, args).await),
        "timer_remaining" => Ok(timer_remaining(gw, args).await),
        "teach_route" => teach_route(ctx.router, args).await,
        other => Err(Error::Tool(format!("unknown tool: {other}"))),
    }
}

/// Spoken reply for a handler error
pub(super) fn error_reply(error: &Error) -> String {
    match error {
        Error::Tool(_) => "Diese Funktion kenne ich leider nicht.".to_string(),
        Error::InvalidInput(_) => "Dafür fehlen mir leider Angaben.".to_string(),
        _ => "Tut mir leid, da ist etwas schiefgelaufen.".to_string(),
    }
}

fn room(args: &Map<String, Value>) -> &str {
    args.get("room")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_ROOM)
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("missing argument: {key}")))
}

/// Numeric argument, accepting numbers and numeric strings
fn number(args: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::InvalidInput(format!("{key} is not a number: {s}"))),
        Some(other) => Err(Error::InvalidInput(format!("{key} is not a number: {other}"))),
    }
}

/// Non-negative whole number argument, absent meaning zero
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn count(args: &Map<String, Value>, key: &str) -> Result<u64> {
    match number(args, key)? {
        None => Ok(0),
        Some(n) if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n < u64::MAX as f64 => {
            Ok(n as u64)
        }
        Some(n) => Err(Error::InvalidInput(format!("{key} must be a whole number: {n}"))),
    }
}

async fn control_light(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> Result<ToolOutcome> {
    let action = required_str(args, "action")?;
    if !matches!(action, "turn_on" | "turn_off" | "toggle") {
        return Err(Error::InvalidInput(format!("unsupported light action: {action}")));
    }
    let entity_id = required_str(args, "entity_id")?;

    let mut payload = json!({ "entity_id": entity_id });
    if let Some(brightness) = number(args, "brightness_pct")? {
        payload["brightness_pct"] = json!(brightness.clamp(0.0, 100.0));
    }

    let success = gw.call_service("light", action, payload).await;
    Ok(ToolOutcome::from_bool(
        success,
        "Okay.",
        "Tut mir leid, ich konnte die Aktion leider nicht ausführen.",
    ))
}

async fn set_temperature(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> Result<ToolOutcome> {
    let entity_id = required_str(args, "entity_id")?;
    let temperature = number(args, "temperature")?
        .ok_or_else(|| Error::InvalidInput("missing argument: temperature".to_string()))?;

    let payload = json!({ "entity_id": entity_id, "temperature": temperature });
    let success = gw.call_service("climate", "set_temperature", payload).await;
    Ok(ToolOutcome::from_bool(
        success,
        format!("Temperatur auf {temperature} Grad gesetzt."),
        format!("Konnte Temperatur nicht auf {temperature} Grad setzen."),
    ))
}

async fn activate_scene(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> Result<ToolOutcome> {
    let entity_id = required_str(args, "entity_id")?;
    let success = gw
        .call_service("scene", "turn_on", json!({ "entity_id": entity_id }))
        .await;
    Ok(ToolOutcome::from_bool(
        success,
        "Okay.",
        "Tut mir leid, konnte die Szene nicht aktivieren.",
    ))
}

async fn enqueue_music(
    gw: &dyn DeviceGateway,
    args: &Map<String, Value>,
    enqueue: &str,
) -> Result<ToolOutcome> {
    let query = required_str(args, "query")?;
    let media_type = args
        .get("media_type")
        .and_then(Value::as_str)
        .unwrap_or("track");
    let room = room(args);

    let payload = json!({
        "entity_id": room_entity("media_player", room),
        "media_id": query,
        "media_type": media_type,
        "enqueue": enqueue,
    });
    let success = gw.call_service("music_assistant", "play_media", payload).await;

    let ok = if enqueue == "add" {
        format!("{query} ist in der Warteschlange.")
    } else {
        "Okay.".to_string()
    };
    Ok(ToolOutcome::from_bool(success, ok, "Fehler beim Starten der Musik."))
}

async fn player_command(
    gw: &dyn DeviceGateway,
    args: &Map<String, Value>,
    service: &str,
    reply: impl FnOnce(&str) -> String,
) -> Result<ToolOutcome> {
    let room = room(args);
    let success = gw
        .call_service(
            "media_player",
            service,
            json!({ "entity_id": room_entity("media_player", room) }),
        )
        .await;
    Ok(ToolOutcome::from_bool(
        success,
        reply(room),
        format!("Der Player im {room} reagiert gerade nicht."),
    ))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
async fn manage_volume(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> Result<ToolOutcome> {
    let level = number(args, "level")?
        .ok_or_else(|| Error::InvalidInput("missing argument: level".to_string()))?;
    if !(0.0..=100.0).contains(&level) {
        return Err(Error::InvalidInput(format!("volume out of range: {level}")));
    }
    let level = level.round() as u8;
    let room = room(args);

    let payload = json!({
        "entity_id": room_entity("media_player", room),
        "volume_level": f64::from(level) / 100.0,
    });
    let success = gw.call_service("media_player", "volume_set", payload).await;

    Ok(ToolOutcome::from_bool(
        success,
        format!("Lautstärke im {room} auf {level} Prozent gesetzt."),
        "Fehler beim Ändern der Lautstärke.",
    )
    .with_action(SatelliteAction::Volume { level }))
}

async fn whats_playing(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> ToolOutcome {
    let room = room(args);
    let Some(state) = gw.get_state(&room_entity("media_player", room)).await else {
        return ToolOutcome::failed(format!("Konnte den Player-Status im {room} nicht abrufen."));
    };
    ToolOutcome::ok(describe_player(&state, room))
}

fn describe_player(state: &Value, room: &str) -> String {
    let status = state.get("state").and_then(Value::as_str).unwrap_or("unknown");
    if IDLE_PLAYER_STATES.contains(&status) {
        return format!("Im {room} wird gerade nichts abgespielt.");
    }

    let attributes = &state["attributes"];
    let title = attributes["media_title"]
        .as_str()
        .unwrap_or("einem unbekannten Titel");
    let artist = attributes["media_artist"]
        .as_str()
        .unwrap_or("einem unbekannten Künstler");

    if status == "paused" {
        format!("Die Musik ist im {room} pausiert. Das aktuelle Lied ist '{title}' von {artist}.")
    } else {
        format!("Im {room} läuft gerade '{title}' von {artist}.")
    }
}

async fn set_timer(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> Result<ToolOutcome> {
    let hours = count(args, "hours")?;
    let minutes = count(args, "minutes")?;
    let seconds = count(args, "seconds")?;
    let room = room(args);

    let total = hours
        .checked_mul(3600)
        .zip(minutes.checked_mul(60))
        .and_then(|(h, m)| h.checked_add(m))
        .and_then(|hm| hm.checked_add(seconds))
        .ok_or_else(|| Error::InvalidInput("timer duration out of range".to_string()))?;
    if total == 0 {
        return Ok(ToolOutcome::failed(
            "Es wurde keine Zeitdauer für den Timer angegeben.",
        ));
    }

    let payload = json!({
        "entity_id": room_entity("timer", room),
        "duration": format_clock(total),
    });
    let success = gw.call_service("timer", "start", payload).await;

    Ok(ToolOutcome::from_bool(
        success,
        format!("Timer für {} im {room} gestartet.", spoken_duration(hours, minutes, seconds)),
        format!("Konnte den Timer im {room} nicht starten."),
    )
    .with_action(SatelliteAction::Timer { seconds: total }))
}

async fn cancel_timer(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> ToolOutcome {
    let room = room(args);
    let success = gw
        .call_service("timer", "cancel", json!({ "entity_id": room_entity("timer", room) }))
        .await;
    ToolOutcome::from_bool(
        success,
        format!("Timer im {room} wurde abgebrochen."),
        format!("Konnte den Timer im {room} nicht abbrechen."),
    )
}

async fn timer_remaining(gw: &dyn DeviceGateway, args: &Map<String, Value>) -> ToolOutcome {
    let room = room(args);
    let Some(state) = gw.get_state(&room_entity("timer", room)).await else {
        return ToolOutcome::failed(format!(
            "Konnte den Timer-Status im {room} nicht abrufen. Möglicherweise existiert er nicht."
        ));
    };
    ToolOutcome::ok(describe_timer(&state, room, Utc::now()))
}

fn describe_timer(state: &Value, room: &str, now: DateTime<Utc>) -> String {
    match state.get("state").and_then(Value::as_str) {
        Some("idle") => format!("Es läuft aktuell kein Timer im {room}."),
        Some("paused") => format!("Der Timer im {room} ist derzeit pausiert."),
        Some("active") => {
            let finishes_at = state["attributes"]["finishes_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            let Some(finishes_at) = finishes_at else {
                return format!(
                    "Der Timer im {room} ist aktiv, \
                     aber ich kann die verbleibende Zeit nicht berechnen."
                );
            };

            let remaining = (finishes_at.with_timezone(&Utc) - now).num_seconds();
            if remaining <= 0 {
                return format!("Der Timer im {room} ist gerade abgelaufen.");
            }

            let remaining = remaining.unsigned_abs();
            let (hours, minutes, seconds) =
                (remaining / 3600, remaining % 3600 / 60, remaining % 60);
            format!("Der Timer läuft noch {}.", spoken_duration(hours, minutes, seconds))
        }
        Some(other) => format!("Der Status des Timers im {room} ist: {other}."),
        None => format!("Der Status des Timers im {room} ist unbekannt."),
    }
}

/// `H:MM:SS` as accepted by the timer service
fn format_clock(total: u64) -> String {
    format!("{}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

/// German duration phrase, e.g. `1 Stunde, 30 Minuten und 5 Sekunden`
fn spoken_duration(hours: u64, minutes: u64, seconds: u64) -> String {
    let unit = |n: u64, one: &str, many: &str| format!("{n} {}", if n == 1 { one } else { many });

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(unit(hours, "Stunde", "Stunden"));
    }
    if minutes > 0 {
        parts.push(unit(minutes, "Minute", "Minuten"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(unit(seconds, "Sekunde", "Sekunden"));
    }

    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} und {last}", rest.join(", ")),
        _ => parts.concat(),
    }
}

async fn teach_route(
    router: Option<&SemanticRouter>,
    args: &Map<String, Value>,
) -> Result<ToolOutcome> {
    let router = router.ok_or_else(|| Error::Tool("routing is not available".to_string()))?;
    let route = required_str(args, "route")?;
    let utterance = required_str(args, "utterance")?;

    let outcome = match router.teach(route, utterance).await? {
        TeachOutcome::Learned { route, utterance } => ToolOutcome::ok(format!(
            "Okay, ich habe gelernt, dass '{utterance}' die Kategorie '{route}' auslöst."
        )),
        TeachOutcome::AlreadyKnown { route, utterance } => ToolOutcome::ok(format!(
            "Ich weiß bereits, dass '{utterance}' zu '{route}' gehört."
        )),
        TeachOutcome::Conflict {
            existing_route,
            utterance,
        } => ToolOutcome::failed(format!(
            "Konflikt: '{utterance}' löst bereits die Kategorie '{existing_route}' aus."
        )),
    };
    Ok(outcome)
}
