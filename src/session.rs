//! Media volume ducking for the duration of a voice session
//!
//! Wake and session-end events arrive in order but their volume work runs on
//! separate tasks. The session bookkeeping ([`VolumeDucker::open`] and
//! [`VolumeDucker::close`]) is synchronous so the dispatcher records it in
//! event order; the gateway calls for one room are serialized by a per-room
//! lock, and a duck whose session has already closed is skipped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;

use crate::home::{DeviceGateway, room_entity};

/// Default ducked volume (0.0-1.0)
pub const DEFAULT_DUCK_VOLUME: f64 = 0.2;

#[derive(Debug, Default)]
struct RoomSession {
    epoch: u64,
    open: bool,
    saved: Option<f64>,
}

/// Lowers a room's media player while the assistant listens and restores
/// it when the session ends
pub struct VolumeDucker {
    gateway: Arc<dyn DeviceGateway>,
    duck_volume: f64,
    sessions: Mutex<HashMap<String, RoomSession>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VolumeDucker {
    /// Create a ducker lowering players to `duck_volume`
    #[must_use]
    pub fn new(gateway: Arc<dyn DeviceGateway>, duck_volume: f64) -> Self {
        Self {
            gateway,
            duck_volume: duck_volume.clamp(0.0, 1.0),
            sessions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Mark a session as started and return its epoch
    pub fn open(&self, room: &str) -> u64 {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.entry(room.to_string()).or_default();
        session.epoch += 1;
        session.open = true;
        session.epoch
    }

    /// Mark the room's session as ended
    ///
    /// A duck of that session still in flight will not lower the volume.
    pub fn close(&self, room: &str) {
        if let Some(session) = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(room)
        {
            session.open = false;
        }
    }

    /// Open a session and duck the room's player
    pub async fn duck(&self, room: &str) {
        let epoch = self.open(room);
        self.duck_session(room, epoch).await;
    }

    /// Close the session and restore the room's player
    pub async fn restore(&self, room: &str) {
        self.close(room);
        self.restore_saved(room).await;
    }

    /// Duck the room's player for session `epoch` if it is playing louder
    /// than the duck volume
    pub async fn duck_session(&self, room: &str, epoch: u64) {
        let lock = self.room_lock(room);
        let _guard = lock.lock().await;

        if !self.is_current(room, epoch) {
            return;
        }

        let entity_id = room_entity("media_player", room);
        let Some(state) = self.gateway.get_state(&entity_id).await else {
            return;
        };

        if state["state"].as_str() != Some("playing") {
            return;
        }
        let Some(volume) = state["attributes"]["volume_level"].as_f64() else {
            return;
        };
        if volume <= self.duck_volume {
            return;
        }

        {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(session) = sessions.get_mut(room).filter(|s| s.open && s.epoch == epoch)
            else {
                tracing::debug!(room, "session ended before duck");
                return;
            };
            // keep the level from before an earlier, unrestored duck
            session.saved.get_or_insert(volume);
        }

        let ok = self
            .gateway
            .call_service(
                "media_player",
                "volume_set",
                json!({ "entity_id": entity_id, "volume_level": self.duck_volume }),
            )
            .await;
        if ok {
            tracing::debug!(room, from = volume, to = self.duck_volume, "ducked media volume");
        } else {
            tracing::warn!(room, "failed to duck media volume");
        }
    }

    /// Restore the level remembered for the room, if any
    ///
    /// Waits for a duck of the same room that is still running.
    pub async fn restore_saved(&self, room: &str) {
        let lock = self.room_lock(room);
        let _guard = lock.lock().await;

        let saved = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(room)
            .and_then(|session| session.saved.take());
        let Some(volume) = saved else {
            return;
        };

        let ok = self
            .gateway
            .call_service(
                "media_player",
                "volume_set",
                json!({ "entity_id": room_entity("media_player", room), "volume_level": volume }),
            )
            .await;
        if ok {
            tracing::debug!(room, volume, "restored media volume");
        } else {
            tracing::warn!(room, "failed to restore media volume");
        }
    }

    /// Whether a level is remembered for the room
    #[must_use]
    pub fn is_ducked(&self, room: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .is_some_and(|session| session.saved.is_some())
    }

    fn is_current(&self, room: &str, epoch: u64) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .is_some_and(|session| session.open && session.epoch == epoch)
    }

    fn room_lock(&self, room: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(room.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;

    struct Player {
        state: Value,
        calls: Mutex<Vec<Value>>,
        delay: Duration,
    }

    impl Player {
        /// Level of the last volume change, or the initial one
        fn volume(&self) -> f64 {
            self.calls
                .lock()
                .unwrap()
                .last()
                .map_or(&self.state["attributes"], |call| call)["volume_level"]
                .as_f64()
                .unwrap()
        }
    }

    #[async_trait]
    impl DeviceGateway for Player {
        async fn call_service(&self, _domain: &str, _service: &str, payload: Value) -> bool {
            self.calls.lock().unwrap().push(payload);
            true
        }

        async fn get_state(&self, _entity_id: &str) -> Option<Value> {
            tokio::time::sleep(self.delay).await;
            Some(self.state.clone())
        }

        async fn voice_vocabulary(&self) -> Vec<String> {
            Vec::new()
        }

        async fn device_context(&self, _text: &str, _room: &str, _route: Option<&str>) -> String {
            String::new()
        }
    }

    fn player(state: &str, volume: f64) -> Arc<Player> {
        slow_player(state, volume, Duration::ZERO)
    }

    fn slow_player(state: &str, volume: f64, delay: Duration) -> Arc<Player> {
        Arc::new(Player {
            state: json!({"state": state, "attributes": {"volume_level": volume}}),
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    #[tokio::test]
    async fn test_duck_and_restore() {
        let gw = player("playing", 0.8);
        let ducker = VolumeDucker::new(gw.clone(), 0.2);

        ducker.duck("Küche").await;
        assert!(ducker.is_ducked("Küche"));
        ducker.restore("Küche").await;
        assert!(!ducker.is_ducked("Küche"));

        let calls = gw.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["entity_id"], "media_player.kueche");
        assert_eq!(calls[0]["volume_level"], 0.2);
        assert_eq!(calls[1]["volume_level"], 0.8);
    }

    #[tokio::test]
    async fn test_paused_player_untouched() {
        let gw = player("paused", 0.8);
        let ducker = VolumeDucker::new(gw.clone(), 0.2);

        ducker.duck("bad").await;
        ducker.restore("bad").await;
        assert!(gw.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quiet_player_untouched() {
        let gw = player("playing", 0.1);
        let ducker = VolumeDucker::new(gw.clone(), 0.2);

        ducker.duck("bad").await;
        assert!(!ducker.is_ducked("bad"));
    }

    #[tokio::test]
    async fn test_session_end_during_duck_leaves_volume() {
        let gw = slow_player("playing", 0.8, Duration::from_millis(50));
        let ducker = VolumeDucker::new(gw.clone(), 0.2);

        tokio::join!(ducker.duck("bad"), ducker.restore("bad"));

        assert!((gw.volume() - 0.8).abs() < f64::EPSILON);
        assert!(gw.calls.lock().unwrap().is_empty());
        assert!(!ducker.is_ducked("bad"));
    }

    #[tokio::test]
    async fn test_session_end_while_state_pending_skips_duck() {
        let gw = slow_player("playing", 0.8, Duration::from_millis(50));
        let ducker = Arc::new(VolumeDucker::new(gw.clone(), 0.2));

        let epoch = ducker.open("bad");
        let duck = tokio::spawn({
            let ducker = ducker.clone();
            async move { ducker.duck_session("bad", epoch).await }
        });
        tokio::task::yield_now().await;

        // the duck already holds the room lock and is reading the player state
        tokio::time::sleep(Duration::from_millis(10)).await;
        ducker.restore("bad").await;
        duck.await.unwrap();

        assert!((gw.volume() - 0.8).abs() < f64::EPSILON);
        assert!(!ducker.is_ducked("bad"));
    }

    #[tokio::test]
    async fn test_duck_after_close_is_skipped() {
        let gw = player("playing", 0.8);
        let ducker = VolumeDucker::new(gw.clone(), 0.2);

        let epoch = ducker.open("bad");
        ducker.close("bad");
        ducker.restore_saved("bad").await;
        ducker.duck_session("bad", epoch).await;

        assert!(gw.calls.lock().unwrap().is_empty());
        assert!(!ducker.is_ducked("bad"));
    }

    #[tokio::test]
    async fn test_stale_epoch_is_skipped() {
        let gw = player("playing", 0.8);
        let ducker = VolumeDucker::new(gw.clone(), 0.2);

        let first = ducker.open("bad");
        let second = ducker.open("bad");
        ducker.duck_session("bad", first).await;
        assert!(!ducker.is_ducked("bad"));

        ducker.duck_session("bad", second).await;
        assert!(ducker.is_ducked("bad"));
    }
}
