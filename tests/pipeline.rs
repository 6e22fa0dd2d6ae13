//! Resolution pipeline integration tests

use serde_json::json;

use voice_orchestrator::correlator::ReadyIntent;
use voice_orchestrator::llm::Role;
use voice_orchestrator::pipeline::Tier;

mod common;

use common::{Harness, RecordingGateway, ScriptedChat, args, text_reply, tool_reply};

fn intent(room: &str, text: &str) -> ReadyIntent {
    ReadyIntent {
        room: room.to_string(),
        text: text.to_string(),
        speaker: "anna".to_string(),
    }
}

#[tokio::test]
async fn test_cache_hit_skips_model() {
    let h = Harness::new(ScriptedChat::new(vec![])).await;
    h.cache
        .add(
            "mach das licht in der küche an",
            "control_light",
            args(json!({"action": "turn_on", "entity_id": "light.kueche"})),
        )
        .await
        .unwrap();

    let resolution = h
        .pipeline
        .resolve(&intent("küche", "Mach das Licht in der Küche an"))
        .await;

    assert_eq!(resolution.tier, Tier::Cache);
    assert_eq!(resolution.reply, "Okay.");
    assert_eq!(h.chat.call_count(), 0);

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "light");
    assert_eq!(calls[0].1, "turn_on");
    assert_eq!(calls[0].2["entity_id"], "light.kueche");
}

#[tokio::test]
async fn test_cached_arguments_follow_current_room() {
    let h = Harness::new(ScriptedChat::new(vec![])).await;
    h.cache
        .add("musik weiter", "resume_music", args(json!({})))
        .await
        .unwrap();

    let resolution = h.pipeline.resolve(&intent("Büro", "musik weiter")).await;

    assert_eq!(resolution.tier, Tier::Cache);
    assert_eq!(resolution.executed[0].arguments["room"], "Büro");
    assert_eq!(h.gateway.calls()[0].2["entity_id"], "media_player.buero");
}

#[tokio::test]
async fn test_fast_path_bypasses_model() {
    let h = Harness::new(ScriptedChat::new(vec![])).await;

    let resolution = h.pipeline.resolve(&intent("küche", "Musik stoppen")).await;

    assert_eq!(resolution.tier, Tier::FastPath);
    assert_eq!(h.chat.call_count(), 0);
    assert_eq!(resolution.executed[0].tool, "stop_music");

    let calls = h.gateway.calls();
    assert_eq!(calls[0].1, "media_pause");
    assert_eq!(calls[0].2["entity_id"], "media_player.kueche");

    // fast-path hits are not learned
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_fallback_tool_call_is_learned() {
    let chat = ScriptedChat::new(vec![tool_reply(
        "control_light",
        json!({"action": "turn_off", "entity_id": "light.kueche", "room": "küche"}),
    )]);
    let h = Harness::new(chat).await;

    let first = h.pipeline.resolve(&intent("küche", "Mach es dunkel")).await;
    assert_eq!(first.tier, Tier::Fallback);
    assert_eq!(first.reply, "Okay.");
    assert_eq!(h.chat.call_count(), 1);

    let entry = h.cache.entry("mach es dunkel").await.expect("learned");
    assert_eq!(entry.tool, "control_light");
    assert_eq!(entry.args["action"], "turn_off");
    assert!(!entry.args.contains_key("room"));

    let second = h.pipeline.resolve(&intent("küche", "mach es dunkel")).await;
    assert_eq!(second.tier, Tier::Cache);
    assert_eq!(h.chat.call_count(), 1);
    assert_eq!(h.gateway.calls().len(), 2);
}

#[tokio::test]
async fn test_failed_tool_call_is_not_learned() {
    let gateway = RecordingGateway::new();
    gateway.set_succeed(false);
    let chat = ScriptedChat::new(vec![tool_reply(
        "control_light",
        json!({"action": "turn_off", "entity_id": "light.kueche"}),
    )]);
    let h = Harness::with_gateway(chat, gateway).await;

    let resolution = h.pipeline.resolve(&intent("küche", "mach es dunkel")).await;

    assert_eq!(resolution.tier, Tier::Fallback);
    assert!(!resolution.executed[0].success);
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_empty_model_reply_uses_fallback_phrase() {
    let h = Harness::new(ScriptedChat::new(vec![])).await;

    let resolution = h.pipeline.resolve(&intent("küche", "erzähl mir was")).await;

    assert_eq!(resolution.tier, Tier::Fallback);
    assert_eq!(resolution.reply, "Das habe ich nicht verstanden.");
    assert!(resolution.executed.is_empty());
}

#[tokio::test]
async fn test_text_reply_is_spoken() {
    let h = Harness::new(ScriptedChat::new(vec![text_reply("Es ist sonnig.")])).await;

    let resolution = h.pipeline.resolve(&intent("küche", "wie ist das wetter")).await;

    assert_eq!(resolution.reply, "Es ist sonnig.");
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_confident_route_narrows_tools() {
    let h = Harness::new(ScriptedChat::new(vec![])).await;

    h.pipeline.resolve(&intent("küche", "Licht heller")).await;

    let requests = h.chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].tools,
        ["control_light", "set_temperature", "activate_scene"]
    );
    assert_eq!(h.gateway.context_routes(), [Some("home_control".to_string())]);
}

#[tokio::test]
async fn test_unrouted_request_offers_every_tool() {
    let h = Harness::new(ScriptedChat::new(vec![])).await;

    h.pipeline.resolve(&intent("küche", "erzähl mir einen witz")).await;

    let requests = h.chat.requests();
    assert_eq!(requests[0].tools.len(), 16);
    assert_eq!(h.gateway.context_routes(), [None]);
}

#[tokio::test]
async fn test_prompt_carries_speaker_room_and_text() {
    let h = Harness::new(ScriptedChat::new(vec![])).await;

    h.pipeline.resolve(&intent("küche", "Erzähl  mir   einen Witz")).await;

    let messages = &h.chat.requests()[0].messages;
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.contains("Current Speaker: anna"));
    assert!(messages[0].content.contains("room: küche"));
    assert!(messages[0].content.contains("light.kueche"));
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].content, "erzähl mir einen witz");
}

#[tokio::test]
async fn test_tool_outside_route_is_ignored() {
    let chat = ScriptedChat::new(vec![voice_orchestrator::llm::ChatReply {
        content: Some("Das kann ich hier nicht.".to_string()),
        ..tool_reply("stop_music", json!({}))
    }]);
    let h = Harness::new(chat).await;

    let resolution = h.pipeline.resolve(&intent("küche", "licht dimmen")).await;

    assert_eq!(resolution.reply, "Das kann ich hier nicht.");
    assert!(resolution.executed.is_empty());
    assert!(h.gateway.calls().is_empty());
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_volume_call_returns_satellite_action() {
    let chat = ScriptedChat::new(vec![tool_reply("manage_volume", json!({"level": 30}))]);
    let h = Harness::new(chat).await;

    let resolution = h.pipeline.resolve(&intent("küche", "etwas leiser")).await;

    assert_eq!(
        resolution.actions,
        [voice_orchestrator::broker::SatelliteAction::Volume { level: 30 }]
    );
    assert_eq!(h.gateway.calls()[0].2["volume_level"], 0.3);

    // exact-only tools are cached but never matched fuzzily
    let entry = h.cache.entry("etwas leiser").await.unwrap();
    assert!(entry.exact_only);
}

#[tokio::test]
async fn test_teach_route_through_fallback() {
    let chat = ScriptedChat::new(vec![tool_reply(
        "teach_route",
        json!({"route": "media", "utterance": "Queen auflegen"}),
    )]);
    let h = Harness::new(chat).await;

    let resolution = h
        .pipeline
        .resolve(&intent("küche", "merk dir das für später"))
        .await;

    assert!(resolution.executed[0].success);
    assert!(h.router.routes().await["media"].contains(&"queen auflegen".to_string()));
}
