//! Home Assistant REST client

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use super::{DeviceGateway, route_domains};
use crate::{Error, Result};

const VOCABULARY_TEMPLATE: &str = "{% for area in areas() %}{{ area_name(area) }}|{% endfor %}\
{% for entity in label_entities('LABEL') %}{{ state_attr(entity, 'friendly_name') }}|{% endfor %}";

const ENTITIES_TEMPLATE: &str = "[{% for entity in label_entities('LABEL') %}\
{{ {'entity_id': entity, 'state': states(entity), \
'name': state_attr(entity, 'friendly_name'), 'area': area_name(entity)} | tojson }}\
{% if not loop.last %},{% endif %}{% endfor %}]";

/// Client for the Home Assistant REST API
#[derive(Debug, Clone)]
pub struct HomeAssistantClient {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    label: String,
}

/// Labelled entity as rendered by the context template
#[derive(Debug, Clone, Deserialize)]
struct LabelledEntity {
    entity_id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    area: Option<String>,
}

impl HomeAssistantClient {
    /// Create a client for `base_url` authenticated with a long-lived token
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        token: SecretString,
        label: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            label: label.to_string(),
        })
    }

    async fn render_template(&self, template: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/template", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&serde_json::json!({ "template": template }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Gateway(format!(
                "template rendering failed with {}",
                response.status()
            )));
        }

        Ok(response.text().await?)
    }

    async fn labelled_entities(&self) -> Result<Vec<LabelledEntity>> {
        let rendered = self
            .render_template(&ENTITIES_TEMPLATE.replace("LABEL", &self.label))
            .await?;
        Ok(serde_json::from_str(rendered.trim())?)
    }
}

#[async_trait]
impl DeviceGateway for HomeAssistantClient {
    async fn call_service(&self, domain: &str, service: &str, payload: Value) -> bool {
        let result = self
            .client
            .post(format!("{}/api/services/{domain}/{service}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(domain, service, "service called");
                true
            }
            Ok(response) => {
                tracing::error!(
                    domain,
                    service,
                    status = %response.status(),
                    "service call rejected"
                );
                false
            }
            Err(e) => {
                tracing::error!(domain, service, error = %e, "service call failed");
                false
            }
        }
    }

    async fn get_state(&self, entity_id: &str) -> Option<Value> {
        let result = self
            .client
            .get(format!("{}/api/states/{entity_id}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(entity_id, status = %response.status(), "state not available");
                return None;
            }
            Err(e) => {
                tracing::error!(entity_id, error = %e, "failed to fetch state");
                return None;
            }
        };

        match response.json().await {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!(entity_id, error = %e, "invalid state payload");
                None
            }
        }
    }

    async fn voice_vocabulary(&self) -> Vec<String> {
        match self
            .render_template(&VOCABULARY_TEMPLATE.replace("LABEL", &self.label))
            .await
        {
            Ok(rendered) => parse_vocabulary(&rendered),
            Err(e) => {
                tracing::error!(error = %e, "failed to load voice vocabulary");
                Vec::new()
            }
        }
    }

    async fn device_context(&self, text: &str, room: &str, route: Option<&str>) -> String {
        match self.labelled_entities().await {
            Ok(entities) => render_context(entities, text, room, route),
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch device context");
                "No devices found.".to_string()
            }
        }
    }
}

fn parse_vocabulary(rendered: &str) -> Vec<String> {
    rendered
        .split('|')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty() && item != "none")
        .collect()
}

/// Render entities of the route's domains, devices in the current or a
/// mentioned room first
fn render_context(
    entities: Vec<LabelledEntity>,
    text: &str,
    room: &str,
    route: Option<&str>,
) -> String {
    let domains = route_domains(route);
    let text = text.to_lowercase();
    let room = room.to_lowercase();

    let mut relevant: Vec<(bool, LabelledEntity)> = entities
        .into_iter()
        .filter(|e| {
            e.entity_id
                .split_once('.')
                .is_some_and(|(domain, _)| domains.contains(&domain))
        })
        .map(|e| {
            let near = e
                .area
                .as_deref()
                .map(str::to_lowercase)
                .is_some_and(|area| area == room || (!area.is_empty() && text.contains(&area)));
            (near, e)
        })
        .collect();

    // stable: keeps template order within each group
    relevant.sort_by_key(|(near, _)| !*near);

    let lines: Vec<String> = relevant
        .into_iter()
        .map(|(_, e)| {
            serde_json::json!({
                "entity_id": e.entity_id,
                "name": e.name.unwrap_or_default(),
                "state": e.state.unwrap_or_default(),
            })
            .to_string()
        })
        .collect();

    if lines.is_empty() {
        "No relevant devices found.".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, area: Option<&str>) -> LabelledEntity {
        LabelledEntity {
            entity_id: id.to_string(),
            state: Some("on".to_string()),
            name: Some(id.to_string()),
            area: area.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_vocabulary() {
        let vocab = parse_vocabulary("Wohnzimmer|Küche|None|\n Deckenleuchte Büro |  |");
        assert_eq!(vocab, vec!["wohnzimmer", "küche", "deckenleuchte büro"]);
    }

    #[test]
    fn test_context_filters_route_domains() {
        let entities = vec![
            entity("light.kueche", Some("Küche")),
            entity("media_player.kueche", Some("Küche")),
            entity("timer.kueche", Some("Küche")),
        ];
        let context = render_context(entities, "musik aus", "küche", Some("media"));
        assert_eq!(context.lines().count(), 1);
        assert!(context.contains("media_player.kueche"));
    }

    #[test]
    fn test_context_orders_nearby_devices_first() {
        let entities = vec![
            entity("light.flur", Some("Flur")),
            entity("light.buero", Some("Büro")),
            entity("light.kueche", Some("Küche")),
        ];
        let context = render_context(entities, "licht im büro an", "küche", Some("home_control"));
        let lines: Vec<&str> = context.lines().collect();
        assert!(lines[0].contains("light.buero"));
        assert!(lines[1].contains("light.kueche"));
        assert!(lines[2].contains("light.flur"));
    }

    #[test]
    fn test_context_empty() {
        let context = render_context(vec![], "licht an", "küche", None);
        assert_eq!(context, "No relevant devices found.");
    }
}
