use salvo::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Body Mattermost posts to an outgoing-webhook callback URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingWebhookPayload {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub team_domain: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub trigger_word: String,
    #[serde(default)]
    pub file_ids: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingWebhookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

/// Debug endpoint: echoes the decoded payload back into the channel as a
/// code block.
pub struct OutgoingWebhookHandler;

#[handler]
impl OutgoingWebhookHandler {
    async fn handle(&self, req: &mut Request, res: &mut Response) {
        let payload = match req.parse_json::<OutgoingWebhookPayload>().await {
            Ok(payload) => payload,
            Err(err) => {
                error!("failed to decode outgoing webhook payload: {}", err);
                res.status_code(StatusCode::BAD_REQUEST);
                return;
            }
        };

        match echo_response(&payload) {
            Ok(response) => res.render(Json(response)),
            Err(err) => {
                error!("failed to marshal payload back to JSON: {}", err);
                res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }
}

fn echo_response(payload: &OutgoingWebhookPayload) -> serde_json::Result<OutgoingWebhookResponse> {
    let pretty = serde_json::to_string_pretty(payload)?;
    Ok(OutgoingWebhookResponse {
        text: Some(format!("```\n{pretty}\n```")),
        ..Default::default()
    })
}
