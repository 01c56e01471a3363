//! Twilio REST adapter
//!
//! Places lead and agent legs through the Calls resource, pushes TwiML into
//! live calls and validates `X-Twilio-Signature` on inbound webhooks.

use crate::config::ProviderConfig;
use crate::domain::shared::{DomainError, ProviderCallId, Result};
use crate::domain::telephony::{
    AmdMode, CallInstruction, CallLeg, EventCallback, PlaceCallRequest, RenderedInstructions,
    TelephonyProvider,
};
use crate::infrastructure::telephony::twiml::TwimlRenderer;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;
use tracing::{debug, error, warn};

type HmacSha1 = Hmac<Sha1>;

const API_VERSION: &str = "2010-04-01";

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Keeps the lead leg open until the engine pushes real instructions
const PARK_TWIML: &str = r#"<Response><Pause length="60"/></Response>"#;

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

pub struct TwilioProvider {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    api_base_url: String,
    renderer: TwimlRenderer,
    validate_signatures: bool,
}

impl TwilioProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| DomainError::Provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            renderer: TwimlRenderer::new(config.webhook_base_url.clone()),
            validate_signatures: config.validate_signatures,
        })
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/{}/Accounts/{}/Calls.json",
            self.api_base_url, API_VERSION, self.account_sid
        )
    }

    fn call_url(&self, provider_call_id: &ProviderCallId) -> String {
        format!(
            "{}/{}/Accounts/{}/Calls/{}.json",
            self.api_base_url, API_VERSION, self.account_sid, provider_call_id
        )
    }

    fn place_call_form(&self, request: &PlaceCallRequest) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("To", request.to.clone()),
            ("From", request.from.clone()),
            ("Timeout", request.ring_timeout_secs.to_string()),
            ("StatusCallbackMethod", "POST".to_string()),
        ];
        for event in ["initiated", "ringing", "answered", "completed"] {
            form.push(("StatusCallbackEvent", event.to_string()));
        }

        match &request.leg {
            CallLeg::Lead { amd, .. } => {
                let call_id = request.call_id;
                form.push(("Twiml", PARK_TWIML.to_string()));
                form.push((
                    "StatusCallback",
                    self.renderer.callback_url(&EventCallback::Status { call_id }),
                ));
                let mode = match amd {
                    AmdMode::DetectMessageEnd => "DetectMessageEnd",
                    AmdMode::Enable => "Enable",
                };
                form.push(("MachineDetection", mode.to_string()));
                form.push(("AsyncAmd", "true".to_string()));
                form.push((
                    "AsyncAmdStatusCallback",
                    self.renderer
                        .callback_url(&EventCallback::AnswerDetection { call_id }),
                ));
                form.push(("AsyncAmdStatusCallbackMethod", "POST".to_string()));
            }
            CallLeg::Agent { agent_id } => {
                let call_id = request.call_id;
                let agent_id = *agent_id;
                form.push((
                    "Url",
                    self.renderer
                        .callback_url(&EventCallback::AgentAnswer { call_id, agent_id }),
                ));
                form.push(("Method", "POST".to_string()));
                form.push((
                    "StatusCallback",
                    self.renderer
                        .callback_url(&EventCallback::AgentStatus { call_id, agent_id }),
                ));
            }
        }
        form
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| DomainError::Provider(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(ApiErrorBody {
                code: Some(code),
                message: Some(message),
            }) => format!("{} (code {})", message, code),
            _ => body,
        };
        error!("Twilio returned {}: {}", status, message);
        Err(DomainError::Provider(format!(
            "provider returned {}: {}",
            status, message
        )))
    }
}

#[async_trait]
impl TelephonyProvider for TwilioProvider {
    async fn place_call(&self, request: &PlaceCallRequest) -> Result<ProviderCallId> {
        let form = self.place_call_form(request);
        let response = self.post_form(&self.calls_url(), &form).await?;
        let resource: CallResource = response
            .json()
            .await
            .map_err(|e| DomainError::Provider(format!("invalid call resource: {}", e)))?;

        debug!("Placed call {} for {}", resource.sid, request.call_id);
        Ok(ProviderCallId::new(resource.sid))
    }

    async fn update_call(
        &self,
        provider_call_id: &ProviderCallId,
        instructions: &[CallInstruction],
    ) -> Result<()> {
        let twiml = self.renderer.render(instructions);
        self.post_form(&self.call_url(provider_call_id), &[("Twiml", twiml)])
            .await?;
        debug!("Updated call {}", provider_call_id);
        Ok(())
    }

    async fn end_call(&self, provider_call_id: &ProviderCallId) -> Result<()> {
        self.post_form(
            &self.call_url(provider_call_id),
            &[("Status", "completed".to_string())],
        )
        .await?;
        debug!("Ended call {}", provider_call_id);
        Ok(())
    }

    fn validate_inbound_event<'a>(
        &self,
        url: &str,
        params: &[(String, String)],
        signature: Option<&'a str>,
    ) -> bool {
        if !self.validate_signatures {
            return true;
        }
        let Some(signature) = signature else {
            warn!("Webhook without signature for {}", url);
            return false;
        };
        verify_signature(&self.auth_token, url, params, signature)
    }

    fn render(&self, instructions: &[CallInstruction]) -> RenderedInstructions {
        RenderedInstructions {
            content_type: "application/xml",
            body: self.renderer.render(instructions),
        }
    }
}

/// Payload covered by the signature: the URL followed by every form
/// parameter as `key` + `value`, sorted by key
fn signing_payload(url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    let mut payload = String::from(url);
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }
    payload
}

pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha1::new_from_slice(auth_token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(signing_payload(url, params).as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(signing_payload(url, params).as_bytes());
    mac.verify_slice(&expected).is_ok()
}
