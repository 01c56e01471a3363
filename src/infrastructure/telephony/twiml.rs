//! TwiML rendering for call instructions

use crate::domain::telephony::{CallInstruction, ConferenceJoin, EventCallback};
use crate::infrastructure::telephony::webhook_paths;
use std::fmt::Write;

/// Renders instructions as TwiML, resolving callbacks against a public base URL
#[derive(Debug, Clone)]
pub struct TwimlRenderer {
    webhook_base_url: String,
}

impl TwimlRenderer {
    pub fn new(webhook_base_url: impl Into<String>) -> Self {
        Self {
            webhook_base_url: webhook_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL the provider should call for `callback`
    pub fn callback_url(&self, callback: &EventCallback) -> String {
        let (path, call_id, agent_id) = match callback {
            EventCallback::Status { call_id } => (webhook_paths::STATUS, call_id, None),
            EventCallback::AnswerDetection { call_id } => (webhook_paths::AMD, call_id, None),
            EventCallback::Recording { call_id } => (webhook_paths::RECORDING, call_id, None),
            EventCallback::AgentAnswer { call_id, agent_id } => {
                (webhook_paths::AGENT_ANSWER, call_id, Some(agent_id))
            }
            EventCallback::AgentAccept { call_id, agent_id } => {
                (webhook_paths::AGENT_ACCEPT, call_id, Some(agent_id))
            }
            EventCallback::AgentStatus { call_id, agent_id } => {
                (webhook_paths::AGENT_STATUS, call_id, Some(agent_id))
            }
            EventCallback::ConferenceStatus { call_id } => {
                (webhook_paths::CONFERENCE_STATUS, call_id, None)
            }
        };

        match agent_id {
            Some(agent_id) => format!(
                "{}{}?callId={}&agentId={}",
                self.webhook_base_url, path, call_id, agent_id
            ),
            None => format!("{}{}?callId={}", self.webhook_base_url, path, call_id),
        }
    }

    pub fn render(&self, instructions: &[CallInstruction]) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for instruction in instructions {
            self.render_one(&mut out, instruction);
        }
        out.push_str("</Response>");
        out
    }

    fn render_one(&self, out: &mut String, instruction: &CallInstruction) {
        match instruction {
            CallInstruction::Say(text) => {
                let _ = write!(out, "<Say>{}</Say>", escape(text));
            }
            CallInstruction::Play(url) => {
                let _ = write!(out, "<Play>{}</Play>", escape(url));
            }
            CallInstruction::Record {
                max_length_secs,
                callback,
            } => {
                let _ = write!(out, r#"<Record maxLength="{}""#, max_length_secs);
                if let Some(callback) = callback {
                    let _ = write!(
                        out,
                        r#" recordingStatusCallback="{}" recordingStatusCallbackMethod="POST""#,
                        escape(&self.callback_url(callback))
                    );
                }
                out.push_str("/>");
            }
            CallInstruction::Gather {
                num_digits,
                timeout_secs,
                action,
                prompt,
            } => {
                let _ = write!(
                    out,
                    r#"<Gather numDigits="{}" timeout="{}" action="{}" method="POST"><Say>{}</Say></Gather>"#,
                    num_digits,
                    timeout_secs,
                    escape(&self.callback_url(action)),
                    escape(prompt)
                );
            }
            CallInstruction::JoinConference(join) => self.render_conference(out, join),
            CallInstruction::Hangup => out.push_str("<Hangup/>"),
        }
    }

    fn render_conference(&self, out: &mut String, join: &ConferenceJoin) {
        let _ = write!(
            out,
            r#"<Dial><Conference startConferenceOnEnter="{}" endConferenceOnExit="{}" beep="{}""#,
            join.start_on_enter, join.end_on_exit, join.beep
        );
        if let Some(wait_url) = &join.wait_url {
            let _ = write!(out, r#" waitUrl="{}""#, escape(wait_url));
        }
        if join.record {
            out.push_str(r#" record="record-from-start""#);
        }
        if let Some(callback) = &join.status_callback {
            let _ = write!(
                out,
                r#" statusCallback="{}" statusCallbackEvent="start end join leave" statusCallbackMethod="POST""#,
                escape(&self.callback_url(callback))
            );
        }
        if let Some(callback) = &join.recording_callback {
            let _ = write!(
                out,
                r#" recordingStatusCallback="{}" recordingStatusCallbackMethod="POST""#,
                escape(&self.callback_url(callback))
            );
        }
        let _ = write!(out, ">{}</Conference></Dial>", escape(join.name.as_str()));
    }
}

fn escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conference::ConferenceName;
    use crate::domain::shared::{AgentId, CallId};
    use uuid::Uuid;

    fn renderer() -> TwimlRenderer {
        TwimlRenderer::new("https://dialer.example.com/")
    }

    #[test]
    fn test_callback_urls() {
        let call_id = CallId::from_uuid(Uuid::nil());
        let agent_id = AgentId::from_uuid(Uuid::from_u128(1));
        assert_eq!(
            renderer().callback_url(&EventCallback::Status { call_id }),
            format!("https://dialer.example.com/webhooks/provider/status?callId={}", call_id)
        );
        assert_eq!(
            renderer().callback_url(&EventCallback::AgentAccept { call_id, agent_id }),
            format!(
                "https://dialer.example.com/webhooks/provider/agent-accept?callId={}&agentId={}",
                call_id, agent_id
            )
        );
    }

    #[test]
    fn test_voicemail_drop() {
        let call_id = CallId::from_uuid(Uuid::nil());
        let xml = renderer().render(&[
            CallInstruction::Say("Call us & <soon>".to_string()),
            CallInstruction::Record {
                max_length_secs: 120,
                callback: Some(EventCallback::Recording { call_id }),
            },
            CallInstruction::Hangup,
        ]);

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#));
        assert!(xml.contains("<Say>Call us &amp; &lt;soon&gt;</Say>"));
        assert!(xml.contains(r#"<Record maxLength="120" recordingStatusCallback="https://dialer.example.com/webhooks/provider/recording?callId="#));
        assert!(xml.ends_with("<Hangup/></Response>"));
    }

    #[test]
    fn test_conference_join() {
        let call_id = CallId::from_uuid(Uuid::nil());
        let xml = renderer().render(&[CallInstruction::JoinConference(ConferenceJoin {
            name: ConferenceName::for_call(call_id),
            wait_url: Some("http://music.example.com/hold?a=1&b=2".to_string()),
            start_on_enter: true,
            end_on_exit: false,
            beep: false,
            record: true,
            status_callback: Some(EventCallback::ConferenceStatus { call_id }),
            recording_callback: None,
        })]);

        assert!(xml.contains(r#"startConferenceOnEnter="true" endConferenceOnExit="false" beep="false""#));
        assert!(xml.contains(r#"waitUrl="http://music.example.com/hold?a=1&amp;b=2""#));
        assert!(xml.contains(r#"record="record-from-start""#));
        assert!(xml.contains(&format!(">call_{}</Conference></Dial>", call_id)));
    }

    #[test]
    fn test_gather_for_accept() {
        let call_id = CallId::new();
        let agent_id = AgentId::new();
        let xml = renderer().render(&[CallInstruction::Gather {
            num_digits: 1,
            timeout_secs: 10,
            action: EventCallback::AgentAccept { call_id, agent_id },
            prompt: "Press any key to accept this call.".to_string(),
        }]);
        assert!(xml.contains(r#"<Gather numDigits="1" timeout="10" action="#));
        assert!(xml.contains("&amp;agentId="));
        assert!(xml.contains("<Say>Press any key to accept this call.</Say></Gather>"));
    }
}
