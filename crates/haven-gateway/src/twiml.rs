//! TwiML response writer. The provider accepts a small XML dialect; we
//! emit it directly rather than pulling in an XML crate — the element set
//! is closed and every text node goes through `escape_xml`.

use std::fmt::Write;

/// Builder for one `<Response>` envelope.
#[derive(Debug, Default)]
pub struct VoiceResponse {
    body: String,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        let _ = write!(self.body, "<Say>{}</Say>", escape_xml(text));
        self
    }

    pub fn play(mut self, url: &str) -> Self {
        let _ = write!(self.body, "<Play>{}</Play>", escape_xml(url));
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        let _ = write!(self.body, r#"<Pause length="{seconds}"/>"#);
        self
    }

    pub fn redirect(mut self, url: &str) -> Self {
        let _ = write!(
            self.body,
            r#"<Redirect method="POST">{}</Redirect>"#,
            escape_xml(url)
        );
        self
    }

    pub fn hangup(mut self) -> Self {
        self.body.push_str("<Hangup/>");
        self
    }

    /// Speech gather wrapping its prompt, so the caller can barge in.
    /// `prompt` is either spoken text or a pre-synthesized audio URL.
    pub fn gather(mut self, action: &str, prompt: GatherPrompt<'_>) -> Self {
        let _ = write!(
            self.body,
            r#"<Gather input="speech" action="{}" method="POST" speechTimeout="auto" speechModel="phone_call" enhanced="true" language="en-US">"#,
            escape_xml(action)
        );
        match prompt {
            GatherPrompt::Say(text) => {
                let _ = write!(self.body, "<Say>{}</Say>", escape_xml(text));
            }
            GatherPrompt::Play(url) => {
                let _ = write!(self.body, "<Play>{}</Play>", escape_xml(url));
            }
            GatherPrompt::None => {}
        }
        self.body.push_str("</Gather>");
        self
    }

    pub fn build(self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response>{}</Response>"#,
            self.body
        )
    }
}

pub enum GatherPrompt<'a> {
    Say(&'a str),
    Play(&'a str),
    None,
}

/// Empty envelope — used by interim results and as the panic fallback.
pub fn empty() -> String {
    VoiceResponse::new().build()
}

/// Minimal recover envelope: re-gather speech so the call survives any
/// server-side failure.
pub fn regather(action: &str) -> String {
    VoiceResponse::new()
        .gather(
            action,
            GatherPrompt::Say("I'm sorry, I didn't catch that. Could you say it again?"),
        )
        .build()
}

/// Messaging envelope for SMS webhook replies.
pub fn message_response(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Message>{}</Message></Response>"#,
        escape_xml(body)
    )
}

pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn say_escapes_text() {
        let xml = VoiceResponse::new().say("Safe & Sound <Shelter>").build();
        assert!(xml.contains("<Say>Safe &amp; Sound &lt;Shelter&gt;</Say>"));
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#));
        assert!(xml.ends_with("</Response>"));
    }

    #[test]
    fn gather_carries_speech_attributes() {
        let xml = VoiceResponse::new()
            .gather("/voice/process", GatherPrompt::Say("What can I do for you?"))
            .build();
        assert!(xml.contains(r#"input="speech""#));
        assert!(xml.contains(r#"action="/voice/process""#));
        assert!(xml.contains(r#"speechTimeout="auto""#));
        assert!(xml.contains(r#"speechModel="phone_call""#));
        assert!(xml.contains(r#"enhanced="true""#));
        assert!(xml.contains(r#"language="en-US""#));
        assert!(xml.contains("<Say>What can I do for you?</Say></Gather>"));
    }

    #[test]
    fn play_inside_gather() {
        let xml = VoiceResponse::new()
            .gather(
                "/voice/process",
                GatherPrompt::Play("https://example.org/audio/abc"),
            )
            .build();
        assert!(xml.contains("<Play>https://example.org/audio/abc</Play>"));
    }

    #[test]
    fn hangup_after_say() {
        let xml = VoiceResponse::new().say("Take care.").hangup().build();
        assert!(xml.contains("<Say>Take care.</Say><Hangup/>"));
    }

    #[test]
    fn redirect_uses_post() {
        let xml = VoiceResponse::new()
            .say("One moment.")
            .redirect("/consent/prompt")
            .build();
        assert!(xml.contains(r#"<Redirect method="POST">/consent/prompt</Redirect>"#));
    }

    #[test]
    fn pause_carries_length() {
        let xml = VoiceResponse::new().pause(1).hangup().build();
        assert!(xml.contains(r#"<Pause length="1"/><Hangup/>"#));
    }

    #[test]
    fn empty_envelope() {
        assert_eq!(
            empty(),
            r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#
        );
    }

    #[test]
    fn message_response_escapes() {
        let xml = message_response("Call 1-800-799-7233 & stay safe");
        assert!(xml.contains("<Message>Call 1-800-799-7233 &amp; stay safe</Message>"));
    }
}
