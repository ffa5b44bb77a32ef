//! Canonical caller-facing sentences. These are matched verbatim by tests
//! and by the voice envelope layer — change them only deliberately.

pub const GREETING: &str = "Hello, and thank you for calling. I'm here to help you find \
shelters, legal help, or counseling. What can I do for you today?";

pub const REPROMPT: &str = "I'm still here. Take your time — when you're ready, tell me \
what you need.";

pub const TIMEOUT_LINE: &str =
    "I'm sorry, that's taking longer than expected. Could you please try again?";

pub const OFF_TOPIC_LINE: &str = "I'm here to help with domestic violence support — finding \
shelters, legal help, or counseling. How can I help you with that?";

pub const EMERGENCY_LINE: &str = "If you are in immediate danger, please hang up and call 911 \
right away. Your safety is the most important thing.";

pub const LOCATION_CLARIFY: &str = "Which city or area should I search in?";

pub const CONSENT_PROMPT: &str = "Before you go — would you like me to text you a summary of \
these resources? Please say yes or no.";

pub const CONSENT_YES: &str = "Great, I'll text you the details shortly. Take care, and stay safe.";

pub const CONSENT_NO: &str = "Okay, I won't send anything. Take care, and stay safe.";

pub const CONSENT_REPEAT: &str =
    "Sorry, I didn't catch that. Would you like a text summary? Please say yes or no.";

pub const IDLE_GOODBYE: &str = "I haven't heard anything, so I'll let you go. Call back any \
time — help is always available. Take care.";

pub const SEND_DETAILS_LINE: &str =
    "Of course — I'll text you the complete details for these resources shortly.";

pub fn location_confirm(location: &str) -> String {
    format!("I found a previous search for {location}. Would you like me to search there again?")
}

pub fn specific_result(title: &str, summary: &str) -> String {
    format!(
        "Here's what I found about {title}: {summary}. Would you like me to send you the \
         complete details?"
    )
}
