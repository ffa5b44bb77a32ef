//! Response shaping: one retrieval pass fans out into a voice sentence, an
//! SMS body, and a structured web summary. The strings here are canonical —
//! tests and the dialog engine match them verbatim.

use haven_core::types::{PresentableAnswer, RetrievalResult, WebSummary};

use crate::extract::PHONE_NOT_AVAILABLE;

pub const EMPTY_VOICE_RESPONSE: &str =
    "I couldn't find any shelters matching your search. Would you like to try a different location?";
pub const SMS_TRAILER: &str = "National DV Hotline: 1-800-799-7233 (24/7)";
const VOICE_CLOSER: &str = "How else can I help you today?";

/// Build the spoken sentence for a result set.
pub fn voice_response(results: &[RetrievalResult], location: Option<&str>) -> String {
    let place = location
        .map(|l| format!(" in {l}"))
        .unwrap_or_default();

    let titles: Vec<&str> = results.iter().map(|r| r.title.as_str()).collect();
    match titles.as_slice() {
        [] => EMPTY_VOICE_RESPONSE.to_string(),
        [one] => format!("I found a shelter{place}: {one}. {VOICE_CLOSER}"),
        [a, b] => format!("I found 2 shelters{place}: {a} and {b}. {VOICE_CLOSER}"),
        [a, b, c] => format!("I found 3 shelters{place}: {a}, {b}, and {c}. {VOICE_CLOSER}"),
        [a, b, ..] => format!(
            "I found {} shelters{place}, including {a} and {b}. {VOICE_CLOSER}",
            titles.len()
        ),
    }
}

/// Build the SMS body: numbered entries with address, phone, and URL, then
/// the national hotline trailer.
pub fn sms_response(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return format!("No shelters found for your search.\n\n{SMS_TRAILER}");
    }

    let mut body = String::new();
    for (i, result) in results.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", i + 1, result.title));
        if let Some(address) = result.extracted_addresses.first() {
            body.push_str(&format!("   Address: {address}\n"));
        }
        let phone = result
            .extracted_phones
            .first()
            .map(String::as_str)
            .unwrap_or(PHONE_NOT_AVAILABLE);
        body.push_str(&format!("   Phone: {phone}\n"));
        body.push_str(&format!("   {}\n\n", result.url));
    }
    body.push_str(SMS_TRAILER);
    body
}

pub fn web_response(results: &[RetrievalResult]) -> WebSummary {
    WebSummary {
        count: results.len(),
        names: results.iter().map(|r| r.title.clone()).collect(),
    }
}

/// Assemble all three shapes into the answer the dialog engine presents.
pub fn shape(results: Vec<RetrievalResult>, location: Option<&str>) -> PresentableAnswer {
    PresentableAnswer {
        voice_response: voice_response(&results, location),
        sms_response: sms_response(&results),
        web_response: web_response(&results),
        results,
    }
}
