//! Contact-info extraction from result content: US phone numbers and
//! street / city-state-zip addresses.

use regex::Regex;

pub const PHONE_NOT_AVAILABLE: &str = "Not available";

pub struct ContactExtractor {
    phone: Regex,
    street: Regex,
    city_state_zip: Regex,
}

impl Default for ContactExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactExtractor {
    pub fn new() -> Self {
        Self {
            phone: Regex::new(r"\(?(\d{3})\)?[-.\s]?(\d{3})[-.\s]?(\d{4})")
                .expect("static pattern must compile"),
            street: Regex::new(
                r"\d{1,5}\s+[A-Z][A-Za-z]*(?:\s[A-Z][A-Za-z]*){0,3}\s+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Drive|Dr|Lane|Ln|Way|Court|Ct|Place|Pl|Parkway|Pkwy)\.?",
            )
            .expect("static pattern must compile"),
            city_state_zip: Regex::new(
                r"[A-Z][A-Za-z]+(?:\s[A-Z][A-Za-z]+)*,\s*[A-Z]{2}\s+\d{5}(?:-\d{4})?",
            )
            .expect("static pattern must compile"),
        }
    }

    /// All distinct phone numbers in `content`, normalized to NNN-NNN-NNNN.
    pub fn phones(&self, content: &str) -> Vec<String> {
        let mut phones = Vec::new();
        for caps in self.phone.captures_iter(content) {
            let normalized = format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]);
            if !phones.contains(&normalized) {
                phones.push(normalized);
            }
        }
        phones
    }

    /// Normalize the first phone number in `text`, or the fixed fallback.
    pub fn normalize_phone(&self, text: &str) -> String {
        self.phone
            .captures(text)
            .map(|caps| format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]))
            .unwrap_or_else(|| PHONE_NOT_AVAILABLE.to_string())
    }

    /// Distinct street and city-state-zip address fragments in `content`.
    pub fn addresses(&self, content: &str) -> Vec<String> {
        let mut addresses = Vec::new();
        for m in self
            .street
            .find_iter(content)
            .chain(self.city_state_zip.find_iter(content))
        {
            let addr = m.as_str().trim().to_string();
            if !addresses.contains(&addr) {
                addresses.push(addr);
            }
        }
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_formats_normalize_to_dashes() {
        let x = ContactExtractor::new();
        assert_eq!(x.normalize_phone("call 512-555-0123"), "512-555-0123");
        assert_eq!(x.normalize_phone("call 512.555.0123"), "512-555-0123");
        assert_eq!(x.normalize_phone("call 512 555 0123"), "512-555-0123");
        assert_eq!(x.normalize_phone("call (512) 555-0123"), "512-555-0123");
        assert_eq!(x.normalize_phone("call 5125550123"), "512-555-0123");
    }

    #[test]
    fn missing_phone_is_not_available() {
        let x = ContactExtractor::new();
        assert_eq!(x.normalize_phone("no digits here"), PHONE_NOT_AVAILABLE);
    }

    #[test]
    fn multiple_phones_deduplicated() {
        let x = ContactExtractor::new();
        let phones = x.phones("Office: 512-555-0123. Crisis line: 512.555.0123 or 800-799-7233.");
        assert_eq!(phones, vec!["512-555-0123", "800-799-7233"]);
    }

    #[test]
    fn street_addresses_extracted() {
        let x = ContactExtractor::new();
        let addrs = x.addresses("Visit us at 1201 East Cesar Chavez St for intake.");
        assert_eq!(addrs, vec!["1201 East Cesar Chavez St"]);
    }

    #[test]
    fn city_state_zip_extracted() {
        let x = ContactExtractor::new();
        let addrs = x.addresses("Mailing: PO Box 1234, Austin, TX 78701-2345.");
        assert!(addrs.iter().any(|a| a.contains("Austin, TX 78701")));
    }

    #[test]
    fn extracted_phone_appears_in_source() {
        let x = ContactExtractor::new();
        let content = "Reach our advocates at (512) 555-0199 any time.";
        for phone in x.phones(content) {
            let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
            let content_digits: String =
                content.chars().filter(|c| c.is_ascii_digit()).collect();
            assert!(content_digits.contains(&digits));
        }
    }
}
