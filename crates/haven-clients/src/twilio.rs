//! Twilio REST adapter — outbound SMS only. Inbound webhooks and the media
//! stream are handled by the gateway, not here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{SmsApi, SmsReceipt};
use crate::error::{ClientError, Result};
use crate::openai::retry_after_ms;
use crate::stats::ServiceStats;
use haven_core::config::TwilioConfig;

pub struct TwilioSms {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    timeout_ms: u64,
    stats: Arc<ServiceStats>,
}

impl TwilioSms {
    pub fn new(cfg: &TwilioConfig, stats: Arc<ServiceStats>) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: cfg.account_sid.clone(),
            auth_token: cfg.auth_token.clone(),
            from_number: cfg.from_number.clone(),
            base_url: cfg.base_url.clone(),
            timeout_ms: cfg.timeout_ms,
            stats,
        }
    }
}

#[async_trait]
impl SmsApi for TwilioSms {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt> {
        let req_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let form = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        // never log the full destination number
        let to_tail: String = to.chars().rev().take(4).collect::<Vec<_>>().iter().rev().collect();
        debug!(req_id, to_tail = %to_tail, body_chars = body.len(), "sms send");
        let started = Instant::now();

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(Duration::from_millis(self.timeout_ms))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                self.stats.record("twilio", started, false);
                ClientError::from_reqwest("twilio", self.timeout_ms, e)
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = retry_after_ms(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            warn!(req_id, status, "sms send failed");
            self.stats.record("twilio", started, false);
            return Err(ClientError::from_status("twilio", status, retry_after, text));
        }

        let parsed: MessageResponse = resp.json().await.map_err(|e| {
            self.stats.record("twilio", started, false);
            ClientError::Parse {
                service: "twilio",
                message: e.without_url().to_string(),
            }
        })?;
        self.stats.record("twilio", started, true);
        debug!(req_id, sid = %parsed.sid, status = %parsed.status, "sms accepted");

        Ok(SmsReceipt {
            id: parsed.sid,
            status: parsed.status,
        })
    }
}

#[derive(Deserialize)]
struct MessageResponse {
    sid: String,
    status: String,
}
