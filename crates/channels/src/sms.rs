//! SMS delivery through the Twilio REST API.

use std::time::Duration;

use reqwest::Client;

use relay_common::config::TwilioConfig;

use crate::ChannelError;

/// Per-request timeout for the provider call.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Twilio SMS adapter. Constructed only when credentials are configured;
/// the dispatcher models the unconfigured service as its absence.
pub struct TwilioSender {
    http: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSender {
    pub fn new(config: TwilioConfig) -> Result<Self, ChannelError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChannelError::Provider(e.to_string()))?;

        Ok(Self {
            http,
            account_sid: config.account_sid,
            auth_token: config.auth_token,
            from_number: config.from_number,
        })
    }

    /// One SMS send attempt. Anything but a 2xx from the provider is an
    /// error.
    pub async fn send(&self, target: &str, body: &str) -> Result<(), ChannelError> {
        let to = normalize_us_number(target);
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| ChannelError::Provider(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(target = %to, "SMS accepted by provider");
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(ChannelError::Provider(format!(
                "twilio returned {status}: {detail}"
            )))
        }
    }
}

/// Prefix bare US numbers with the country code; leave E.164 numbers alone.
///
/// `2123456789` becomes `+12123456789` and `12123456789` becomes
/// `+12123456789`; anything already starting with `+` passes through
/// unchanged, as does any other length.
fn normalize_us_number(number: &str) -> String {
    if number.starts_with('+') {
        return number.to_string();
    }

    let mut digits = number.to_string();
    if digits.len() == 10 {
        digits.insert(0, '1');
    }
    if digits.len() == 11 {
        digits.insert(0, '+');
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_digit_us_number_gains_country_code() {
        assert_eq!(normalize_us_number("2123456789"), "+12123456789");
    }

    #[test]
    fn test_eleven_digit_number_gains_plus() {
        assert_eq!(normalize_us_number("12123456789"), "+12123456789");
    }

    #[test]
    fn test_e164_number_is_unchanged() {
        assert_eq!(normalize_us_number("+12123456789"), "+12123456789");
        assert_eq!(normalize_us_number("+442071234567"), "+442071234567");
    }

    #[test]
    fn test_other_lengths_pass_through() {
        assert_eq!(normalize_us_number("911"), "911");
        assert_eq!(normalize_us_number("441632960961"), "441632960961");
    }
}
