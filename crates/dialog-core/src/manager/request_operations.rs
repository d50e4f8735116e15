//! Non-call transactions: REGISTER, MESSAGE, INFO, BYE and the generic
//! request primitive.

use intercom_sip_core::{Method, SipResponse};
use tracing::{debug, info, warn};

use super::request_builder::Body;
use super::user_agent::UserAgent;
use crate::errors::{DialogError, DialogResult};

/// Map a final response to the outcome of a transaction.
///
/// Statuses of 300 and above fail, except that a 408 to BYE means the
/// remote is already gone.
pub(crate) fn check_response(method: &Method, response: SipResponse) -> DialogResult<SipResponse> {
    if response.status < 300 {
        return Ok(response);
    }
    if *method == Method::Bye && response.status == 408 {
        debug!("BYE answered with 408, treating the remote as gone");
        return Ok(response);
    }
    Err(DialogError::Transaction {
        method: method.to_string(),
        status: response.status,
        reason: response.reason,
    })
}

impl UserAgent {
    /// Send a request and wait for its final response.
    ///
    /// `seq` reuses an existing CSeq number; `None` allocates the next one.
    /// Provisional responses are skipped. Only one request per dialog should
    /// be in flight at a time.
    pub async fn request(
        &self,
        method: Method,
        headers: Vec<(String, String)>,
        content: Option<(String, Vec<u8>)>,
        seq: Option<u32>,
    ) -> DialogResult<SipResponse> {
        self.ensure_alive()?;
        let body = content.map(|(content_type, content)| Body::new(content_type, content));
        let (request, destination) = self.build_request(method.clone(), seq, &headers, body)?;
        let response = self.transact(request, destination, None).await?;
        check_response(&method, response)
    }

    /// Register with the remote device.
    ///
    /// Gives up silently when no response arrives within the register
    /// timeout; callers renew on a period shorter than the lease.
    pub async fn register(&self) -> DialogResult<()> {
        self.ensure_alive()?;
        let timeout = self.inner.options.read().register_timeout();
        let (request, destination) = self.build_request(Method::Register, None, &[], None)?;

        match self.transact(request, destination, Some(timeout)).await {
            Ok(response) => {
                check_response(&Method::Register, response)?;
                info!("Registered with {}", destination);
                Ok(())
            }
            Err(DialogError::Timeout { after_ms, .. }) => {
                warn!("REGISTER to {} got no response within {} ms", destination, after_ms);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Send a plain-text MESSAGE and return the remote's response
    pub async fn message(&self, content: impl Into<String>) -> DialogResult<SipResponse> {
        self.ensure_alive()?;
        let body = Body::new("text/plain", content.into());
        let (request, destination) = self.build_request(Method::Message, None, &[], Some(body))?;
        let response = self.transact(request, destination, None).await?;
        check_response(&Method::Message, response)
    }

    /// Send INFO inside the current dialog
    pub async fn info(&self, content_type: &str, content: impl Into<Vec<u8>>) -> DialogResult<SipResponse> {
        self.ensure_alive()?;
        let body = Body::new(content_type, content.into());
        let (request, destination) = self.build_request(Method::Info, None, &[], Some(body))?;
        let response = self.transact(request, destination, None).await?;
        check_response(&Method::Info, response)
    }

    /// Hang up. Best effort: failures and timeouts are logged, never returned.
    pub async fn send_bye(&self) {
        if self.is_destroyed() {
            return;
        }
        let timeout = self.inner.options.read().bye_timeout();
        let outcome = match self.build_request(Method::Bye, None, &[], None) {
            Ok((request, destination)) => self
                .transact(request, destination, Some(timeout))
                .await
                .and_then(|response| check_response(&Method::Bye, response)),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            debug!("BYE not confirmed: {}", e);
        }
        self.end_call("BYE sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_response() {
        assert!(check_response(&Method::Message, SipResponse::new(200, "OK")).is_ok());
        assert!(check_response(&Method::Bye, SipResponse::new(408, "Request Timeout")).is_ok());

        let err = check_response(&Method::Message, SipResponse::new(404, "Not Found")).unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "MESSAGE failed with 404 Not Found");

        let err = check_response(&Method::Invite, SipResponse::new(408, "Request Timeout")).unwrap_err();
        assert_eq!(err.status(), Some(408));
    }
}
