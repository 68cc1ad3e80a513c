use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use tally_protocol::{error_codes, Response};

use crate::error::WaitError;
use crate::events::{topics, EventBus};
use crate::pending::PendingBridge;
use crate::router::ServiceHandler;

/// Capability object handed to fetch providers for requesting human input.
///
/// Both requests are keyed by account id, publish their `*.required` event
/// before suspending, and resolve when an operator answers over RPC, the
/// per-bridge timeout fires, or the wait is cancelled. Two bridges with
/// independent timeouts back it: one-time codes are short-lived, manual
/// browser logins get longer.
#[derive(Clone)]
pub struct InteractionHub {
    otp: PendingBridge<String>,
    manual: PendingBridge<()>,
    events: EventBus,
}

impl InteractionHub {
    pub fn new(events: EventBus, otp_timeout: Duration, manual_timeout: Duration) -> Self {
        Self {
            otp: PendingBridge::new(otp_timeout),
            manual: PendingBridge::new(manual_timeout),
            events,
        }
    }

    /// Suspend until the operator submits a one-time code for `account_id`.
    pub async fn request_otp(&self, account_id: &str) -> Result<String, WaitError> {
        self.otp
            .wait_for(account_id, || {
                self.events
                    .publish(topics::OTP_REQUIRED, json!({ "account_id": account_id }));
            })
            .await
    }

    /// Suspend until the operator confirms they finished a manual login.
    pub async fn request_manual_confirm(&self, account_id: &str) -> Result<(), WaitError> {
        self.manual
            .wait_for(account_id, || {
                self.events
                    .publish(topics::MANUAL_REQUIRED, json!({ "account_id": account_id }));
            })
            .await
    }

    /// Deliver an operator-submitted code; false when nothing is waiting.
    pub fn submit_otp(&self, account_id: &str, code: String) -> bool {
        self.otp.supply(account_id, code)
    }

    /// Deliver a manual-login confirmation; false when nothing is waiting.
    pub fn confirm_manual(&self, account_id: &str) -> bool {
        self.manual.supply(account_id, ())
    }

    /// Fail any outstanding waits for `account_id`, e.g. when the session
    /// that owns them is cancelled.
    pub fn cancel_all_for(&self, account_id: &str) {
        self.otp.cancel(account_id);
        self.manual.cancel(account_id);
    }
}

#[derive(Debug, Deserialize)]
struct OtpSubmitParams {
    account_id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct ManualConfirmParams {
    account_id: String,
}

/// RPC surface for answering suspended fetches (`auth.*`).
pub struct AuthService {
    hub: InteractionHub,
}

impl AuthService {
    pub fn new(hub: InteractionHub) -> Self {
        Self { hub }
    }

    fn otp_submit(&self, req_id: uuid::Uuid, params: Option<Value>) -> Response {
        let params: OtpSubmitParams = match params {
            Some(v) => match serde_json::from_value(v) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        req_id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            },
            None => return Response::error(req_id, error_codes::INVALID_PARAMS, "missing params"),
        };
        if params.code.trim().is_empty() {
            return Response::error(req_id, error_codes::INVALID_PARAMS, "missing code");
        }
        if self.hub.submit_otp(&params.account_id, params.code) {
            tracing::info!(account_id = %params.account_id, "otp accepted");
            Response::success(req_id, json!({ "accepted": true }))
        } else {
            Response::error(
                req_id,
                error_codes::NO_PENDING_REQUEST,
                format!("no pending otp request for {}", params.account_id),
            )
        }
    }

    fn manual_confirm(&self, req_id: uuid::Uuid, params: Option<Value>) -> Response {
        let params: ManualConfirmParams = match params {
            Some(v) => match serde_json::from_value(v) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        req_id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            },
            None => return Response::error(req_id, error_codes::INVALID_PARAMS, "missing params"),
        };
        if self.hub.confirm_manual(&params.account_id) {
            tracing::info!(account_id = %params.account_id, "manual login confirmed");
            Response::success(req_id, json!({ "accepted": true }))
        } else {
            Response::error(
                req_id,
                error_codes::NO_PENDING_REQUEST,
                format!("no pending manual-login request for {}", params.account_id),
            )
        }
    }
}

impl ServiceHandler for AuthService {
    fn namespace(&self) -> &str {
        "auth"
    }

    fn handle_request(
        &mut self,
        id: uuid::Uuid,
        method: &str,
        params: Option<Value>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send + '_>> {
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "auth.otp.submit" => self.otp_submit(id, params),
                "auth.manual.confirm" => self.manual_confirm(id, params),
                _ => Response::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("unknown method: {method}"),
                ),
            }
        })
    }
}
